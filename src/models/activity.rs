use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CompletionRecord {
  pub id: i64,
  pub client_id: i64,
  pub workout_id: i64,
  /// Older records were written before completions were linked to an assignment
  pub assignment_id: Option<i64>,
  pub scheduled_date: NaiveDate,
  pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SetLogEntry {
  pub id: i64,
  pub completion_id: i64,
  pub workout_exercise_id: i64,
  pub set_number: i64,
  pub weight: Option<f64>,
  pub reps_completed: Option<i64>,
  pub logged_at: DateTime<Utc>,
}
