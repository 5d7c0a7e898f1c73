use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One program run scheduled for a client. `start_date`/`end_date` are
/// derived by the timeline sequencer and never edited directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProgramAssignment {
  pub id: i64,
  pub client_id: i64,
  pub program_id: i64,
  pub start_date: NaiveDate,
  /// Inclusive
  pub end_date: NaiveDate,
  pub duration_weeks: i64,
  pub order_index: i64,
  pub is_active: bool,
}

/// For appending a program to a client's timeline (dates are computed)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAssignment {
  pub client_id: i64,
  pub program_id: i64,
  pub duration_weeks: i64,
  /// Required only when the client has no assignments yet
  pub start_date: Option<NaiveDate>,
  #[serde(default)]
  pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WorkoutDefinition {
  pub id: i64,
  pub program_id: i64,
  pub name: String,
  /// 0 = Sunday .. 6 = Saturday, None = unscheduled
  pub day_of_week: Option<i64>,
  pub week_number: i64,
  /// Set for finishers/variations, which never occupy a calendar slot
  pub parent_workout_id: Option<i64>,
  pub order_index: i64,
}

impl WorkoutDefinition {
  pub fn is_top_level(&self) -> bool {
    self.parent_workout_id.is_none()
  }
}
