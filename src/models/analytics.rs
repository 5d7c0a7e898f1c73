use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct StreakState {
  pub client_id: i64,
  pub current_streak: i64,
  pub longest_streak: i64,
  pub last_workout_date: Option<NaiveDate>,
  pub streak_start_date: Option<NaiveDate>,
}

impl StreakState {
  pub fn empty(client_id: i64) -> Self {
    Self {
      client_id,
      current_streak: 0,
      longest_streak: 0,
      last_workout_date: None,
      streak_start_date: None,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PersonalRecord {
  pub id: i64,
  pub client_id: i64,
  pub exercise_id: i64,
  pub weight: f64,
  pub reps: i64,
  pub estimated_1rm: f64,
  pub achieved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
  MissedWorkout,
  NewPr,
  StreakAchieved,
  StreakLost,
}

impl NotificationType {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::MissedWorkout => "missed_workout",
      Self::NewPr => "new_pr",
      Self::StreakAchieved => "streak_achieved",
      Self::StreakLost => "streak_lost",
    }
  }
}

impl std::fmt::Display for NotificationType {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

impl std::str::FromStr for NotificationType {
  type Err = String;
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "missed_workout" => Ok(Self::MissedWorkout),
      "new_pr" => Ok(Self::NewPr),
      "streak_achieved" => Ok(Self::StreakAchieved),
      "streak_lost" => Ok(Self::StreakLost),
      _ => Err(format!("Unknown notification type: {}", s)),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
  pub id: i64,
  pub client_id: i64,
  pub notification_type: NotificationType,
  pub dedup_key: String,
  pub title: String,
  pub message: String,
  pub metadata: serde_json::Value,
  pub dismissed: bool,
  pub created_at: DateTime<Utc>,
}
