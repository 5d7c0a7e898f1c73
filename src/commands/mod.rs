//! HTTP surface: the daily batch trigger plus admin reads and timeline edits

pub mod activity;
pub mod batch;
pub mod schedule;
pub mod timeline;

use std::sync::Arc;

use axum::{
  http::StatusCode,
  response::{IntoResponse, Response},
  routing::{delete, get, patch, post, put},
  Json, Router,
};
use tracing::error;

use crate::batch::BatchError;
use crate::db::AppState;
use crate::notifications::NotificationError;
use crate::schedule::ScheduleError;
use crate::timeline::TimelineError;

pub type SharedState = Arc<AppState>;

pub fn router(state: SharedState) -> Router {
  Router::new()
    .route("/health", get(health))
    .route("/cron/adherence", post(batch::run_adherence))
    // Schedule
    .route("/clients/:id/schedule", get(schedule::get_schedule))
    .route("/clients/:id/schedule/day", get(schedule::get_day))
    .route("/clients/:id/schedule/month", get(schedule::get_month))
    // Timeline
    .route(
      "/clients/:id/timeline",
      get(timeline::get_timeline),
    )
    .route("/clients/:id/assignments", post(timeline::create_assignment))
    .route("/clients/:id/assignments/order", put(timeline::reorder))
    .route("/assignments/:id", delete(timeline::delete_assignment))
    .route("/assignments/:id/duration", patch(timeline::change_duration))
    .route("/assignments/:id/active", patch(timeline::change_active))
    // Analytics
    .route("/clients/:id/notifications", get(activity::get_notifications))
    .route("/notifications/:id/dismiss", post(activity::dismiss_notification))
    .route("/clients/:id/personal-records", get(activity::get_personal_records))
    .route("/clients/:id/streak", get(activity::get_streak))
    .with_state(state)
}

async fn health() -> StatusCode {
  StatusCode::OK
}

/// ---------------------------------------------------------------------------
/// Error Handling
/// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
  #[error("Unauthorized")]
  Unauthorized,

  #[error("{0}")]
  BadRequest(String),

  #[error("{0}")]
  NotFound(String),

  #[error("{0}")]
  Internal(String),
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = match &self {
      Self::Unauthorized => StatusCode::UNAUTHORIZED,
      Self::BadRequest(_) => StatusCode::BAD_REQUEST,
      Self::NotFound(_) => StatusCode::NOT_FOUND,
      Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
  }
}

impl From<TimelineError> for ApiError {
  fn from(err: TimelineError) -> Self {
    match err {
      TimelineError::NotFound(_) => Self::NotFound(err.to_string()),
      TimelineError::Database(e) => e.into(),
      TimelineError::InvalidDuration(_)
      | TimelineError::MissingStartDate
      | TimelineError::DateOverflow
      | TimelineError::InvalidOrder => Self::BadRequest(err.to_string()),
    }
  }
}

impl From<ScheduleError> for ApiError {
  fn from(err: ScheduleError) -> Self {
    match err {
      ScheduleError::Database(e) => e.into(),
    }
  }
}

impl From<NotificationError> for ApiError {
  fn from(err: NotificationError) -> Self {
    error!(error = %err, "notification store failure");
    Self::Internal(err.to_string())
  }
}

impl From<BatchError> for ApiError {
  fn from(err: BatchError) -> Self {
    Self::Internal(err.to_string())
  }
}

impl From<sqlx::Error> for ApiError {
  fn from(err: sqlx::Error) -> Self {
    error!(error = %err, "database failure");
    Self::Internal(format!("Database error: {}", err))
  }
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
