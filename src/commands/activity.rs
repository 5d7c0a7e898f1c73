//! Reads over the batch's outputs: notifications, personal records, streaks

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use super::{ApiError, SharedState};
use crate::models::{Notification, PersonalRecord, StreakState};
use crate::notifications::{dismiss, list_undismissed};
use crate::records::list_records;
use crate::streak::load_streak;

pub async fn get_notifications(
    State(state): State<SharedState>,
    Path(client_id): Path<i64>,
) -> Result<Json<Vec<Notification>>, ApiError> {
    Ok(Json(list_undismissed(&state.db, client_id).await?))
}

pub async fn dismiss_notification(
    State(state): State<SharedState>,
    Path(notification_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if dismiss(&state.db, notification_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!(
            "Notification not found: {}",
            notification_id
        )))
    }
}

pub async fn get_personal_records(
    State(state): State<SharedState>,
    Path(client_id): Path<i64>,
) -> Result<Json<Vec<PersonalRecord>>, ApiError> {
    Ok(Json(list_records(&state.db, client_id).await?))
}

/// A client the batch has not seen yet reads as a zero streak
pub async fn get_streak(
    State(state): State<SharedState>,
    Path(client_id): Path<i64>,
) -> Result<Json<StreakState>, ApiError> {
    let streak = load_streak(&state.db, client_id)
        .await?
        .unwrap_or_else(|| StreakState::empty(client_id));
    Ok(Json(streak))
}
