//! Schedule reads for the admin calendar

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;

use super::{ApiError, SharedState};
use crate::schedule::{resolve, DayStatus, ScheduleResolution};

#[derive(Debug, Deserialize)]
pub struct DayQuery {
    /// Defaults to today (UTC)
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct MonthQuery {
    pub year: i32,
    pub month: u32,
}

/// Full resolution: week/day slots, unscheduled workouts, completion index
pub async fn get_schedule(
    State(state): State<SharedState>,
    Path(client_id): Path<i64>,
) -> Result<Json<ScheduleResolution>, ApiError> {
    Ok(Json(resolve(&state.db, client_id, Utc::now()).await?))
}

pub async fn get_day(
    State(state): State<SharedState>,
    Path(client_id): Path<i64>,
    Query(query): Query<DayQuery>,
) -> Result<Json<DayStatus>, ApiError> {
    let now = Utc::now();
    let date = query.date.unwrap_or_else(|| now.date_naive());
    let resolution = resolve(&state.db, client_id, now).await?;
    Ok(Json(resolution.day_status(date)))
}

pub async fn get_month(
    State(state): State<SharedState>,
    Path(client_id): Path<i64>,
    Query(query): Query<MonthQuery>,
) -> Result<Json<Vec<DayStatus>>, ApiError> {
    let resolution = resolve(&state.db, client_id, Utc::now()).await?;
    resolution
        .month(query.year, query.month)
        .map(Json)
        .ok_or_else(|| ApiError::BadRequest(format!("Invalid month: {}-{}", query.year, query.month)))
}
