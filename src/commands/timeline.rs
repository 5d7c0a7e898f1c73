//! Timeline edits. Every write returns the resequenced state so the admin
//! view never has to recompute dates itself.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::NaiveDate;
use serde::Deserialize;

use super::{ApiError, SharedState};
use crate::models::{NewAssignment, ProgramAssignment};
use crate::timeline::{
    append_assignment, load_client_timeline, remove_assignment, reorder_assignments,
    set_assignment_active, update_duration,
};

#[derive(Debug, Deserialize)]
pub struct AssignmentRequest {
    pub program_id: i64,
    pub duration_weeks: i64,
    /// Only used for a client's first assignment
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub is_active: bool,
}

#[derive(Debug, Deserialize)]
pub struct DurationRequest {
    pub duration_weeks: i64,
}

#[derive(Debug, Deserialize)]
pub struct ActiveRequest {
    pub is_active: bool,
}

#[derive(Debug, Deserialize)]
pub struct OrderRequest {
    pub assignment_ids: Vec<i64>,
}

pub async fn get_timeline(
    State(state): State<SharedState>,
    Path(client_id): Path<i64>,
) -> Result<Json<Vec<ProgramAssignment>>, ApiError> {
    Ok(Json(load_client_timeline(&state.db, client_id).await?))
}

pub async fn create_assignment(
    State(state): State<SharedState>,
    Path(client_id): Path<i64>,
    Json(request): Json<AssignmentRequest>,
) -> Result<(StatusCode, Json<ProgramAssignment>), ApiError> {
    let new = NewAssignment {
        client_id,
        program_id: request.program_id,
        duration_weeks: request.duration_weeks,
        start_date: request.start_date,
        is_active: request.is_active,
    };
    let created = append_assignment(&state.db, &new).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn change_duration(
    State(state): State<SharedState>,
    Path(assignment_id): Path<i64>,
    Json(request): Json<DurationRequest>,
) -> Result<Json<Vec<ProgramAssignment>>, ApiError> {
    Ok(Json(
        update_duration(&state.db, assignment_id, request.duration_weeks).await?,
    ))
}

pub async fn change_active(
    State(state): State<SharedState>,
    Path(assignment_id): Path<i64>,
    Json(request): Json<ActiveRequest>,
) -> Result<Json<ProgramAssignment>, ApiError> {
    Ok(Json(
        set_assignment_active(&state.db, assignment_id, request.is_active).await?,
    ))
}

pub async fn delete_assignment(
    State(state): State<SharedState>,
    Path(assignment_id): Path<i64>,
) -> Result<Json<Vec<ProgramAssignment>>, ApiError> {
    Ok(Json(remove_assignment(&state.db, assignment_id).await?))
}

pub async fn reorder(
    State(state): State<SharedState>,
    Path(client_id): Path<i64>,
    Json(request): Json<OrderRequest>,
) -> Result<Json<Vec<ProgramAssignment>>, ApiError> {
    Ok(Json(
        reorder_assignments(&state.db, client_id, &request.assignment_ids).await?,
    ))
}
