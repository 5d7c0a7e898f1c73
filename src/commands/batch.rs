//! Scheduler entry point for the daily adherence batch

use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::Json;
use chrono::Utc;
use tracing::warn;

use super::{ApiError, SharedState};
use crate::batch::{run_daily, BatchPolicy, BatchSummary};

/// Byte comparison whose running time does not depend on where the inputs differ
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// An unset or blank configured secret rejects everything
fn authorized(headers: &HeaderMap, secret: &str) -> bool {
    if secret.trim().is_empty() {
        return false;
    }
    let Some(presented) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    else {
        return false;
    };
    constant_time_eq(presented.as_bytes(), secret.as_bytes())
}

pub async fn run_adherence(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<BatchSummary>, ApiError> {
    if !authorized(&headers, &state.config.cron_secret) {
        warn!("rejected adherence trigger");
        return Err(ApiError::Unauthorized);
    }

    let summary = run_daily(&state.db, &BatchPolicy::default(), Utc::now()).await?;
    Ok(Json(summary))
}
