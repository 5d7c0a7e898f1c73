//! Program Timeline Sequencer
//!
//! A client's program assignments form one contiguous timeline:
//! - each assignment starts the day after its predecessor ends
//! - each assignment lasts exactly `duration_weeks * 7` days (inclusive end)
//! - dates are derived, so every edit recomputes the whole suffix
//!
//! Edits (append, duration change, removal, reorder) run in one transaction
//! and write the rows strictly in sequence order.

use chrono::NaiveDate;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use crate::dates::{day_after, inclusive_end};
use crate::db::begin_write;
use crate::models::{NewAssignment, ProgramAssignment};

/// Ten years. Anything longer is a data-entry mistake.
pub const MAX_DURATION_WEEKS: i64 = 520;

// ---------------------------------------------------------------------------
/// Error Handling
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TimelineError {
    #[error("Duration must be between 1 and {max} weeks (got {0})", max = MAX_DURATION_WEEKS)]
    InvalidDuration(i64),

    #[error("A start date is required for a client's first assignment")]
    MissingStartDate,

    #[error("Assignment dates fall outside the supported calendar range")]
    DateOverflow,

    #[error("Assignment not found: {0}")]
    NotFound(i64),

    #[error("New order must list each of the client's assignments exactly once")]
    InvalidOrder,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

fn validate_duration(weeks: i64) -> Result<(), TimelineError> {
    if (1..=MAX_DURATION_WEEKS).contains(&weeks) {
        Ok(())
    } else {
        Err(TimelineError::InvalidDuration(weeks))
    }
}

// ---------------------------------------------------------------------------
/// Sequencing
// ---------------------------------------------------------------------------

/// Recompute start/end dates for `assignments` in the given order.
///
/// The first assignment starts on `anchor`, or keeps its own start date when
/// no anchor is given. `order_index` is rewritten to match slice position.
/// Nothing is mutated unless every element validates.
pub fn resequence(
    assignments: &mut [ProgramAssignment],
    anchor: Option<NaiveDate>,
) -> Result<(), TimelineError> {
    for assignment in assignments.iter() {
        validate_duration(assignment.duration_weeks)?;
    }

    let Some(first) = assignments.first() else {
        return Ok(());
    };

    let mut ranges = Vec::with_capacity(assignments.len());
    let mut start = anchor.unwrap_or(first.start_date);
    for (i, assignment) in assignments.iter().enumerate() {
        if i > 0 {
            let (_, prev_end) = ranges[i - 1];
            start = day_after(prev_end).ok_or(TimelineError::DateOverflow)?;
        }
        let end = inclusive_end(start, assignment.duration_weeks)
            .ok_or(TimelineError::DateOverflow)?;
        ranges.push((start, end));
    }

    for (i, (assignment, (start, end))) in assignments.iter_mut().zip(ranges).enumerate() {
        assignment.start_date = start;
        assignment.end_date = end;
        assignment.order_index = i as i64;
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Database Operations
// ---------------------------------------------------------------------------

/// Load a client's assignments in timeline order
pub async fn load_timeline(
    conn: &mut SqliteConnection,
    client_id: i64,
) -> Result<Vec<ProgramAssignment>, sqlx::Error> {
    sqlx::query_as::<_, ProgramAssignment>(
        r#"
        SELECT id, client_id, program_id, start_date, end_date,
               duration_weeks, order_index, is_active
        FROM program_assignments
        WHERE client_id = ?
        ORDER BY order_index, id
        "#,
    )
    .bind(client_id)
    .fetch_all(&mut *conn)
    .await
}

pub async fn load_client_timeline(
    pool: &SqlitePool,
    client_id: i64,
) -> Result<Vec<ProgramAssignment>, TimelineError> {
    let mut conn = pool.acquire().await?;
    Ok(load_timeline(&mut conn, client_id).await?)
}

async fn load_assignment(
    conn: &mut SqliteConnection,
    assignment_id: i64,
) -> Result<ProgramAssignment, TimelineError> {
    sqlx::query_as::<_, ProgramAssignment>(
        r#"
        SELECT id, client_id, program_id, start_date, end_date,
               duration_weeks, order_index, is_active
        FROM program_assignments
        WHERE id = ?
        "#,
    )
    .bind(assignment_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(TimelineError::NotFound(assignment_id))
}

/// Write derived dates back, one row at a time in sequence order
async fn persist_timeline(
    conn: &mut SqliteConnection,
    assignments: &[ProgramAssignment],
) -> Result<(), sqlx::Error> {
    for assignment in assignments {
        sqlx::query(
            r#"
            UPDATE program_assignments
            SET start_date = ?, end_date = ?, order_index = ?, duration_weeks = ?
            WHERE id = ?
            "#,
        )
        .bind(assignment.start_date)
        .bind(assignment.end_date)
        .bind(assignment.order_index)
        .bind(assignment.duration_weeks)
        .bind(assignment.id)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Append a program to the end of a client's timeline.
///
/// An empty timeline starts on `new.start_date`; otherwise the new assignment
/// starts the day after the current last one ends and `start_date` is ignored.
pub async fn append_assignment(
    pool: &SqlitePool,
    new: &NewAssignment,
) -> Result<ProgramAssignment, TimelineError> {
    validate_duration(new.duration_weeks)?;

    let mut tx = begin_write(pool).await?;
    let timeline = load_timeline(&mut tx, new.client_id).await?;

    let start = match timeline.last() {
        Some(last) => {
            if new.start_date.is_some() {
                debug!(client_id = new.client_id, "ignoring start date for non-empty timeline");
            }
            day_after(last.end_date).ok_or(TimelineError::DateOverflow)?
        }
        None => new.start_date.ok_or(TimelineError::MissingStartDate)?,
    };
    let end = inclusive_end(start, new.duration_weeks).ok_or(TimelineError::DateOverflow)?;
    let order_index = timeline.len() as i64;

    let id = sqlx::query(
        r#"
        INSERT INTO program_assignments
            (client_id, program_id, start_date, end_date, duration_weeks, order_index, is_active)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(new.client_id)
    .bind(new.program_id)
    .bind(start)
    .bind(end)
    .bind(new.duration_weeks)
    .bind(order_index)
    .bind(new.is_active)
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    tx.commit().await?;

    info!(
        client_id = new.client_id,
        assignment_id = id,
        %start,
        %end,
        "appended program assignment"
    );

    Ok(ProgramAssignment {
        id,
        client_id: new.client_id,
        program_id: new.program_id,
        start_date: start,
        end_date: end,
        duration_weeks: new.duration_weeks,
        order_index,
        is_active: new.is_active,
    })
}

/// Change one assignment's duration and shift everything after it
pub async fn update_duration(
    pool: &SqlitePool,
    assignment_id: i64,
    duration_weeks: i64,
) -> Result<Vec<ProgramAssignment>, TimelineError> {
    validate_duration(duration_weeks)?;

    let mut tx = begin_write(pool).await?;
    let target = load_assignment(&mut tx, assignment_id).await?;
    let mut timeline = load_timeline(&mut tx, target.client_id).await?;

    for assignment in timeline.iter_mut().filter(|a| a.id == assignment_id) {
        assignment.duration_weeks = duration_weeks;
    }
    resequence(&mut timeline, None)?;
    persist_timeline(&mut tx, &timeline).await?;
    tx.commit().await?;

    info!(
        client_id = target.client_id,
        assignment_id,
        duration_weeks,
        "resequenced timeline after duration change"
    );

    Ok(timeline)
}

/// Delete an assignment and close the gap it leaves.
/// The timeline keeps its original first start date.
pub async fn remove_assignment(
    pool: &SqlitePool,
    assignment_id: i64,
) -> Result<Vec<ProgramAssignment>, TimelineError> {
    let mut tx = begin_write(pool).await?;
    let target = load_assignment(&mut tx, assignment_id).await?;
    let mut timeline = load_timeline(&mut tx, target.client_id).await?;
    let anchor = timeline.first().map(|a| a.start_date);

    sqlx::query("DELETE FROM program_assignments WHERE id = ?")
        .bind(assignment_id)
        .execute(&mut *tx)
        .await?;

    timeline.retain(|a| a.id != assignment_id);
    resequence(&mut timeline, anchor)?;
    persist_timeline(&mut tx, &timeline).await?;
    tx.commit().await?;

    info!(
        client_id = target.client_id,
        assignment_id,
        remaining = timeline.len(),
        "removed program assignment"
    );

    Ok(timeline)
}

/// Reorder a client's assignments (drag and drop). `ordered_ids` must be a
/// permutation of the client's assignment ids.
pub async fn reorder_assignments(
    pool: &SqlitePool,
    client_id: i64,
    ordered_ids: &[i64],
) -> Result<Vec<ProgramAssignment>, TimelineError> {
    let mut tx = begin_write(pool).await?;
    let mut current = load_timeline(&mut tx, client_id).await?;
    if ordered_ids.len() != current.len() {
        return Err(TimelineError::InvalidOrder);
    }
    let anchor = current.first().map(|a| a.start_date);

    let mut reordered = Vec::with_capacity(current.len());
    for id in ordered_ids {
        let pos = current
            .iter()
            .position(|a| a.id == *id)
            .ok_or(TimelineError::InvalidOrder)?;
        reordered.push(current.swap_remove(pos));
    }

    resequence(&mut reordered, anchor)?;
    persist_timeline(&mut tx, &reordered).await?;
    tx.commit().await?;

    info!(client_id, count = reordered.len(), "reordered timeline");

    Ok(reordered)
}

/// Toggle whether an assignment feeds the schedule. Several assignments may
/// be active at once; readers merge them.
pub async fn set_assignment_active(
    pool: &SqlitePool,
    assignment_id: i64,
    is_active: bool,
) -> Result<ProgramAssignment, TimelineError> {
    let mut conn = pool.acquire().await?;
    let result = sqlx::query("UPDATE program_assignments SET is_active = ? WHERE id = ?")
        .bind(is_active)
        .bind(assignment_id)
        .execute(&mut *conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(TimelineError::NotFound(assignment_id));
    }

    debug!(assignment_id, is_active, "updated assignment active flag");
    load_assignment(&mut conn, assignment_id).await
}

// ---------------------------------------------------------------------------
/// Tests
// ---------------------------------------------------------------------------
