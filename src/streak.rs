//! Workout streak state machine
//!
//! A streak counts consecutive days with a completed workout. The daily batch
//! observes the client's last completed date and moves the stored state:
//! - no completion ever: stays empty
//! - last completion today or yesterday and new since the last run: extend by
//!   the new days when the run of completions reaches the stored date,
//!   otherwise restart at the run's length
//! - anything older: reset to zero, keeping the observed date
//!
//! Re-running for the same observation is a no-op, so repeated batch runs on
//! one day never double-count or re-notify.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};

use crate::dates::days_between;
use crate::models::StreakState;

pub const STREAK_MILESTONES: [i64; 6] = [7, 14, 30, 60, 90, 100];

/// Losing a streak at least this long is worth telling the coach about
pub const LOST_STREAK_NOTIFY_THRESHOLD: i64 = 7;

// ---------------------------------------------------------------------------
/// Phase: where a client's streak currently stands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", content = "days", rename_all = "snake_case")]
pub enum StreakPhase {
    NoHistory,
    Active(i64),
    Broken,
}

impl StreakPhase {
    pub fn of(state: &StreakState) -> Self {
        match (state.last_workout_date, state.current_streak) {
            (None, _) => Self::NoHistory,
            (Some(_), 0) => Self::Broken,
            (Some(_), n) => Self::Active(n),
        }
    }
}

// ---------------------------------------------------------------------------
/// Transitions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreakTransition {
    /// Client has never completed a workout
    NoHistory,
    /// Observation already applied
    Unchanged,
    Extended {
        current: i64,
        /// Highest milestone reached by this step
        milestone: Option<i64>,
        /// A streak separated from this run by a gap was replaced
        broke_previous: Option<i64>,
    },
    Reset {
        previous: i64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreakUpdate {
    pub next: StreakState,
    pub transition: StreakTransition,
}

impl StreakUpdate {
    /// Previous streak length worth a "streak lost" notification, if any
    pub fn lost_streak(&self, threshold: i64) -> Option<i64> {
        let previous = match self.transition {
            StreakTransition::Reset { previous } => previous,
            StreakTransition::Extended {
                broke_previous: Some(previous),
                ..
            } => previous,
            _ => return None,
        };
        (previous >= threshold).then_some(previous)
    }

    pub fn milestone(&self) -> Option<i64> {
        match self.transition {
            StreakTransition::Extended { milestone, .. } => milestone,
            _ => None,
        }
    }
}

/// Consecutive completion days ending at the client's most recent completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionRun {
    pub first: NaiveDate,
    pub last: NaiveDate,
}

impl CompletionRun {
    pub fn single(date: NaiveDate) -> Self {
        Self {
            first: date,
            last: date,
        }
    }

    /// Build from distinct completion dates, newest first
    pub fn from_dates_desc(dates: &[NaiveDate]) -> Option<Self> {
        let (&last, older) = dates.split_first()?;
        let mut first = last;
        for &date in older {
            if days_between(date, first) != 1 {
                break;
            }
            first = date;
        }
        Some(Self { first, last })
    }

    pub fn days(&self) -> i64 {
        days_between(self.first, self.last) + 1
    }

    /// Whether a streak last extended on `date` runs straight into this run
    fn continues_from(&self, date: NaiveDate) -> bool {
        date < self.last && days_between(date, self.first) <= 1
    }
}

/// Apply one observation of the client's latest run of completion days.
///
/// The stored streak continues only when the run reaches back to the stored
/// last workout date, so the result does not depend on which days the batch
/// happened to run.
pub fn advance(
    state: &StreakState,
    observed: Option<CompletionRun>,
    today: NaiveDate,
    milestones: &[i64],
) -> StreakUpdate {
    let Some(run) = observed else {
        return StreakUpdate {
            next: state.clone(),
            transition: StreakTransition::NoHistory,
        };
    };

    let unchanged = StreakUpdate {
        next: state.clone(),
        transition: StreakTransition::Unchanged,
    };
    let phase = StreakPhase::of(state);

    if days_between(run.last, today) <= 1 {
        if state.last_workout_date == Some(run.last) {
            return unchanged;
        }

        let mut next = state.clone();
        let (counted_before, broke_previous) = match (phase, state.last_workout_date) {
            (StreakPhase::Active(n), Some(prev)) if run.continues_from(prev) => {
                next.current_streak = n + days_between(prev, run.last);
                next.streak_start_date = state.streak_start_date.or(Some(prev));
                (n, None)
            }
            (StreakPhase::Active(n), _) => {
                next.current_streak = run.days();
                next.streak_start_date = Some(run.first);
                (0, Some(n))
            }
            (StreakPhase::NoHistory | StreakPhase::Broken, _) => {
                next.current_streak = run.days();
                next.streak_start_date = Some(run.first);
                (0, None)
            }
        };
        next.longest_streak = next.longest_streak.max(next.current_streak);
        next.last_workout_date = Some(run.last);

        let milestone = milestones
            .iter()
            .copied()
            .filter(|m| counted_before < *m && *m <= next.current_streak)
            .max();

        return StreakUpdate {
            transition: StreakTransition::Extended {
                current: next.current_streak,
                milestone,
                broke_previous,
            },
            next,
        };
    }

    // Gap of two days or more
    if phase == StreakPhase::Broken && state.last_workout_date == Some(run.last) {
        return unchanged;
    }

    let mut next = state.clone();
    next.current_streak = 0;
    next.streak_start_date = None;
    next.last_workout_date = Some(run.last);

    StreakUpdate {
        next,
        transition: StreakTransition::Reset {
            previous: state.current_streak,
        },
    }
}

// ---------------------------------------------------------------------------
// Database Operations
// ---------------------------------------------------------------------------

/// Load a client's streak row, creating a zeroed one if absent
pub async fn load_or_create(
    conn: &mut SqliteConnection,
    client_id: i64,
) -> Result<StreakState, sqlx::Error> {
    sqlx::query("INSERT OR IGNORE INTO client_streaks (client_id) VALUES (?)")
        .bind(client_id)
        .execute(&mut *conn)
        .await?;

    sqlx::query_as::<_, StreakState>(
        r#"
        SELECT client_id, current_streak, longest_streak, last_workout_date, streak_start_date
        FROM client_streaks
        WHERE client_id = ?
        "#,
    )
    .bind(client_id)
    .fetch_one(&mut *conn)
    .await
}

/// The run of consecutive completion days ending at the latest completion on
/// or before `today`
pub async fn load_completion_run(
    conn: &mut SqliteConnection,
    client_id: i64,
    today: NaiveDate,
) -> Result<Option<CompletionRun>, sqlx::Error> {
    let dates: Vec<NaiveDate> = sqlx::query_scalar(
        r#"
        SELECT DISTINCT scheduled_date
        FROM workout_completions
        WHERE client_id = ? AND scheduled_date <= ?
        ORDER BY scheduled_date DESC
        "#,
    )
    .bind(client_id)
    .bind(today)
    .fetch_all(&mut *conn)
    .await?;

    Ok(CompletionRun::from_dates_desc(&dates))
}

/// Write `next` only if the row still matches `previous`. Returns false when
/// another run got there first.
pub async fn save_if_unchanged(
    conn: &mut SqliteConnection,
    previous: &StreakState,
    next: &StreakState,
    now: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE client_streaks
        SET current_streak = ?,
            longest_streak = ?,
            last_workout_date = ?,
            streak_start_date = ?,
            updated_at = ?
        WHERE client_id = ?
          AND current_streak = ?
          AND last_workout_date IS ?
        "#,
    )
    .bind(next.current_streak)
    .bind(next.longest_streak)
    .bind(next.last_workout_date)
    .bind(next.streak_start_date)
    .bind(now)
    .bind(previous.client_id)
    .bind(previous.current_streak)
    .bind(previous.last_workout_date)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn load_streak(
    pool: &SqlitePool,
    client_id: i64,
) -> Result<Option<StreakState>, sqlx::Error> {
    sqlx::query_as::<_, StreakState>(
        r#"
        SELECT client_id, current_streak, longest_streak, last_workout_date, streak_start_date
        FROM client_streaks
        WHERE client_id = ?
        "#,
    )
    .bind(client_id)
    .fetch_optional(pool)
    .await
}

// ---------------------------------------------------------------------------
/// Tests
// ---------------------------------------------------------------------------
