//! Personal record detection
//!
//! Estimated one-rep max uses the Epley formula, `weight * (1 + reps / 30)`,
//! with a single rep counting as the weight itself. The same estimate backs
//! "best set of a session" and PR detection so both report the same number.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};

use crate::models::{NotificationType, PersonalRecord, SetLogEntry};
use crate::notifications::{insert_notification, NewNotification, NotificationError};

/// Estimated 1RM rounded to 0.1, or None for sets that carry no load
pub fn estimate_one_rep_max(weight: f64, reps: i64) -> Option<f64> {
    if !(weight > 0.0) || reps <= 0 {
        return None;
    }
    let estimate = if reps == 1 {
        weight
    } else {
        weight * (1.0 + reps as f64 / 30.0)
    };
    Some(round_tenth(estimate))
}

fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestSet {
    pub weight: f64,
    pub reps: i64,
    pub estimated_1rm: f64,
    pub logged_at: DateTime<Utc>,
}

/// Highest-estimate set; ties go to the heavier weight, then the earlier set
pub fn best_set<'a>(sets: impl IntoIterator<Item = &'a SetLogEntry>) -> Option<BestSet> {
    let mut best: Option<BestSet> = None;
    for set in sets {
        let (Some(weight), Some(reps)) = (set.weight, set.reps_completed) else {
            continue;
        };
        let Some(estimate) = estimate_one_rep_max(weight, reps) else {
            continue;
        };
        let better = best.as_ref().is_none_or(|b| {
            estimate > b.estimated_1rm || (estimate == b.estimated_1rm && weight > b.weight)
        });
        if better {
            best = Some(BestSet {
                weight,
                reps,
                estimated_1rm: estimate,
                logged_at: set.logged_at,
            });
        }
    }
    best
}

/// A set log joined to the client who did it and the exercise performed
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ClientSetLog {
    pub client_id: i64,
    pub exercise_id: i64,
    pub exercise_name: String,
    #[sqlx(flatten)]
    pub set: SetLogEntry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrOutcome {
    pub client_id: i64,
    pub exercise_id: i64,
    pub exercise_name: String,
    pub best: BestSet,
    pub previous_1rm: Option<f64>,
}

impl PrOutcome {
    pub fn improvement(&self) -> Option<f64> {
        self.previous_1rm
            .map(|prev| round_tenth(self.best.estimated_1rm - prev))
    }

    fn notification(&self) -> NewNotification {
        let message = match self.improvement() {
            Some(delta) => format!(
                "{}: {} x {} (est. 1RM {:.1}, +{:.1})",
                self.exercise_name, self.best.weight, self.best.reps, self.best.estimated_1rm, delta
            ),
            None => format!(
                "{}: {} x {} (est. 1RM {:.1})",
                self.exercise_name, self.best.weight, self.best.reps, self.best.estimated_1rm
            ),
        };
        NewNotification::new(
            self.client_id,
            NotificationType::NewPr,
            format!("New PR: {}", self.exercise_name),
            message,
        )
        .qualified_by(self.exercise_id)
        .with_metadata(serde_json::json!({
            "exercise_id": self.exercise_id,
            "exercise_name": self.exercise_name,
            "weight": self.best.weight,
            "reps": self.best.reps,
            "estimated_1rm": self.best.estimated_1rm,
            "previous_1rm": self.previous_1rm,
            "improvement": self.improvement(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Database Operations
// ---------------------------------------------------------------------------

/// Set logs since `since` for active clients, grouped per (client, exercise)
pub async fn load_recent_sets(
    pool: &SqlitePool,
    since: DateTime<Utc>,
) -> Result<BTreeMap<(i64, i64), Vec<ClientSetLog>>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ClientSetLog>(
        r#"
        SELECT sl.id, sl.completion_id, sl.workout_exercise_id, sl.set_number,
               sl.weight, sl.reps_completed, sl.logged_at,
               wc.client_id, we.exercise_id, e.name AS exercise_name
        FROM set_logs sl
        JOIN workout_completions wc ON wc.id = sl.completion_id
        JOIN clients c ON c.id = wc.client_id AND c.is_active = 1
        JOIN workout_exercises we ON we.id = sl.workout_exercise_id
        JOIN exercises e ON e.id = we.exercise_id
        WHERE sl.logged_at >= ?
        ORDER BY wc.client_id, we.exercise_id, sl.logged_at, sl.id
        "#,
    )
    .bind(since)
    .fetch_all(pool)
    .await?;

    let mut grouped: BTreeMap<(i64, i64), Vec<ClientSetLog>> = BTreeMap::new();
    for row in rows {
        grouped
            .entry((row.client_id, row.exercise_id))
            .or_default()
            .push(row);
    }
    Ok(grouped)
}

async fn load_record(
    conn: &mut SqliteConnection,
    client_id: i64,
    exercise_id: i64,
) -> Result<Option<PersonalRecord>, sqlx::Error> {
    sqlx::query_as::<_, PersonalRecord>(
        r#"
        SELECT id, client_id, exercise_id, weight, reps, estimated_1rm, achieved_at
        FROM personal_records
        WHERE client_id = ? AND exercise_id = ?
        "#,
    )
    .bind(client_id)
    .bind(exercise_id)
    .fetch_optional(&mut *conn)
    .await
}

/// Upsert only when the estimate strictly beats the stored one
async fn upsert_if_improved(
    conn: &mut SqliteConnection,
    client_id: i64,
    exercise_id: i64,
    best: &BestSet,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO personal_records
            (client_id, exercise_id, weight, reps, estimated_1rm, achieved_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(client_id, exercise_id) DO UPDATE SET
            weight = excluded.weight,
            reps = excluded.reps,
            estimated_1rm = excluded.estimated_1rm,
            achieved_at = excluded.achieved_at
        WHERE excluded.estimated_1rm > personal_records.estimated_1rm
        "#,
    )
    .bind(client_id)
    .bind(exercise_id)
    .bind(best.weight)
    .bind(best.reps)
    .bind(best.estimated_1rm)
    .bind(best.logged_at)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Compare a (client, exercise) group's best set with the stored record and,
/// if it is better, write the record and its `new_pr` notification.
/// Callers run this inside a transaction so both writes land together.
pub async fn record_if_improved(
    conn: &mut SqliteConnection,
    sets: &[ClientSetLog],
    now: DateTime<Utc>,
) -> Result<Option<PrOutcome>, NotificationError> {
    let Some(first) = sets.first() else {
        return Ok(None);
    };
    let Some(best) = best_set(sets.iter().map(|s| &s.set)) else {
        return Ok(None);
    };

    let previous = load_record(conn, first.client_id, first.exercise_id).await?;
    if previous
        .as_ref()
        .is_some_and(|p| best.estimated_1rm <= p.estimated_1rm)
    {
        return Ok(None);
    }

    if !upsert_if_improved(conn, first.client_id, first.exercise_id, &best).await? {
        return Ok(None);
    }

    let outcome = PrOutcome {
        client_id: first.client_id,
        exercise_id: first.exercise_id,
        exercise_name: first.exercise_name.clone(),
        best,
        previous_1rm: previous.map(|p| p.estimated_1rm),
    };
    insert_notification(conn, &outcome.notification(), now).await?;

    Ok(Some(outcome))
}

pub async fn list_records(
    pool: &SqlitePool,
    client_id: i64,
) -> Result<Vec<PersonalRecord>, sqlx::Error> {
    sqlx::query_as::<_, PersonalRecord>(
        r#"
        SELECT id, client_id, exercise_id, weight, reps, estimated_1rm, achieved_at
        FROM personal_records
        WHERE client_id = ?
        ORDER BY exercise_id
        "#,
    )
    .bind(client_id)
    .fetch_all(pool)
    .await
}

// ---------------------------------------------------------------------------
/// Tests
// ---------------------------------------------------------------------------
