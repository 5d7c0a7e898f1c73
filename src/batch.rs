//! Daily Adherence Analytics Batch
//!
//! One run-to-completion pass over active clients:
//! 1. streak state machine + missed-workout check, one transaction per client
//! 2. personal-record detection, one transaction per (client, exercise)
//!
//! Safe to run any number of times per day. Dropping the future aborts only
//! the unit of work in flight (its transaction rolls back); finished units
//! stay committed and the next run picks up where this one stopped.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Serialize, Serializer};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, error, info};

use crate::dates::days_between;
use crate::db::begin_write;
use crate::models::NotificationType;
use crate::notifications::{insert_deduplicated, NewNotification, NotificationError};
use crate::records::{load_recent_sets, record_if_improved};
use crate::streak::{
    self, advance, StreakTransition, LOST_STREAK_NOTIFY_THRESHOLD, STREAK_MILESTONES,
};

// ---------------------------------------------------------------------------
/// Policy
// ---------------------------------------------------------------------------

/// Tunables for a batch run, passed in explicitly
#[derive(Debug, Clone)]
pub struct BatchPolicy {
    /// Days without a completion before a missed-workout notification
    pub missed_workout_threshold_days: i64,
    pub missed_workout_window_days: i64,
    pub streak_lost_window_days: i64,
    pub milestone_window_days: i64,
    pub lost_streak_notify_threshold: i64,
    pub milestones: Vec<i64>,
    /// How far back set logs are scanned for personal records
    pub pr_lookback_days: i64,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            missed_workout_threshold_days: 3,
            missed_workout_window_days: 7,
            streak_lost_window_days: 7,
            milestone_window_days: 7,
            lost_streak_notify_threshold: LOST_STREAK_NOTIFY_THRESHOLD,
            milestones: STREAK_MILESTONES.to_vec(),
            pr_lookback_days: 7,
        }
    }
}

// ---------------------------------------------------------------------------
/// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaysSinceWorkout {
    Days(i64),
    Never,
}

impl DaysSinceWorkout {
    pub fn between(last_completed: Option<NaiveDate>, today: NaiveDate) -> Self {
        match last_completed {
            Some(last) => Self::Days(days_between(last, today).max(0)),
            None => Self::Never,
        }
    }

    pub fn at_least(&self, days: i64) -> bool {
        match self {
            Self::Days(n) => *n >= days,
            Self::Never => true,
        }
    }
}

impl Serialize for DaysSinceWorkout {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Days(n) => serializer.serialize_i64(*n),
            Self::Never => serializer.serialize_str("never"),
        }
    }
}

impl std::fmt::Display for DaysSinceWorkout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Days(n) => write!(f, "{}", n),
            Self::Never => f.write_str("never"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientReport {
    pub client_id: i64,
    pub days_since_workout: DaysSinceWorkout,
    pub streak_updated: bool,
    pub milestone: Option<i64>,
    pub streak_lost: bool,
    pub missed_workout_notified: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub clients_processed: usize,
    pub missed_workout_notifications: usize,
    pub streak_updates: usize,
    pub streak_milestones: usize,
    pub streaks_lost: usize,
    pub prs_detected: usize,
}

impl BatchSummary {
    fn absorb(&mut self, report: &ClientReport) {
        self.clients_processed += 1;
        self.missed_workout_notifications += usize::from(report.missed_workout_notified);
        self.streak_updates += usize::from(report.streak_updated);
        self.streak_milestones += usize::from(report.milestone.is_some());
        self.streaks_lost += usize::from(report.streak_lost);
    }
}

// ---------------------------------------------------------------------------
/// Error Handling
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Notification(#[from] NotificationError),
}

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("Failed while processing client {client_id}: {source}")]
    Client {
        client_id: i64,
        #[source]
        source: StepError,
    },

    #[error("Failed recording personal record for client {client_id}, exercise {exercise_id}: {source}")]
    PersonalRecord {
        client_id: i64,
        exercise_id: i64,
        #[source]
        source: StepError,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

// ---------------------------------------------------------------------------
/// Per-client unit of work
// ---------------------------------------------------------------------------

async fn has_active_assignment(
    conn: &mut SqliteConnection,
    client_id: i64,
) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM program_assignments WHERE client_id = ? AND is_active = 1",
    )
    .bind(client_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(count > 0)
}

/// Streak and missed-workout pass for one client, committed as one unit
pub async fn process_client(
    pool: &SqlitePool,
    policy: &BatchPolicy,
    client_id: i64,
    now: DateTime<Utc>,
) -> Result<ClientReport, StepError> {
    let today = now.date_naive();
    let mut tx = begin_write(pool).await?;

    let completions = streak::load_completion_run(&mut tx, client_id, today).await?;
    let last_completed = completions.map(|run| run.last);
    let days_since_workout = DaysSinceWorkout::between(last_completed, today);

    let mut report = ClientReport {
        client_id,
        days_since_workout,
        streak_updated: false,
        milestone: None,
        streak_lost: false,
        missed_workout_notified: false,
    };

    // Streaks
    let state = streak::load_or_create(&mut tx, client_id).await?;
    let update = advance(&state, completions, today, &policy.milestones);
    let changed = matches!(
        update.transition,
        StreakTransition::Extended { .. } | StreakTransition::Reset { .. }
    );

    if changed && streak::save_if_unchanged(&mut tx, &state, &update.next, now).await? {
        report.streak_updated = true;

        if let Some(milestone) = update.milestone() {
            let notification = NewNotification::new(
                client_id,
                NotificationType::StreakAchieved,
                format!("{}-day streak", milestone),
                format!("Completed a workout {} days in a row", milestone),
            )
            .qualified_by(milestone)
            .with_metadata(serde_json::json!({
                "streak": milestone,
                "longest_streak": update.next.longest_streak,
            }));
            if insert_deduplicated(&mut tx, &notification, policy.milestone_window_days, now).await? {
                report.milestone = Some(milestone);
            }
        }

        if let Some(previous) = update.lost_streak(policy.lost_streak_notify_threshold) {
            let notification = NewNotification::new(
                client_id,
                NotificationType::StreakLost,
                "Streak lost",
                format!("A {}-day workout streak has ended", previous),
            )
            .with_metadata(serde_json::json!({
                "previous_streak": previous,
                "last_workout_date": update.next.last_workout_date,
            }));
            report.streak_lost =
                insert_deduplicated(&mut tx, &notification, policy.streak_lost_window_days, now)
                    .await?;
        }
    }

    // Missed workouts: only clients with something scheduled can miss it
    if has_active_assignment(&mut tx, client_id).await?
        && days_since_workout.at_least(policy.missed_workout_threshold_days)
    {
        let message = match days_since_workout {
            DaysSinceWorkout::Days(n) => format!("No workout completed in {} days", n),
            DaysSinceWorkout::Never => "No workout completed yet".to_string(),
        };
        let notification = NewNotification::new(
            client_id,
            NotificationType::MissedWorkout,
            "Missed workouts",
            message,
        )
        .with_metadata(serde_json::json!({
            "days_since_workout": days_since_workout,
            "last_workout_date": last_completed,
        }));
        report.missed_workout_notified =
            insert_deduplicated(&mut tx, &notification, policy.missed_workout_window_days, now)
                .await?;
    }

    tx.commit().await?;

    debug!(
        client_id,
        days_since_workout = %report.days_since_workout,
        streak_updated = report.streak_updated,
        missed_workout_notified = report.missed_workout_notified,
        "processed client"
    );

    Ok(report)
}

// ---------------------------------------------------------------------------
/// Entry point
// ---------------------------------------------------------------------------

async fn active_clients(pool: &SqlitePool) -> Result<Vec<i64>, sqlx::Error> {
    sqlx::query_scalar("SELECT id FROM clients WHERE is_active = 1 ORDER BY id")
        .fetch_all(pool)
        .await
}

/// Run the daily pass as of `now`. Stops at the first store failure; work
/// committed before it is kept.
pub async fn run_daily(
    pool: &SqlitePool,
    policy: &BatchPolicy,
    now: DateTime<Utc>,
) -> Result<BatchSummary, BatchError> {
    let mut summary = BatchSummary::default();
    let clients = active_clients(pool).await?;

    info!(clients = clients.len(), today = %now.date_naive(), "starting adherence run");

    for client_id in clients {
        let report = process_client(pool, policy, client_id, now)
            .await
            .map_err(|source| {
                error!(client_id, error = %source, "adherence run stopped");
                BatchError::Client { client_id, source }
            })?;
        summary.absorb(&report);
    }

    let since = now - Duration::days(policy.pr_lookback_days);
    let groups = load_recent_sets(pool, since).await?;

    for ((client_id, exercise_id), sets) in groups {
        let detected = async {
            let mut tx = begin_write(pool).await?;
            let outcome = record_if_improved(&mut tx, &sets, now).await?;
            tx.commit().await?;
            Ok::<_, StepError>(outcome)
        }
        .await
        .map_err(|source| {
            error!(client_id, exercise_id, error = %source, "personal record detection stopped");
            BatchError::PersonalRecord {
                client_id,
                exercise_id,
                source,
            }
        })?;

        if let Some(pr) = detected {
            info!(
                client_id,
                exercise_id,
                estimated_1rm = pr.best.estimated_1rm,
                previous_1rm = ?pr.previous_1rm,
                "new personal record"
            );
            summary.prs_detected += 1;
        }
    }

    info!(
        clients_processed = summary.clients_processed,
        missed_workout_notifications = summary.missed_workout_notifications,
        streak_updates = summary.streak_updates,
        streak_milestones = summary.streak_milestones,
        streaks_lost = summary.streaks_lost,
        prs_detected = summary.prs_detected,
        "adherence run complete"
    );

    Ok(summary)
}

// ---------------------------------------------------------------------------
/// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::list_undismissed;
    use crate::streak::load_streak;
    use crate::test_utils::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    async fn count_notifications(pool: &SqlitePool, client_id: i64, kind: NotificationType) -> usize {
        list_undismissed(pool, client_id)
            .await
            .unwrap()
            .iter()
            .filter(|n| n.notification_type == kind)
            .count()
    }

    #[test]
    fn test_days_since_workout_serializes_never() {
        assert_eq!(serde_json::to_value(DaysSinceWorkout::Never).unwrap(), "never");
        assert_eq!(serde_json::to_value(DaysSinceWorkout::Days(4)).unwrap(), 4);
        assert!(DaysSinceWorkout::Never.at_least(3));
        assert!(!DaysSinceWorkout::Days(2).at_least(3));
    }

    #[tokio::test]
    async fn test_client_without_assignments_is_never_and_not_notified() {
        let pool = setup_test_db().await;
        let client_id = seed_client(&pool, "Nia", true).await;
        let policy = BatchPolicy::default();

        let report = process_client(&pool, &policy, client_id, datetime_on(d(2025, 3, 10)))
            .await
            .unwrap();

        assert_eq!(report.days_since_workout, DaysSinceWorkout::Never);
        assert!(!report.missed_workout_notified);
        assert_eq!(
            load_streak(&pool, client_id).await.unwrap(),
            Some(crate::models::StreakState::empty(client_id))
        );
        assert!(list_undismissed(&pool, client_id).await.unwrap().is_empty());

        teardown_test_db(pool).await;
    }

    #[tokio::test]
    async fn test_missed_workout_notified_once_per_window() {
        let pool = setup_test_db().await;
        let client_id = seed_client(&pool, "Nia", true).await;
        let program_id = seed_program(&pool, "Base").await;
        let workout_id = seed_workout(&pool, program_id, "Full Body", Some(1), 1, None).await;
        let assignment =
            seed_assignment(&pool, client_id, program_id, d(2025, 3, 3), 4, 0, true).await;
        seed_completion(&pool, client_id, workout_id, Some(assignment), d(2025, 3, 5)).await;
        let policy = BatchPolicy::default();

        let summary = run_daily(&pool, &policy, datetime_on(d(2025, 3, 9))).await.unwrap();
        assert_eq!(summary.missed_workout_notifications, 1);

        // Same day and the day after: still inside the window
        let again = run_daily(&pool, &policy, datetime_on(d(2025, 3, 9))).await.unwrap();
        assert_eq!(again.missed_workout_notifications, 0);
        let next = run_daily(&pool, &policy, datetime_on(d(2025, 3, 10))).await.unwrap();
        assert_eq!(next.missed_workout_notifications, 0);

        assert_eq!(count_notifications(&pool, client_id, NotificationType::MissedWorkout).await, 1);
        teardown_test_db(pool).await;
    }

    #[tokio::test]
    async fn test_recent_workout_is_not_missed() {
        let pool = setup_test_db().await;
        let client_id = seed_client(&pool, "Nia", true).await;
        let program_id = seed_program(&pool, "Base").await;
        let workout_id = seed_workout(&pool, program_id, "Full Body", Some(1), 1, None).await;
        seed_assignment(&pool, client_id, program_id, d(2025, 3, 3), 4, 0, true).await;
        seed_completion(&pool, client_id, workout_id, None, d(2025, 3, 8)).await;

        let report = process_client(&pool, &BatchPolicy::default(), client_id, datetime_on(d(2025, 3, 10)))
            .await
            .unwrap();
        assert_eq!(report.days_since_workout, DaysSinceWorkout::Days(2));
        assert!(!report.missed_workout_notified);

        teardown_test_db(pool).await;
    }

    #[tokio::test]
    async fn test_streak_reset_notifies_exactly_once() {
        let pool = setup_test_db().await;
        let client_id = seed_client(&pool, "Nia", true).await;
        let program_id = seed_program(&pool, "Base").await;
        let workout_id = seed_workout(&pool, program_id, "Full Body", Some(1), 1, None).await;
        let last = d(2025, 3, 1);
        seed_completion(&pool, client_id, workout_id, None, last).await;
        seed_streak(&pool, client_id, 10, 10, Some(last)).await;
        let policy = BatchPolicy::default();

        let summary = run_daily(&pool, &policy, datetime_on(d(2025, 3, 4))).await.unwrap();
        assert_eq!(summary.streaks_lost, 1);
        assert_eq!(summary.streak_updates, 1);

        let state = load_streak(&pool, client_id).await.unwrap().unwrap();
        assert_eq!(state.current_streak, 0);
        assert_eq!(state.longest_streak, 10);
        assert_eq!(state.last_workout_date, Some(last));

        let rerun = run_daily(&pool, &policy, datetime_on(d(2025, 3, 4))).await.unwrap();
        assert_eq!(rerun.streaks_lost, 0);
        assert_eq!(rerun.streak_updates, 0);
        assert_eq!(count_notifications(&pool, client_id, NotificationType::StreakLost).await, 1);

        teardown_test_db(pool).await;
    }

    #[tokio::test]
    async fn test_streak_milestone_over_consecutive_days() {
        let pool = setup_test_db().await;
        let client_id = seed_client(&pool, "Nia", true).await;
        let program_id = seed_program(&pool, "Base").await;
        let workout_id = seed_workout(&pool, program_id, "Full Body", Some(1), 1, None).await;
        let policy = BatchPolicy::default();

        let mut milestones = 0;
        let mut longest_seen = 0;
        for day in 1..=8 {
            let date = d(2025, 3, day);
            seed_completion(&pool, client_id, workout_id, None, date).await;
            let summary = run_daily(&pool, &policy, datetime_on(date)).await.unwrap();
            // Second run on the same day changes nothing
            let rerun = run_daily(&pool, &policy, datetime_on(date)).await.unwrap();
            assert_eq!(rerun.streak_updates, 0);
            milestones += summary.streak_milestones;

            let state = load_streak(&pool, client_id).await.unwrap().unwrap();
            assert!(state.longest_streak >= longest_seen);
            longest_seen = state.longest_streak;
        }

        let state = load_streak(&pool, client_id).await.unwrap().unwrap();
        assert_eq!(state.current_streak, 8);
        assert_eq!(state.streak_start_date, Some(d(2025, 3, 1)));
        assert_eq!(milestones, 1);
        assert_eq!(count_notifications(&pool, client_id, NotificationType::StreakAchieved).await, 1);

        teardown_test_db(pool).await;
    }

    #[tokio::test]
    async fn test_pr_detected_once_across_runs() {
        let pool = setup_test_db().await;
        let client_id = seed_client(&pool, "Nia", true).await;
        let program_id = seed_program(&pool, "Strength").await;
        let workout_id = seed_workout(&pool, program_id, "Bench Day", Some(2), 1, None).await;
        let exercise_id = seed_exercise(&pool, "Bench Press").await;
        let we_id = seed_workout_exercise(&pool, workout_id, exercise_id).await;
        let completion_id = seed_completion(&pool, client_id, workout_id, None, d(2025, 3, 9)).await;
        let now = datetime_on(d(2025, 3, 10));
        seed_set_log(&pool, completion_id, we_id, 80.0, 8, now - Duration::days(1)).await;

        let first = run_daily(&pool, &BatchPolicy::default(), now).await.unwrap();
        let second = run_daily(&pool, &BatchPolicy::default(), now).await.unwrap();

        assert_eq!(first.prs_detected, 1);
        assert_eq!(second.prs_detected, 0);
        assert_eq!(count_notifications(&pool, client_id, NotificationType::NewPr).await, 1);

        teardown_test_db(pool).await;
    }

    #[tokio::test]
    async fn test_streak_survives_a_skipped_batch_day() {
        let pool = setup_test_db().await;
        let client_id = seed_client(&pool, "Nia", true).await;
        let program_id = seed_program(&pool, "Base").await;
        let workout_id = seed_workout(&pool, program_id, "Full Body", Some(1), 1, None).await;
        for day in 1..=10 {
            seed_completion(&pool, client_id, workout_id, None, d(2025, 3, day)).await;
        }
        // Last run saw 03-08; nothing ran on 03-09
        seed_streak(&pool, client_id, 9, 9, Some(d(2025, 3, 8))).await;

        let summary = run_daily(&pool, &BatchPolicy::default(), datetime_on(d(2025, 3, 10)))
            .await
            .unwrap();
        assert_eq!(summary.streak_updates, 1);
        assert_eq!(summary.streaks_lost, 0);

        let state = load_streak(&pool, client_id).await.unwrap().unwrap();
        assert_eq!(state.current_streak, 11);
        assert_eq!(state.longest_streak, 11);
        assert_eq!(state.last_workout_date, Some(d(2025, 3, 10)));
        assert_eq!(count_notifications(&pool, client_id, NotificationType::StreakLost).await, 0);

        teardown_test_db(pool).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_overlapping_runs_both_succeed() {
        let (pool, _file) = setup_file_test_db().await;
        let program_id = seed_program(&pool, "Base").await;
        let workout_id = seed_workout(&pool, program_id, "Full Body", Some(1), 1, None).await;
        let mut clients = Vec::new();
        for name in ["Ada", "Bo", "Cy", "Dee"] {
            let client_id = seed_client(&pool, name, true).await;
            seed_assignment(&pool, client_id, program_id, d(2025, 3, 3), 4, 0, true).await;
            seed_completion(&pool, client_id, workout_id, None, d(2025, 3, 4)).await;
            clients.push(client_id);
        }
        let policy = BatchPolicy::default();
        let now = datetime_on(d(2025, 3, 10));

        let (a, b) = tokio::join!(
            tokio::spawn({
                let pool = pool.clone();
                let policy = policy.clone();
                async move { run_daily(&pool, &policy, now).await }
            }),
            tokio::spawn({
                let pool = pool.clone();
                let policy = policy.clone();
                async move { run_daily(&pool, &policy, now).await }
            }),
        );
        let a = a.unwrap().unwrap();
        let b = b.unwrap().unwrap();

        assert_eq!(a.clients_processed, 4);
        assert_eq!(b.clients_processed, 4);
        assert_eq!(a.missed_workout_notifications + b.missed_workout_notifications, 4);
        assert_eq!(a.streak_updates + b.streak_updates, 4);
        for client_id in clients {
            assert_eq!(count_notifications(&pool, client_id, NotificationType::MissedWorkout).await, 1);
        }

        teardown_test_db(pool).await;
    }

    #[tokio::test]
    async fn test_store_failure_names_client_and_keeps_earlier_work() {
        let pool = setup_test_db().await;
        let program_id = seed_program(&pool, "Base").await;
        let workout_id = seed_workout(&pool, program_id, "Full Body", Some(1), 1, None).await;
        let first = seed_client(&pool, "Ada", true).await;
        let second = seed_client(&pool, "Bo", true).await;
        let today = d(2025, 3, 10);
        seed_completion(&pool, first, workout_id, None, today).await;
        seed_completion(&pool, second, workout_id, None, today).await;

        sqlx::query(
            r#"
            CREATE TRIGGER reject_streak_write BEFORE UPDATE ON client_streaks
            WHEN NEW.client_id = (SELECT id FROM clients WHERE name = 'Bo')
            BEGIN
                SELECT RAISE(ABORT, 'streak store unavailable');
            END
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        match run_daily(&pool, &BatchPolicy::default(), datetime_on(today)).await {
            Err(BatchError::Client { client_id, .. }) => assert_eq!(client_id, second),
            other => panic!("expected a client failure, got {:?}", other),
        }

        let committed = load_streak(&pool, first).await.unwrap().unwrap();
        assert_eq!(committed.current_streak, 1);
        assert_eq!(committed.last_workout_date, Some(today));
        // The failing client's unit rolled back, including its created row
        assert_eq!(load_streak(&pool, second).await.unwrap(), None);

        teardown_test_db(pool).await;
    }

    #[tokio::test]
    async fn test_inactive_clients_are_skipped() {
        let pool = setup_test_db().await;
        seed_client(&pool, "Former", false).await;

        let summary = run_daily(&pool, &BatchPolicy::default(), datetime_on(d(2025, 3, 10)))
            .await
            .unwrap();
        assert_eq!(summary, BatchSummary::default());

        teardown_test_db(pool).await;
    }
}
