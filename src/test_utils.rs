//! Test utilities and helpers for integration and unit testing
//!
//! This module provides common test infrastructure including:
//! - Database setup/teardown
//! - Seed helpers for the catalogue, timeline and activity tables
//! - Helper assertions

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::SqlitePool;
use tempfile::NamedTempFile;

use crate::dates::inclusive_end;

/// ---------------------------------------------------------------------------
/// Database Test Utilities
/// ---------------------------------------------------------------------------

/// Create an in-memory SQLite database for testing
/// Runs all migrations and returns a ready-to-use pool
///
/// Uses max_connections(1) to prevent multiple pool connections from creating
/// isolated in-memory databases, which would cause intermittent test failures
pub async fn setup_test_db() -> SqlitePool {
  let pool = sqlx::sqlite::SqlitePoolOptions::new()
    .max_connections(1)
    .connect("sqlite::memory:")
    .await
    .expect("Failed to create in-memory database");

  sqlx::migrate!("./migrations")
    .run(&pool)
    .await
    .expect("Failed to run migrations");

  pool
}

/// File-backed database with the production pool settings, for tests that
/// need several connections writing at once
///
/// Keep the returned file alive for as long as the pool is used
pub async fn setup_file_test_db() -> (SqlitePool, NamedTempFile) {
  let file = NamedTempFile::new().expect("Failed to create database file");
  let url = format!("sqlite://{}?mode=rwc", file.path().display());

  let pool = crate::db::initialize_db(&url)
    .await
    .expect("Failed to open file database");

  (pool, file)
}

/// Close a test database pool
pub async fn teardown_test_db(pool: SqlitePool) {
  pool.close().await;
}

/// ---------------------------------------------------------------------------
/// Catalogue
/// ---------------------------------------------------------------------------

pub async fn seed_client(pool: &SqlitePool, name: &str, is_active: bool) -> i64 {
  sqlx::query("INSERT INTO clients (name, is_active) VALUES (?, ?)")
    .bind(name)
    .bind(is_active)
    .execute(pool)
    .await
    .expect("Failed to seed client")
    .last_insert_rowid()
}

pub async fn seed_program(pool: &SqlitePool, name: &str) -> i64 {
  sqlx::query("INSERT INTO programs (name) VALUES (?)")
    .bind(name)
    .execute(pool)
    .await
    .expect("Failed to seed program")
    .last_insert_rowid()
}

/// `day_of_week` is Sunday-based; `parent` makes it a nested (non-top-level) workout
pub async fn seed_workout(
  pool: &SqlitePool,
  program_id: i64,
  name: &str,
  day_of_week: Option<i64>,
  week_number: i64,
  parent: Option<i64>,
) -> i64 {
  sqlx::query(
    r#"
    INSERT INTO workouts (program_id, name, day_of_week, week_number, parent_workout_id)
    VALUES (?, ?, ?, ?, ?)
    "#,
  )
  .bind(program_id)
  .bind(name)
  .bind(day_of_week)
  .bind(week_number)
  .bind(parent)
  .execute(pool)
  .await
  .expect("Failed to seed workout")
  .last_insert_rowid()
}

pub async fn seed_exercise(pool: &SqlitePool, name: &str) -> i64 {
  sqlx::query("INSERT INTO exercises (name) VALUES (?)")
    .bind(name)
    .execute(pool)
    .await
    .expect("Failed to seed exercise")
    .last_insert_rowid()
}

pub async fn seed_workout_exercise(pool: &SqlitePool, workout_id: i64, exercise_id: i64) -> i64 {
  sqlx::query("INSERT INTO workout_exercises (workout_id, exercise_id) VALUES (?, ?)")
    .bind(workout_id)
    .bind(exercise_id)
    .execute(pool)
    .await
    .expect("Failed to seed workout exercise")
    .last_insert_rowid()
}

/// ---------------------------------------------------------------------------
/// Timeline and activity
/// ---------------------------------------------------------------------------

/// Insert an assignment row directly, with the end date derived from the start
pub async fn seed_assignment(
  pool: &SqlitePool,
  client_id: i64,
  program_id: i64,
  start_date: NaiveDate,
  duration_weeks: i64,
  order_index: i64,
  is_active: bool,
) -> i64 {
  let end_date = inclusive_end(start_date, duration_weeks).expect("Invalid seed duration");

  sqlx::query(
    r#"
    INSERT INTO program_assignments
      (client_id, program_id, start_date, end_date, duration_weeks, order_index, is_active)
    VALUES (?, ?, ?, ?, ?, ?, ?)
    "#,
  )
  .bind(client_id)
  .bind(program_id)
  .bind(start_date)
  .bind(end_date)
  .bind(duration_weeks)
  .bind(order_index)
  .bind(is_active)
  .execute(pool)
  .await
  .expect("Failed to seed assignment")
  .last_insert_rowid()
}

/// Completion for `scheduled_date`, completed at noon that day
pub async fn seed_completion(
  pool: &SqlitePool,
  client_id: i64,
  workout_id: i64,
  assignment_id: Option<i64>,
  scheduled_date: NaiveDate,
) -> i64 {
  sqlx::query(
    r#"
    INSERT INTO workout_completions
      (client_id, workout_id, assignment_id, scheduled_date, completed_at)
    VALUES (?, ?, ?, ?, ?)
    "#,
  )
  .bind(client_id)
  .bind(workout_id)
  .bind(assignment_id)
  .bind(scheduled_date)
  .bind(datetime_on(scheduled_date))
  .execute(pool)
  .await
  .expect("Failed to seed completion")
  .last_insert_rowid()
}

pub async fn seed_set_log(
  pool: &SqlitePool,
  completion_id: i64,
  workout_exercise_id: i64,
  weight: f64,
  reps: i64,
  logged_at: DateTime<Utc>,
) -> i64 {
  sqlx::query(
    r#"
    INSERT INTO set_logs (completion_id, workout_exercise_id, weight, reps_completed, logged_at)
    VALUES (?, ?, ?, ?, ?)
    "#,
  )
  .bind(completion_id)
  .bind(workout_exercise_id)
  .bind(weight)
  .bind(reps)
  .bind(logged_at)
  .execute(pool)
  .await
  .expect("Failed to seed set log")
  .last_insert_rowid()
}

/// ---------------------------------------------------------------------------
/// Analytics state
/// ---------------------------------------------------------------------------

pub async fn seed_personal_record(
  pool: &SqlitePool,
  client_id: i64,
  exercise_id: i64,
  weight: f64,
  reps: i64,
  estimated_1rm: f64,
) -> i64 {
  sqlx::query(
    r#"
    INSERT INTO personal_records (client_id, exercise_id, weight, reps, estimated_1rm, achieved_at)
    VALUES (?, ?, ?, ?, ?, ?)
    "#,
  )
  .bind(client_id)
  .bind(exercise_id)
  .bind(weight)
  .bind(reps)
  .bind(estimated_1rm)
  .bind(datetime_on(NaiveDate::from_ymd_opt(2025, 1, 1).expect("valid date")))
  .execute(pool)
  .await
  .expect("Failed to seed personal record")
  .last_insert_rowid()
}

pub async fn seed_streak(
  pool: &SqlitePool,
  client_id: i64,
  current_streak: i64,
  longest_streak: i64,
  last_workout_date: Option<NaiveDate>,
) {
  let start = last_workout_date
    .filter(|_| current_streak > 0)
    .and_then(|last| last.checked_sub_days(chrono::Days::new((current_streak - 1) as u64)));

  sqlx::query(
    r#"
    INSERT INTO client_streaks
      (client_id, current_streak, longest_streak, last_workout_date, streak_start_date)
    VALUES (?, ?, ?, ?, ?)
    "#,
  )
  .bind(client_id)
  .bind(current_streak)
  .bind(longest_streak)
  .bind(last_workout_date)
  .bind(start)
  .execute(pool)
  .await
  .expect("Failed to seed streak");
}

/// ---------------------------------------------------------------------------
/// Time Helpers
/// ---------------------------------------------------------------------------

/// Noon UTC on the given date
pub fn datetime_on(date: NaiveDate) -> DateTime<Utc> {
  date.and_time(NaiveTime::from_hms_opt(12, 0, 0).expect("valid time")).and_utc()
}

/// ---------------------------------------------------------------------------
/// Test Macros
/// ---------------------------------------------------------------------------

/// Assert two floats are approximately equal within a tolerance
#[macro_export]
macro_rules! assert_approx_eq {
  ($left:expr, $right:expr, $tolerance:expr) => {
    let diff = ($left - $right).abs();
    assert!(
      diff < $tolerance,
      "Values not approximately equal: {} vs {} (diff: {}, tolerance: {})",
      $left,
      $right,
      diff,
      $tolerance
    );
  };
}

/// ---------------------------------------------------------------------------
/// Tests for Test Utilities
/// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_setup_db_creates_schema() {
    let pool = setup_test_db().await;

    let tables: Vec<(String,)> = sqlx::query_as(
      "SELECT name FROM sqlite_master WHERE type='table' AND name IN ('program_assignments', 'client_streaks', 'notifications')"
    )
    .fetch_all(&pool)
    .await
    .expect("Failed to query tables");

    assert_eq!(tables.len(), 3, "Expected 3 tables, got {}", tables.len());

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_seed_assignment_derives_end_date() {
    let pool = setup_test_db().await;
    let client_id = seed_client(&pool, "Sam", true).await;
    let program_id = seed_program(&pool, "Base").await;
    let start = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap();

    let id = seed_assignment(&pool, client_id, program_id, start, 2, 0, true).await;

    let end: NaiveDate = sqlx::query_scalar("SELECT end_date FROM program_assignments WHERE id = ?")
      .bind(id)
      .fetch_one(&pool)
      .await
      .expect("Failed to read assignment");
    assert_eq!(end, NaiveDate::from_ymd_opt(2025, 1, 19).unwrap());

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_file_db_allows_several_connections() {
    let (pool, _file) = setup_file_test_db().await;
    seed_client(&pool, "Sam", true).await;

    let mut first = pool.acquire().await.unwrap();
    let mut second = pool.acquire().await.unwrap();
    for conn in [&mut first, &mut second] {
      let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM clients")
        .fetch_one(&mut **conn)
        .await
        .unwrap();
      assert_eq!(count, 1);
    }
    drop((first, second));

    teardown_test_db(pool).await;
  }

  #[test]
  fn test_datetime_on_is_noon_utc() {
    let date = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
    let dt = datetime_on(date);
    assert_eq!(dt.date_naive(), date);
    assert_eq!(dt.to_rfc3339(), "2025-03-10T12:00:00+00:00");
  }
}
