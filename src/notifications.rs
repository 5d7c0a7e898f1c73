//! Admin-facing notification sink
//!
//! Deduplicated inserts are one `INSERT ... SELECT ... WHERE NOT EXISTS`
//! statement. SQLite takes the write lock before evaluating the subquery, so
//! two concurrent batch runs cannot both pass the check.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::models::{Notification, NotificationType};

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
  #[error("Database error: {0}")]
  Database(#[from] sqlx::Error),

  #[error("Invalid notification row: {0}")]
  InvalidRow(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNotification {
  pub client_id: i64,
  pub notification_type: NotificationType,
  /// Notifications sharing a key suppress each other inside the window
  pub dedup_key: String,
  pub title: String,
  pub message: String,
  pub metadata: serde_json::Value,
}

impl NewNotification {
  pub fn new(
    client_id: i64,
    notification_type: NotificationType,
    title: impl Into<String>,
    message: impl Into<String>,
  ) -> Self {
    Self {
      client_id,
      notification_type,
      dedup_key: notification_type.as_str().to_string(),
      title: title.into(),
      message: message.into(),
      metadata: serde_json::json!({}),
    }
  }

  /// Narrow the dedup key, e.g. per milestone or per exercise
  pub fn qualified_by(mut self, qualifier: impl std::fmt::Display) -> Self {
    self.dedup_key = format!("{}:{}", self.notification_type, qualifier);
    self
  }

  pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
    self.metadata = metadata;
    self
  }
}

/// Insert unless an undismissed notification with the same client and dedup
/// key was created in the trailing `window_days`. Returns whether a row was
/// written.
pub async fn insert_deduplicated(
  conn: &mut SqliteConnection,
  notification: &NewNotification,
  window_days: i64,
  now: DateTime<Utc>,
) -> Result<bool, NotificationError> {
  let window_start = now - Duration::days(window_days);

  let result = sqlx::query(
    r#"
    INSERT INTO notifications
      (client_id, notification_type, dedup_key, title, message, metadata_json, dismissed, created_at)
    SELECT ?1, ?2, ?3, ?4, ?5, ?6, 0, ?7
    WHERE NOT EXISTS (
      SELECT 1 FROM notifications
      WHERE client_id = ?1
        AND dedup_key = ?3
        AND dismissed = 0
        AND created_at >= ?8
    )
    "#,
  )
  .bind(notification.client_id)
  .bind(notification.notification_type.as_str())
  .bind(&notification.dedup_key)
  .bind(&notification.title)
  .bind(&notification.message)
  .bind(notification.metadata.to_string())
  .bind(now)
  .bind(window_start)
  .execute(&mut *conn)
  .await?;

  Ok(result.rows_affected() == 1)
}

/// Unconditional insert, for callers whose own write already guarantees
/// exactly-once (e.g. a personal record that only upserts on improvement)
pub async fn insert_notification(
  conn: &mut SqliteConnection,
  notification: &NewNotification,
  now: DateTime<Utc>,
) -> Result<i64, NotificationError> {
  let result = sqlx::query(
    r#"
    INSERT INTO notifications
      (client_id, notification_type, dedup_key, title, message, metadata_json, dismissed, created_at)
    VALUES (?, ?, ?, ?, ?, ?, 0, ?)
    "#,
  )
  .bind(notification.client_id)
  .bind(notification.notification_type.as_str())
  .bind(&notification.dedup_key)
  .bind(&notification.title)
  .bind(&notification.message)
  .bind(notification.metadata.to_string())
  .bind(now)
  .execute(&mut *conn)
  .await?;

  Ok(result.last_insert_rowid())
}

fn notification_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Notification, NotificationError> {
  let type_str: String = row.try_get("notification_type")?;
  let metadata_json: String = row.try_get("metadata_json")?;

  Ok(Notification {
    id: row.try_get("id")?,
    client_id: row.try_get("client_id")?,
    notification_type: type_str.parse().map_err(NotificationError::InvalidRow)?,
    dedup_key: row.try_get("dedup_key")?,
    title: row.try_get("title")?,
    message: row.try_get("message")?,
    metadata: serde_json::from_str(&metadata_json)
      .map_err(|e| NotificationError::InvalidRow(format!("metadata: {}", e)))?,
    dismissed: row.try_get("dismissed")?,
    created_at: row.try_get("created_at")?,
  })
}

/// Undismissed notifications for a client, newest first
pub async fn list_undismissed(
  pool: &SqlitePool,
  client_id: i64,
) -> Result<Vec<Notification>, NotificationError> {
  let rows = sqlx::query(
    r#"
    SELECT id, client_id, notification_type, dedup_key, title, message,
           metadata_json, dismissed, created_at
    FROM notifications
    WHERE client_id = ? AND dismissed = 0
    ORDER BY created_at DESC, id DESC
    "#,
  )
  .bind(client_id)
  .fetch_all(pool)
  .await?;

  rows.iter().map(notification_from_row).collect()
}

/// Returns false when no such notification exists
pub async fn dismiss(pool: &SqlitePool, notification_id: i64) -> Result<bool, NotificationError> {
  let result = sqlx::query("UPDATE notifications SET dismissed = 1 WHERE id = ?")
    .bind(notification_id)
    .execute(pool)
    .await?;
  Ok(result.rows_affected() == 1)
}
