use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use tracing::info;

use crate::config::EngineConfig;

pub type DbPool = SqlitePool;

/// How long a connection waits on another writer before giving up
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared state handed to every HTTP handler
pub struct AppState {
  pub db: DbPool,
  pub config: EngineConfig,
}

/// Open the connection pool and run migrations
pub async fn initialize_db(database_url: &str) -> Result<DbPool, sqlx::Error> {
  info!(database_url, "initializing database");

  let options = SqliteConnectOptions::from_str(database_url)?.busy_timeout(BUSY_TIMEOUT);

  let pool = SqlitePoolOptions::new()
    .max_connections(5)
    .connect_with(options)
    .await?;

  sqlx::migrate!("./migrations").run(&pool).await?;

  info!("database initialized");

  Ok(pool)
}

/// Start a transaction that holds the write lock from its first statement.
///
/// A deferred transaction that reads and then writes cannot wait out a
/// concurrent writer; SQLite fails the upgrade with "database is locked".
pub async fn begin_write(pool: &SqlitePool) -> Result<Transaction<'static, Sqlite>, sqlx::Error> {
  pool.begin_with("BEGIN IMMEDIATE").await
}
