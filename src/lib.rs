pub mod batch;
pub mod commands;
pub mod config;
pub mod dates;
pub mod db;
pub mod models;
pub mod notifications;
pub mod records;
pub mod schedule;
pub mod streak;
pub mod timeline;

#[cfg(test)]
mod test_utils;

use std::sync::Arc;

use config::EngineConfig;
use db::AppState;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber; `COACH_LOG` takes an `EnvFilter` directive
pub fn init_tracing() {
  tracing_subscriber::registry()
    .with(
      tracing_subscriber::EnvFilter::try_from_env("COACH_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    )
    .with(tracing_subscriber::fmt::layer())
    .init();
}

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
  // Load environment variables from .env file
  dotenvy::dotenv().ok();
  init_tracing();

  let config = EngineConfig::from_env()?;
  info!(?config, "starting coach timeline service");

  let pool = db::initialize_db(&config.database_url).await?;
  let bind_addr = config.bind_addr.clone();
  let app = commands::router(Arc::new(AppState { db: pool, config }));

  let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
  info!(addr = %bind_addr, "listening");
  axum::serve(listener, app).await?;

  Ok(())
}
