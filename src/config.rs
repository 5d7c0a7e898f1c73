//! Service configuration, read from the environment (`.env` is loaded first)

use std::env;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://coach-timeline.db?mode=rwc";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("Missing configuration: {0}")]
  MissingConfig(String),
}

#[derive(Clone)]
pub struct EngineConfig {
  pub database_url: String,
  pub bind_addr: String,
  /// Bearer token the scheduler presents to trigger the daily batch
  pub cron_secret: String,
}

impl EngineConfig {
  pub fn from_env() -> Result<Self, ConfigError> {
    let cron_secret = env::var("COACH_CRON_SECRET")
      .ok()
      .filter(|s| !s.trim().is_empty())
      .ok_or_else(|| ConfigError::MissingConfig("COACH_CRON_SECRET".into()))?;

    Ok(Self {
      database_url: env::var("COACH_DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.into()),
      bind_addr: env::var("COACH_BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.into()),
      cron_secret,
    })
  }
}

// Keep the secret out of logs
impl std::fmt::Debug for EngineConfig {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("EngineConfig")
      .field("database_url", &self.database_url)
      .field("bind_addr", &self.bind_addr)
      .field("cron_secret", &"<redacted>")
      .finish()
  }
}
