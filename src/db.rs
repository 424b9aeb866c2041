use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

use crate::config::Config;

/// Open the page store, retrying with a fixed delay between attempts.
///
/// The returned pool is meant to be created once per process and shared.
pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let attempts = config.db.connect_retries + 1;
    let delay = Duration::from_millis(config.db.connect_retry_delay_ms);
    let mut last_err = None;

    for attempt in 1..=attempts {
        match try_connect(config).await {
            Ok(pool) => return Ok(pool),
            Err(e) => {
                tracing::warn!(attempt, attempts, error = %e, "database connection failed");
                last_err = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("database connection failed")))
        .with_context(|| format!("could not open database {}", config.db.path.display()))
}

async fn try_connect(config: &Config) -> Result<SqlitePool> {
    let db_path = &config.db.path;

    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}
