// SQLite Connection Pool Setup

use lockstep_core::error::{AppError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_CONNECTIONS: u32 = 10;

/// Create SQLite connection pool with WAL mode and a busy timeout
///
/// An in-memory database lives inside a single connection, so the pool is
/// pinned to one connection that never expires.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| AppError::Config(format!("invalid database url {}: {}", database_url, e)))?
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT)
        .create_if_missing(true);

    let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");
    let pool_options = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(MAX_CONNECTIONS)
    };

    let pool = pool_options
        .connect_with(options)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

    debug!(database_url = %database_url, in_memory = %in_memory, "SQLite pool created");
    Ok(pool)
}
