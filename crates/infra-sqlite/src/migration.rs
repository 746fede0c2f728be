// Migration Runner

use lockstep_core::error::{AppError, Result};
use sqlx::SqlitePool;
use tracing::info;

/// Versioned migrations, applied in order
const MIGRATIONS: &[(i64, &str, &str)] = &[(
    1,
    "Initial schema",
    include_str!("../migrations/001_initial_schema.sql"),
)];

fn db_error(err: sqlx::Error) -> AppError {
    AppError::Database(format!("migration failed: {}", err))
}

/// Run database migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("Running database migrations...");

    // Check if schema_version table exists
    let table_exists: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='schema_version'",
    )
    .fetch_one(pool)
    .await
    .map_err(db_error)?;

    let current_version: i64 = if table_exists > 0 {
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await
            .map_err(db_error)?
            .unwrap_or(0)
    } else {
        0
    };

    info!(current_version = %current_version, "Current schema version");

    for (version, description, sql) in MIGRATIONS {
        if current_version < *version {
            info!(version = %version, "Applying migration: {}", description);
            apply_migration(pool, sql).await?;
        }
    }

    info!("All migrations applied successfully");
    Ok(())
}

/// Apply a single migration SQL file
async fn apply_migration(pool: &SqlitePool, sql: &str) -> Result<()> {
    // Execute migration in a transaction
    let mut tx = pool.begin().await.map_err(db_error)?;

    // Split by semicolon and execute each statement
    for statement in sql.split(';') {
        // Remove comments and trim
        let clean_statement: String = statement
            .lines()
            .filter(|line| !line.trim().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string();

        if !clean_statement.is_empty() {
            sqlx::query(&clean_statement)
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;
        }
    }

    tx.commit().await.map_err(db_error)?;
    Ok(())
}
