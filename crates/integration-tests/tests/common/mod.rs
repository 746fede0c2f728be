//! Shared setup: file-backed SQLite databases that several pools can open

#![allow(dead_code)]

use lockstep_core::application::{Scheduler, SchedulerConfig};
use lockstep_core::port::id_provider::UuidProvider;
use lockstep_core::port::TimeProvider;
use lockstep_infra_calendar::ChronoCalendar;
use lockstep_infra_sqlite::{create_pool, run_migrations, SqliteJobRepository};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;

/// 2024-01-01T00:00:00Z
pub const START: i64 = 1_704_067_200_000;
pub const MINUTE: i64 = 60_000;

/// Temporary database file, removed on drop
pub struct TestDb {
    path: PathBuf,
}

impl TestDb {
    pub fn new() -> Self {
        let path = std::env::temp_dir().join(format!("lockstep-{}.db", uuid::Uuid::new_v4()));
        Self { path }
    }

    pub fn url(&self) -> String {
        format!("sqlite://{}", self.path.display())
    }

    /// A fresh pool on this file, schema applied
    pub async fn pool(&self) -> SqlitePool {
        let pool = create_pool(&self.url()).await.unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    /// A repository with its own pool, as a separate process would have
    pub async fn repository(&self) -> Arc<SqliteJobRepository> {
        Arc::new(SqliteJobRepository::new(
            self.pool().await,
            Arc::new(UuidProvider),
        ))
    }

    pub async fn scheduler(
        &self,
        time: Arc<dyn TimeProvider>,
        config: SchedulerConfig,
    ) -> Scheduler {
        Scheduler::new(
            self.repository().await,
            Arc::new(ChronoCalendar::new()),
            time,
            config,
        )
    }
}

impl Drop for TestDb {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let mut file = self.path.clone().into_os_string();
            file.push(suffix);
            let _ = std::fs::remove_file(file);
        }
    }
}
