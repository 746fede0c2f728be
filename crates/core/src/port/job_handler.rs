// Job Handler Port
// Abstraction for the business logic executed when a job runs

use crate::domain::{Job, Timestamp};
use crate::error::AppError;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Handler errors (recorded as the job's fail reason)
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    #[error("Undefined job: {0}")]
    Undefined(String),

    #[error("Invalid job data: {0}")]
    InvalidData(String),

    #[error("Timed out after {0}ms")]
    Timeout(i64),

    #[error("Lease lost: {0}")]
    LeaseLost(String),

    #[error("Handler panicked: {0}")]
    Panicked(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<AppError> for HandlerError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::LeaseLost(id) => HandlerError::LeaseLost(id),
            other => HandlerError::Failed(other.to_string()),
        }
    }
}

/// Output of a handler: an optional result value to persist
pub type HandlerResult = Result<Option<serde_json::Value>, HandlerError>;

/// Renews the lease of the job being executed
#[async_trait]
pub trait LeaseKeeper: Send + Sync {
    /// Refresh `locked_at`; fails with `AppError::LeaseLost` once another
    /// poller has reclaimed the job
    async fn renew(&self) -> crate::error::Result<Timestamp>;
}

/// What a handler sees of the job it runs
pub struct JobContext {
    job: Job,
    lease: Arc<dyn LeaseKeeper>,
    lock_lifetime_ms: i64,
}

impl JobContext {
    pub fn new(job: Job, lease: Arc<dyn LeaseKeeper>, lock_lifetime_ms: i64) -> Self {
        Self {
            job,
            lease,
            lock_lifetime_ms,
        }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn data(&self) -> &serde_json::Value {
        self.job.data.as_value()
    }

    /// Time the handler has before its claim may be taken over
    pub fn lock_lifetime_ms(&self) -> i64 {
        self.lock_lifetime_ms
    }

    /// Heartbeat for long-running handlers
    pub async fn touch(&self) -> Result<Timestamp, HandlerError> {
        self.lease.renew().await.map_err(HandlerError::from)
    }
}

/// Job Handler trait
///
/// Implementations:
/// - CommandHandler: spawns the command named in the job data
/// - closures/structs supplied by the embedding application
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, ctx: JobContext) -> HandlerResult;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Mock handler behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Succeed with an optional result
        Success(Option<serde_json::Value>),
        /// Fail with message
        Fail(String),
        /// Panic with message (for panic isolation testing)
        Panic(String),
        /// Sleep, then succeed
        Sleep(Duration),
        /// Call `touch` once, then succeed
        Touch,
    }

    /// Mock Job Handler for testing
    pub struct MockJobHandler {
        behavior: Mutex<MockBehavior>,
        call_count: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        seen: Mutex<Vec<Job>>,
    }

    impl MockJobHandler {
        pub fn new(behavior: MockBehavior) -> Self {
            Self {
                behavior: Mutex::new(behavior),
                call_count: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            }
        }

        pub fn new_success() -> Self {
            Self::new(MockBehavior::Success(None))
        }

        pub fn new_fail(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::Fail(message.into()))
        }

        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }

        /// Highest number of overlapping `handle` calls observed
        pub fn max_in_flight(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }

        pub fn seen(&self) -> Vec<Job> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl JobHandler for MockJobHandler {
        async fn handle(&self, ctx: JobContext) -> HandlerResult {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            self.seen.lock().unwrap().push(ctx.job().clone());

            let behavior = self.behavior.lock().unwrap().clone();
            let outcome = match behavior {
                MockBehavior::Success(result) => Ok(result),
                MockBehavior::Fail(msg) => Err(HandlerError::Failed(msg)),
                MockBehavior::Panic(msg) => {
                    self.in_flight.fetch_sub(1, Ordering::SeqCst);
                    panic!("{}", msg);
                }
                MockBehavior::Sleep(duration) => {
                    tokio::time::sleep(duration).await;
                    Ok(None)
                }
                MockBehavior::Touch => ctx.touch().await.map(|_| None),
            };

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            outcome
        }
    }
}
