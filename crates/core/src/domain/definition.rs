// Job Definition Domain Model

use crate::application::worker::constants::{
    DEFAULT_CONCURRENCY, DEFAULT_LOCK_LIFETIME_MS, DEFAULT_LOCK_LIMIT,
};
use crate::domain::error::{DomainError, Result};
use crate::domain::job::{Priority, PRIORITY_NORMAL};

/// How a job name is processed by the polling loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDefinition {
    pub name: String,
    /// Maximum jobs of this name running at once in this process
    pub concurrency: usize,
    /// Maximum jobs of this name locked at once in this process (0 = unlimited)
    pub lock_limit: usize,
    /// Lease duration before a claim is considered stale
    pub lock_lifetime_ms: i64,
    /// Priority given to jobs created for this name
    pub priority: Priority,
    pub should_save_result: bool,
}

impl JobDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            concurrency: DEFAULT_CONCURRENCY,
            lock_limit: DEFAULT_LOCK_LIMIT,
            lock_lifetime_ms: DEFAULT_LOCK_LIFETIME_MS,
            priority: PRIORITY_NORMAL,
            should_save_result: false,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_lock_limit(mut self, lock_limit: usize) -> Self {
        self.lock_limit = lock_limit;
        self
    }

    pub fn with_lock_lifetime_ms(mut self, lock_lifetime_ms: i64) -> Self {
        self.lock_lifetime_ms = lock_lifetime_ms;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_should_save_result(mut self, should_save_result: bool) -> Self {
        self.should_save_result = should_save_result;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::InvalidName("job name cannot be empty".to_string()));
        }
        if self.concurrency == 0 {
            return Err(DomainError::ValidationError(format!(
                "concurrency for '{}' must be at least 1",
                self.name
            )));
        }
        if self.lock_lifetime_ms <= 0 {
            return Err(DomainError::ValidationError(format!(
                "lock lifetime for '{}' must be positive",
                self.name
            )));
        }
        Ok(())
    }
}
