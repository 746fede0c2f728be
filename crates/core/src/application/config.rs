// Scheduler configuration

use crate::application::worker::constants::{
    DEFAULT_CONCURRENCY, DEFAULT_LOCK_LIFETIME_MS, DEFAULT_LOCK_LIMIT, DEFAULT_PROCESS_EVERY,
    DEFAULT_TIMEZONE,
};
use crate::domain::{ClaimOrder, JobDefinition};
use std::time::Duration;

/// Settings shared by every job name a scheduler processes
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Instance name written to `last_modified_by`
    pub name: Option<String>,
    pub process_every: Duration,
    pub default_concurrency: usize,
    pub default_lock_limit: usize,
    pub default_lock_lifetime_ms: i64,
    pub default_timezone: String,
    pub claim_order: ClaimOrder,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            name: None,
            process_every: DEFAULT_PROCESS_EVERY,
            default_concurrency: DEFAULT_CONCURRENCY,
            default_lock_limit: DEFAULT_LOCK_LIMIT,
            default_lock_lifetime_ms: DEFAULT_LOCK_LIFETIME_MS,
            default_timezone: DEFAULT_TIMEZONE.to_string(),
            claim_order: ClaimOrder::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_process_every(mut self, process_every: Duration) -> Self {
        self.process_every = process_every;
        self
    }

    pub fn with_default_lock_lifetime_ms(mut self, lock_lifetime_ms: i64) -> Self {
        self.default_lock_lifetime_ms = lock_lifetime_ms;
        self
    }

    pub fn with_default_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.default_timezone = timezone.into();
        self
    }

    pub fn with_claim_order(mut self, claim_order: ClaimOrder) -> Self {
        self.claim_order = claim_order;
        self
    }

    /// Definition for `name` carrying this configuration's defaults
    pub fn definition(&self, name: impl Into<String>) -> JobDefinition {
        JobDefinition::new(name)
            .with_concurrency(self.default_concurrency)
            .with_lock_limit(self.default_lock_limit)
            .with_lock_lifetime_ms(self.default_lock_lifetime_ms)
    }

    pub(crate) fn process_every_ms(&self) -> i64 {
        i64::try_from(self.process_every.as_millis()).unwrap_or(i64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_inherits_defaults() {
        let config = SchedulerConfig {
            default_concurrency: 2,
            default_lock_limit: 4,
            ..SchedulerConfig::default()
        }
        .with_default_lock_lifetime_ms(1_000);

        let definition = config.definition("mail");
        assert_eq!(definition.name, "mail");
        assert_eq!(definition.concurrency, 2);
        assert_eq!(definition.lock_limit, 4);
        assert_eq!(definition.lock_lifetime_ms, 1_000);
    }

    #[test]
    fn test_process_every_ms() {
        let config = SchedulerConfig::default().with_process_every(Duration::from_millis(250));
        assert_eq!(config.process_every_ms(), 250);
    }
}
