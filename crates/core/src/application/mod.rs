// Application Layer - Use Cases and Business Logic

pub(crate) mod claim;
pub mod config;
pub mod events;
pub mod lifecycle;
pub mod next_run;
pub mod scheduler;
pub mod worker;

// Re-exports
pub use config::SchedulerConfig;
pub use events::{EventBus, EventKind, EventSubscription, JobEvent};
pub use lifecycle::JobHandle;
pub use next_run::compute_next_run_at;
pub use scheduler::Scheduler;
pub use worker::{shutdown_channel, ShutdownSender, ShutdownToken, Worker};

#[cfg(test)]
pub(crate) mod test_support {
    use super::scheduler::SchedulerContext;
    use super::{Scheduler, SchedulerConfig};
    use crate::port::job_repository::mocks::InMemoryJobRepository;
    use crate::port::recurrence::mocks::FixedRecurrence;
    use crate::port::time_provider::ManualTimeProvider;
    use std::sync::Arc;

    /// 2024-01-01T00:00:00Z
    pub const START: i64 = 1_704_067_200_000;

    pub struct Harness {
        pub scheduler: Scheduler,
        pub repo: Arc<InMemoryJobRepository>,
        pub time: Arc<ManualTimeProvider>,
    }

    impl Harness {
        pub fn ctx(&self) -> Arc<SchedulerContext> {
            self.scheduler.context()
        }
    }

    pub fn harness_with(config: SchedulerConfig) -> Harness {
        let repo = Arc::new(InMemoryJobRepository::new());
        let time = Arc::new(ManualTimeProvider::new(START));
        let scheduler = Scheduler::new(
            repo.clone(),
            Arc::new(FixedRecurrence),
            time.clone(),
            config,
        );
        Harness {
            scheduler,
            repo,
            time,
        }
    }

    pub fn harness() -> Harness {
        harness_with(SchedulerConfig::default().with_name("test-instance"))
    }
}
