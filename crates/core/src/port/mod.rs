// Port Layer - Interfaces for external dependencies

pub mod id_provider; // For deterministic testing
pub mod job_handler;
pub mod job_repository;
pub mod recurrence;
pub mod time_provider;

// Re-exports
pub use id_provider::IdProvider;
pub use job_handler::{HandlerError, HandlerResult, JobContext, JobHandler, LeaseKeeper};
pub use job_repository::{ClaimQuery, JobRepository};
pub use recurrence::{IntervalSpec, RecurrenceProvider};
pub use time_provider::TimeProvider;
