// Domain Layer - Pure business logic and entities

pub mod claim_order;
pub mod definition;
pub mod error;
pub mod job;

// Re-exports
pub use claim_order::{ClaimOrder, SortDirection, SortField};
pub use definition::JobDefinition;
pub use error::DomainError;
pub use job::{
    parse_priority, Job, JobId, JobKind, JobPayload, Priority, RepeatOptions, Timestamp,
    UniqueOpts,
};
