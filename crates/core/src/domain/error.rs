// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid priority: {0}")]
    InvalidPriority(String),

    #[error("Invalid job kind: {0}")]
    InvalidKind(String),

    #[error("Invalid job name: {0}")]
    InvalidName(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
