// Central Error Type for the Application

use thiserror::Error;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Schedule error: {0}")]
    Schedule(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The job was reclaimed by another poller after its lease expired
    #[error("Lease lost for job {0}")]
    LeaseLost(String),

    #[error("Handler error: {0}")]
    Handler(#[from] crate::port::HandlerError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

// Note: sqlx::Error conversion is handled in infra-sqlite crate
// by converting to AppError::Database(String)
