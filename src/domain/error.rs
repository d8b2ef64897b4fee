//! Domain errors

use thiserror::Error;

/// Domain-level error types
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Not found: {entity} with id={id}")]
    NotFound { entity: &'static str, id: String },

    #[error("User {user_id} already has an active charging request")]
    ActiveRequestExists { user_id: i64 },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Pile {0} is not available")]
    PileUnavailable(i64),

    #[error("Request {0} is already queued")]
    DuplicateRequest(i64),

    #[error("Waiting area is full (capacity {capacity})")]
    WaitingAreaFull { capacity: usize },

    #[error("Validation: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl DomainError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Expected absences (e.g. "no active request") are normal outcomes,
    /// not faults to be logged.
    pub fn is_expected(&self) -> bool {
        matches!(self, DomainError::NotFound { .. })
    }
}

/// Result type for domain operations
pub type DomainResult<T> = Result<T, DomainError>;
