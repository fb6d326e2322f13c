//! Error types for the PulseGrid store.

use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another transaction committed to an overlapping key set first.
    /// Retryable: begin a fresh transaction and run the work again.
    #[error("transaction conflict: {0}")]
    Conflict(String),

    /// The store cannot be reached. Not retryable at the transaction
    /// level; callers back off and restart their cycle.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The transaction was already committed and cannot be reused.
    #[error("transaction already committed")]
    Committed,
}

impl StoreError {
    /// Whether a fresh transaction attempt can be expected to succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}
