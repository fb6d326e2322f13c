//! Error types for the status fabric.

use thiserror::Error;

use pulsegrid_doc::DocError;
use pulsegrid_store::StoreError;

/// Result type alias for status operations.
pub type StatusResult<T> = Result<T, StatusError>;

/// Errors that can surface from a publish cycle or a merged-view read.
#[derive(Debug, Error)]
pub enum StatusError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Doc(#[from] DocError),

    #[error("backup agent error: {0}")]
    Agent(String),
}

impl StatusError {
    /// Whether retrying the cycle in a fresh transaction can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StatusError::Store(e) if e.is_retryable())
    }
}
