//! Error types for merge documents.

use thiserror::Error;

/// Result type alias for document operations.
pub type DocResult<T> = Result<T, DocError>;

/// Errors that can occur while parsing, merging, or evaluating a
/// document.
#[derive(Debug, Error)]
pub enum DocError {
    #[error("document parse error: {0}")]
    Parse(String),

    #[error("document root is not a JSON object")]
    NotAnObject,

    #[error("bad operator: {0}")]
    BadOperator(String),

    #[error("serialize error: {0}")]
    Serialize(String),
}
