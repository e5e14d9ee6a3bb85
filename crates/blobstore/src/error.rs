//! Blob store error types.

use thiserror::Error;

/// Blob store operation errors.
#[derive(Debug, Error)]
pub enum BlobStoreError {
    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("unknown blob store: {0}")]
    UnknownStore(String),

    #[error("invalid blob reference: {0}")]
    InvalidRef(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for blob store operations.
pub type BlobStoreResult<T> = std::result::Result<T, BlobStoreError>;
