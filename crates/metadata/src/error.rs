//! Metadata store error types.

use thiserror::Error;

/// Metadata store operation errors.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("conflicting concurrent update of {type_name} record {id}")]
    Conflict { type_name: String, id: u64 },

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("invalid entity id: {0}")]
    InvalidEntityId(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type for metadata operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;

impl MetadataError {
    /// Whether this failure is an optimistic-concurrency conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
