//! Storage transaction error types.

use depot_blobstore::BlobStoreError;
use depot_core::WriteOperation;
use depot_metadata::MetadataError;
use depot_transaction::{ErrorKind, TransactionalError, WorkError};
use thiserror::Error;

/// Storage transaction errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Operation invoked in the wrong transaction or facet state.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Write-policy denial, naming the repository and the denied verb.
    #[error("write policy of repository {repository} does not allow {operation}")]
    IllegalOperation {
        repository: String,
        operation: WriteOperation,
    },

    /// Contract violation on input.
    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    /// Declared content type contradicts the sniffed content.
    #[error("declared content type {declared} does not match detected {detected}")]
    ContentTypeMismatch { declared: String, detected: String },

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    BlobStore(#[from] BlobStoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Work(#[from] WorkError),

    /// A failure raised while committing, rolling back or closing, chained
    /// to the failure it would otherwise mask.
    #[error("{cleanup}")]
    Cleanup {
        cleanup: Box<StorageError>,
        #[source]
        masked: Box<StorageError>,
    },
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

impl TransactionalError for StorageError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::IllegalState(_) | Self::Work(_) => ErrorKind::IllegalState,
            Self::IllegalOperation { .. } => ErrorKind::IllegalOperation,
            Self::IllegalArgument(_) | Self::ContentTypeMismatch { .. } => {
                ErrorKind::IllegalArgument
            }
            Self::Metadata(e) => match e {
                MetadataError::Conflict { .. } => ErrorKind::Conflict,
                MetadataError::IllegalState(_) => ErrorKind::IllegalState,
                _ => ErrorKind::Other,
            },
            Self::BlobStore(_) | Self::Io(_) => ErrorKind::Io,
            Self::Cleanup { cleanup, .. } => cleanup.kind(),
        }
    }

    fn chained(self, masked: Self) -> Self {
        Self::Cleanup {
            cleanup: Box::new(self),
            masked: Box::new(masked),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(
            StorageError::IllegalState("x".into()).kind(),
            ErrorKind::IllegalState
        );
        assert_eq!(
            StorageError::IllegalOperation {
                repository: "releases".into(),
                operation: WriteOperation::Delete,
            }
            .kind(),
            ErrorKind::IllegalOperation
        );
        assert_eq!(
            StorageError::Metadata(MetadataError::Conflict {
                type_name: "asset".into(),
                id: 1,
            })
            .kind(),
            ErrorKind::Conflict
        );
    }

    #[test]
    fn test_chained_keeps_both_failures() {
        let original = StorageError::Metadata(MetadataError::Conflict {
            type_name: "asset".into(),
            id: 1,
        });
        let cleanup = StorageError::IllegalState("rollback failed".into());
        let chained = cleanup.chained(original);

        // The cleanup failure is what the caller sees first...
        assert_eq!(chained.kind(), ErrorKind::IllegalState);
        // ...but the original stays reachable through the source chain.
        let source = std::error::Error::source(&chained).expect("masked failure retained");
        assert!(source.to_string().contains("conflicting concurrent update"));
    }

    #[test]
    fn test_policy_denial_message_names_repository_and_verb() {
        let err = StorageError::IllegalOperation {
            repository: "releases".into(),
            operation: WriteOperation::Update,
        };
        let text = err.to_string();
        assert!(text.contains("releases"));
        assert!(text.contains("update"));
    }
}
