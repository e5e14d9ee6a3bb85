//! Failure classification for the retry engine.
//!
//! The engine never matches on concrete error types; every failure value
//! carries an explicit [`ErrorKind`] tag and classification happens on the
//! tag alone.

use thiserror::Error;

/// Enumerated failure kinds the retry engine classifies on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Operation invoked in the wrong transaction or unit-of-work state.
    /// Always a caller bug; never retried.
    IllegalState,
    /// A write-policy denial. Never retried.
    IllegalOperation,
    /// Contract violation on input. Never retried.
    IllegalArgument,
    /// Optimistic-concurrency conflict raised by the metadata store;
    /// retried by default.
    Conflict,
    /// I/O failure from the blob store or a caller-supplied stream.
    Io,
    /// Anything else.
    Other,
}

/// A failure value the transactional retry engine can classify.
///
/// `chained` attaches a failure that would otherwise be masked: when commit,
/// rollback or close itself fails while handling an earlier failure, both
/// must remain observable to the caller.
pub trait TransactionalError: std::error::Error + Sized + 'static {
    /// The classification tag for this failure.
    fn kind(&self) -> ErrorKind;

    /// Attach `masked` (the failure that triggered the cleanup) to `self`
    /// (the failure raised during the cleanup itself).
    fn chained(self, masked: Self) -> Self;
}

/// Misuse of the unit-of-work context.
#[derive(Debug, Error)]
pub enum WorkError {
    #[error("transaction already in progress")]
    TransactionInProgress,

    #[error("transaction still in progress")]
    TransactionStillActive,

    #[error("unit of work has not been set")]
    NoUnitOfWork,

    #[error("current transaction has an unexpected type")]
    WrongTransactionType,
}

impl TransactionalError for WorkError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::IllegalState
    }

    fn chained(self, masked: Self) -> Self {
        // WorkError carries no cause slot; the context error wins.
        tracing::warn!(masked = %masked, "unit-of-work error masks earlier failure");
        self
    }
}
