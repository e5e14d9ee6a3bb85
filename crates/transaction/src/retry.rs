//! Failure classification and the automatic retry loop.

use crate::error::{ErrorKind, TransactionalError};
use crate::transaction::{SharedTransaction, Transaction};
use crate::unit_of_work::UnitOfWork;
use tracing::{debug, warn};

/// Declares how a transactional operation's failures map to transaction
/// outcomes.
///
/// Classification precedence is ignore > retry > rollback: an explicit
/// ignore always wins, because it is the operation author's statement that
/// the condition is not an error for transaction-outcome purposes.
///
/// Defaults when a set is empty:
/// - `retry_on` empty: retry on [`ErrorKind::Conflict`]
/// - `rollback_on` empty: roll back on any failure not otherwise classified
#[derive(Clone, Debug, Default)]
pub struct TransactionalPolicy {
    ignore: Vec<ErrorKind>,
    retry_on: Vec<ErrorKind>,
    rollback_on: Vec<ErrorKind>,
}

impl TransactionalPolicy {
    /// Policy with no explicit classifications.
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit despite a failure of this kind, then rethrow it.
    pub fn ignore(mut self, kind: ErrorKind) -> Self {
        self.ignore.push(kind);
        self
    }

    /// Roll back and retry (within budget) on a failure of this kind.
    pub fn retry_on(mut self, kind: ErrorKind) -> Self {
        self.retry_on.push(kind);
        self
    }

    /// Roll back and rethrow on a failure of this kind.
    pub fn rollback_on(mut self, kind: ErrorKind) -> Self {
        self.rollback_on.push(kind);
        self
    }

    /// Whether the transaction should still commit given this failure.
    fn request_commit(&self, kind: ErrorKind) -> bool {
        if self.ignore.contains(&kind) {
            return true; // explicit ignore overrides everything else
        }
        if self.request_retry(kind) {
            return false; // explicit retry implies explicit rollback
        }
        if !self.rollback_on.is_empty() {
            return !self.rollback_on.contains(&kind);
        }
        false // default: roll back on any failure
    }

    /// Whether the transaction should be retried given this failure.
    fn request_retry(&self, kind: ErrorKind) -> bool {
        if self.retry_on.is_empty() {
            return kind == ErrorKind::Conflict;
        }
        self.retry_on.contains(&kind)
    }
}

/// Run `body` transactionally under the calling thread's unit of work.
///
/// If a transaction is already active, the call flattens into it: `body`
/// runs against the current transaction with no begin/commit/rollback of
/// its own. Otherwise a transaction is acquired from the top-of-stack
/// factory and driven through the begin/execute/classify loop, retrying
/// within the transaction's budget, and is closed on every exit path.
pub fn transactional<T, R, F>(policy: &TransactionalPolicy, mut body: F) -> Result<R, T::Error>
where
    T: Transaction,
    F: FnMut(&SharedTransaction<T>) -> Result<R, T::Error>,
{
    if UnitOfWork::is_active() {
        // Nested transactional call: proceed inside the current transaction.
        let tx = UnitOfWork::current_transaction::<T>()
            .ok_or(crate::error::WorkError::WrongTransactionType)?;
        return body(&tx);
    }

    let tx = UnitOfWork::acquire::<T>()?;
    // Clear the current-transaction slot even if `body` panics.
    let _release = ReleaseGuard;

    let result = run_with_retries(policy, &tx, &mut body);

    let closed = tx.with(|t| t.close());
    match (result, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(close_error)) => Err(close_error),
        (Err(error), Ok(())) => Err(error),
        (Err(error), Err(close_error)) => Err(close_error.chained(error)),
    }
}

struct ReleaseGuard;

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        UnitOfWork::release();
    }
}

fn run_with_retries<T, R, F>(
    policy: &TransactionalPolicy,
    tx: &SharedTransaction<T>,
    body: &mut F,
) -> Result<R, T::Error>
where
    T: Transaction,
    F: FnMut(&SharedTransaction<T>) -> Result<R, T::Error>,
{
    loop {
        tx.with(|t| t.begin())?;

        match body(tx) {
            Ok(value) => match tx.with(|t| t.commit()) {
                Ok(()) => return Ok(value),
                // Conflicts surface at commit time; classify the commit
                // failure like any other.
                Err(commit_error) => {
                    let kind = commit_error.kind();
                    if let Some(terminal) =
                        rollback_and_maybe_retry(policy, tx, kind, commit_error)?
                    {
                        return Err(terminal);
                    }
                }
            },
            Err(error) if policy.request_commit(error.kind()) => {
                match tx.with(|t| t.commit()) {
                    // Ignored failures are rethrown once the commit has
                    // actually succeeded.
                    Ok(()) => return Err(error),
                    Err(commit_error) => {
                        let kind = commit_error.kind();
                        let chained = commit_error.chained(error);
                        if let Some(terminal) =
                            rollback_and_maybe_retry(policy, tx, kind, chained)?
                        {
                            return Err(terminal);
                        }
                    }
                }
            }
            Err(error) => {
                let kind = error.kind();
                if let Some(terminal) = rollback_and_maybe_retry(policy, tx, kind, error)? {
                    return Err(terminal);
                }
            }
        }
    }
}

/// Roll back, then either signal a retry (returns `Ok(None)`) or hand back
/// the terminal failure (returns `Ok(Some(error))`). A failing rollback
/// propagates immediately with the original failure chained on.
fn rollback_and_maybe_retry<T: Transaction>(
    policy: &TransactionalPolicy,
    tx: &SharedTransaction<T>,
    kind: ErrorKind,
    error: T::Error,
) -> Result<Option<T::Error>, T::Error> {
    if let Err(rollback_error) = tx.with(|t| t.rollback()) {
        return Err(rollback_error.chained(error));
    }
    if policy.request_retry(kind) {
        if tx.with(|t| t.allow_retry()) {
            debug!(kind = ?kind, "retrying transaction after rollback");
            return Ok(None);
        }
        warn!(kind = ?kind, "retry budget exhausted");
    }
    Ok(Some(error))
}
