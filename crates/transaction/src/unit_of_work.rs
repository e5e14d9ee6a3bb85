//! Thread-scoped unit-of-work context.
//!
//! Each thread carries a stack of transaction factories and at most one
//! current transaction. The context is never shared across threads; two
//! concurrent units of work cannot observe each other's state.

use crate::error::WorkError;
use crate::transaction::{SharedTransaction, Transaction};
use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

type ErasedFactory = Rc<dyn Fn() -> Rc<dyn Any>>;

#[derive(Default)]
struct Context {
    /// Stack of transaction factories; the top of the stack supplies
    /// transactions for transactional calls.
    work: Vec<ErasedFactory>,
    /// The transaction currently driving this thread, if any.
    current: Option<Rc<dyn Any>>,
}

thread_local! {
    static CONTEXT: RefCell<Context> = RefCell::new(Context::default());
}

/// Access to the calling thread's unit-of-work context.
///
/// ```ignore
/// UnitOfWork::begin(tx_factory)?;
/// // ... invoke transactional operations
/// UnitOfWork::end()?;
/// ```
pub struct UnitOfWork {
    _private: (),
}

impl UnitOfWork {
    /// Begin a new unit of work supplying transactions from `factory`.
    ///
    /// Units of work nest (a batch job may wrap per-item work), but only
    /// while no transaction is active.
    pub fn begin<T, F>(factory: F) -> Result<(), WorkError>
    where
        T: Transaction,
        F: Fn() -> T + 'static,
    {
        CONTEXT.with(|context| {
            let mut context = context.borrow_mut();
            if context.current.is_some() {
                return Err(WorkError::TransactionInProgress);
            }
            context
                .work
                .push(Rc::new(move || -> Rc<dyn Any> { Rc::new(RefCell::new(factory())) }));
            Ok(())
        })
    }

    /// End the current unit of work.
    pub fn end() -> Result<(), WorkError> {
        CONTEXT.with(|context| {
            let mut context = context.borrow_mut();
            if context.current.is_some() {
                return Err(WorkError::TransactionStillActive);
            }
            if context.work.pop().is_none() {
                return Err(WorkError::NoUnitOfWork);
            }
            Ok(())
        })
    }

    /// The transaction currently driving this thread, if any.
    pub fn current_transaction<T: Transaction>() -> Option<SharedTransaction<T>> {
        let current = CONTEXT.with(|context| context.borrow().current.clone())?;
        current
            .downcast::<RefCell<T>>()
            .ok()
            .map(SharedTransaction::from_rc)
    }

    /// Whether a transaction is active on this thread.
    pub fn is_active() -> bool {
        CONTEXT.with(|context| context.borrow().current.is_some())
    }

    /// Suspend the whole context, leaving a fresh one in place.
    ///
    /// Used around hook invocation so observers cannot see or interfere
    /// with the transaction that is notifying them.
    pub fn pause() -> PausedWork {
        PausedWork(CONTEXT.with(|context| std::mem::take(&mut *context.borrow_mut())))
    }

    /// Restore a context previously returned by [`UnitOfWork::pause`].
    pub fn resume(paused: PausedWork) {
        CONTEXT.with(|context| *context.borrow_mut() = paused.0);
    }

    /// Acquire a transaction from the top-of-stack factory and install it
    /// as the current transaction.
    pub(crate) fn acquire<T: Transaction>() -> Result<SharedTransaction<T>, WorkError> {
        let factory = CONTEXT.with(|context| {
            let context = context.borrow();
            if context.current.is_some() {
                return Err(WorkError::TransactionInProgress);
            }
            context
                .work
                .last()
                .cloned()
                .ok_or(WorkError::NoUnitOfWork)
        })?;
        // Run the factory outside the context borrow; it may itself consult
        // thread state.
        let erased = factory();
        let typed = erased
            .downcast::<RefCell<T>>()
            .map_err(|_| WorkError::WrongTransactionType)?;
        let erased: Rc<dyn Any> = typed.clone();
        CONTEXT.with(|context| {
            context.borrow_mut().current = Some(erased);
        });
        Ok(SharedTransaction::from_rc(typed))
    }

    /// Clear the current transaction.
    pub(crate) fn release() {
        CONTEXT.with(|context| context.borrow_mut().current = None);
    }
}

/// A suspended unit-of-work context. Not `Send`; must be resumed on the
/// thread it was paused on.
pub struct PausedWork(Context);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, TransactionalError};
    use thiserror::Error;

    #[derive(Debug, Error)]
    enum NoError {}

    impl TransactionalError for NoError {
        fn kind(&self) -> ErrorKind {
            ErrorKind::Other
        }

        fn chained(self, _masked: Self) -> Self {
            self
        }
    }

    impl From<WorkError> for NoError {
        fn from(e: WorkError) -> Self {
            panic!("unexpected work error: {e}")
        }
    }

    struct NullTx;

    impl Transaction for NullTx {
        type Error = NoError;

        fn begin(&mut self) -> Result<(), NoError> {
            Ok(())
        }

        fn commit(&mut self) -> Result<(), NoError> {
            Ok(())
        }

        fn rollback(&mut self) -> Result<(), NoError> {
            Ok(())
        }

        fn close(&mut self) -> Result<(), NoError> {
            Ok(())
        }

        fn is_active(&self) -> bool {
            false
        }

        fn allow_retry(&mut self) -> bool {
            false
        }
    }

    #[test]
    fn test_begin_end_balanced() {
        UnitOfWork::begin(|| NullTx).unwrap();
        UnitOfWork::begin(|| NullTx).unwrap();
        UnitOfWork::end().unwrap();
        UnitOfWork::end().unwrap();
        assert!(matches!(UnitOfWork::end(), Err(WorkError::NoUnitOfWork)));
    }

    #[test]
    fn test_end_fails_while_transaction_active() {
        UnitOfWork::begin(|| NullTx).unwrap();
        let _tx = UnitOfWork::acquire::<NullTx>().unwrap();
        assert!(matches!(
            UnitOfWork::end(),
            Err(WorkError::TransactionStillActive)
        ));
        UnitOfWork::release();
        UnitOfWork::end().unwrap();
    }

    #[test]
    fn test_begin_fails_while_transaction_active() {
        UnitOfWork::begin(|| NullTx).unwrap();
        let _tx = UnitOfWork::acquire::<NullTx>().unwrap();
        assert!(matches!(
            UnitOfWork::begin(|| NullTx),
            Err(WorkError::TransactionInProgress)
        ));
        UnitOfWork::release();
        UnitOfWork::end().unwrap();
    }

    #[test]
    fn test_acquire_requires_unit_of_work() {
        assert!(matches!(
            UnitOfWork::acquire::<NullTx>(),
            Err(WorkError::NoUnitOfWork)
        ));
    }

    #[test]
    fn test_pause_hides_current_transaction() {
        UnitOfWork::begin(|| NullTx).unwrap();
        let _tx = UnitOfWork::acquire::<NullTx>().unwrap();
        assert!(UnitOfWork::is_active());

        let paused = UnitOfWork::pause();
        assert!(!UnitOfWork::is_active());
        assert!(UnitOfWork::current_transaction::<NullTx>().is_none());

        UnitOfWork::resume(paused);
        assert!(UnitOfWork::is_active());

        UnitOfWork::release();
        UnitOfWork::end().unwrap();
    }

    #[test]
    fn test_contexts_are_thread_scoped() {
        UnitOfWork::begin(|| NullTx).unwrap();
        let _tx = UnitOfWork::acquire::<NullTx>().unwrap();

        let handle = std::thread::spawn(|| {
            // The spawned thread sees a pristine context.
            assert!(!UnitOfWork::is_active());
            assert!(matches!(
                UnitOfWork::acquire::<NullTx>(),
                Err(WorkError::NoUnitOfWork)
            ));
        });
        handle.join().unwrap();

        UnitOfWork::release();
        UnitOfWork::end().unwrap();
    }
}
