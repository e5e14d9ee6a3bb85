//! Unit-of-work and transactional retry engine.
//!
//! This crate provides the generic transaction machinery used by the
//! storage layer, independent of any particular store:
//! - The [`Transaction`] trait: begin/commit/rollback/close plus a bounded
//!   retry budget
//! - [`UnitOfWork`]: thread-scoped transaction factories and the at-most-one
//!   current transaction per thread
//! - [`TransactionalPolicy`] and [`transactional`]: failure classification
//!   (ignore / retry / rollback) and the automatic retry loop
//!
//! ```ignore
//! UnitOfWork::begin(tx_factory)?;
//! let result = transactional(&TransactionalPolicy::default(), |tx| {
//!     // ... do transactional work against `tx`
//! });
//! UnitOfWork::end()?;
//! ```

pub mod error;
pub mod retry;
pub mod transaction;
pub mod unit_of_work;

pub use error::{ErrorKind, TransactionalError, WorkError};
pub use retry::{transactional, TransactionalPolicy};
pub use transaction::{SharedTransaction, Transaction};
pub use unit_of_work::{PausedWork, UnitOfWork};
