//! Explicit transactional scope around one storage commitment operation.
//!
//! The correlator writes to the ledger and to the archive store. Those writes must
//! become visible together or not at all, so every operation runs inside a unit of work
//! acquired through [`UnitOfWorkScope`]:
//!
//! ```text
//! let scope = UnitOfWorkScope::begin(&uow)?;
//! ... store calls ...
//! scope.commit()?;          // any other exit path rolls back
//! ```

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use thiserror::Error;

pub use in_memory::{Checkpoint, InMemoryUnitOfWork};
pub(crate) use in_memory::Journal;
pub use postgres::PostgresUnitOfWork;

/// Unit of work operation error.
#[derive(Debug, Error)]
pub enum UnitOfWorkError {
    #[error("no unit of work is active on this thread")]
    NotActive,

    #[error("a unit of work is already active on this thread")]
    AlreadyActive,

    #[error("unit of work storage error: {0}")]
    Storage(String),
}

/// Transaction boundary shared by the stores of one backend.
///
/// Implementations must:
/// - make every store write between `begin` and `commit` durable together
/// - discard every such write on `rollback`
/// - serialise units of work that touch the same study
pub trait UnitOfWork: Send + Sync {
    fn begin(&self) -> Result<(), UnitOfWorkError>;

    fn commit(&self) -> Result<(), UnitOfWorkError>;

    fn rollback(&self) -> Result<(), UnitOfWorkError>;
}

impl<S> UnitOfWork for Arc<S>
where
    S: UnitOfWork + ?Sized,
{
    fn begin(&self) -> Result<(), UnitOfWorkError> {
        (**self).begin()
    }

    fn commit(&self) -> Result<(), UnitOfWorkError> {
        (**self).commit()
    }

    fn rollback(&self) -> Result<(), UnitOfWorkError> {
        (**self).rollback()
    }
}

/// Scoped acquisition of a unit of work.
///
/// Commits only through [`UnitOfWorkScope::commit`]; dropping the scope any other way
/// (early return, `?`, unwinding) rolls back.
#[must_use = "dropping the scope rolls the unit of work back"]
pub struct UnitOfWorkScope<'a, U: UnitOfWork + ?Sized> {
    uow: &'a U,
    open: bool,
}

impl<'a, U: UnitOfWork + ?Sized> UnitOfWorkScope<'a, U> {
    pub fn begin(uow: &'a U) -> Result<Self, UnitOfWorkError> {
        uow.begin()?;
        Ok(Self { uow, open: true })
    }

    pub fn commit(mut self) -> Result<(), UnitOfWorkError> {
        self.open = false;
        self.uow.commit()
    }

    pub fn rollback(mut self) -> Result<(), UnitOfWorkError> {
        self.open = false;
        self.uow.rollback()
    }
}

impl<U: UnitOfWork + ?Sized> Drop for UnitOfWorkScope<'_, U> {
    fn drop(&mut self) {
        if self.open {
            if let Err(err) = self.uow.rollback() {
                tracing::error!(error = %err, "unit of work rollback failed");
            }
        }
    }
}
