use std::sync::Arc;

use tracing::instrument;

use crate::pg::{self, PgSession};

use super::{UnitOfWork, UnitOfWorkError};

/// Unit of work backed by one database transaction per thread.
///
/// Stores sharing the same [`PgSession`] run their statements on that transaction until
/// `commit` or `rollback`. Row locks taken inside it (e.g. the study lock) are released
/// when it ends.
#[derive(Debug, Clone)]
pub struct PostgresUnitOfWork {
    session: Arc<PgSession>,
}

impl PostgresUnitOfWork {
    pub fn new(session: Arc<PgSession>) -> Self {
        Self { session }
    }
}

impl UnitOfWork for PostgresUnitOfWork {
    #[instrument(skip(self), err)]
    fn begin(&self) -> Result<(), UnitOfWorkError> {
        if self.session.has_transaction() {
            return Err(UnitOfWorkError::AlreadyActive);
        }

        let tx = pg::block_on("begin", self.session.pool().begin())
            .map_err(UnitOfWorkError::Storage)?
            .map_err(|e| UnitOfWorkError::Storage(pg::describe("begin", &e)))?;
        self.session.put_transaction(tx);
        Ok(())
    }

    #[instrument(skip(self), err)]
    fn commit(&self) -> Result<(), UnitOfWorkError> {
        let tx = self.session.take_transaction().ok_or(UnitOfWorkError::NotActive)?;
        pg::block_on("commit", tx.commit())
            .map_err(UnitOfWorkError::Storage)?
            .map_err(|e| UnitOfWorkError::Storage(pg::describe("commit", &e)))
    }

    #[instrument(skip(self), err)]
    fn rollback(&self) -> Result<(), UnitOfWorkError> {
        let tx = self.session.take_transaction().ok_or(UnitOfWorkError::NotActive)?;
        pg::block_on("rollback", tx.rollback())
            .map_err(UnitOfWorkError::Storage)?
            .map_err(|e| UnitOfWorkError::Storage(pg::describe("rollback", &e)))
    }
}
