//! Shared Postgres plumbing for the ledger, archive store and unit of work.
//!
//! ## Sessions
//!
//! `PgSession` owns the connection pool plus the open database transaction of every
//! thread that is inside a unit of work. Store operations run on the calling thread's
//! transaction when there is one and on the pool otherwise, so the ledger and archive
//! writes of one `correlate` call commit or roll back together.
//!
//! The store traits are synchronous. Postgres operations are async, so the trait
//! implementations drive them with [`block_on`] on the ambient tokio runtime. A sync call
//! never leaves its OS thread, which is what makes the thread id a valid session key.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | Classification |
//! |------------|----------------------|----------------|
//! | Database (unique violation) | `23505` | conflict |
//! | Database (other) | any other | storage |
//! | PoolClosed / RowNotFound / other | N/A | storage |

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::thread::ThreadId;

use sqlx::{PgPool, Postgres, Transaction};
use tokio::runtime::RuntimeFlavor;

/// Connection pool plus per-thread open transactions.
pub struct PgSession {
    pool: PgPool,
    open: Mutex<HashMap<ThreadId, Transaction<'static, Postgres>>>,
}

impl PgSession {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            open: Mutex::new(HashMap::new()),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Remove the calling thread's transaction while a statement runs on it.
    ///
    /// The map lock is never held across an await; a statement blocked on a row lock must
    /// not stop the lock holder from reaching its own transaction.
    pub(crate) fn take_transaction(&self) -> Option<Transaction<'static, Postgres>> {
        let mut open = self.open.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        open.remove(&std::thread::current().id())
    }

    pub(crate) fn put_transaction(&self, tx: Transaction<'static, Postgres>) {
        let mut open = self.open.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        open.insert(std::thread::current().id(), tx);
    }

    pub(crate) fn has_transaction(&self) -> bool {
        let open = self.open.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        open.contains_key(&std::thread::current().id())
    }
}

impl std::fmt::Debug for PgSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgSession")
            .field("pool", &self.pool)
            .field("has_transaction", &self.has_transaction())
            .finish()
    }
}

/// Run `$body` on the calling thread's open transaction, or on the pool.
///
/// `$conn` is bound to either `&mut PgConnection` or `&PgPool`; the body must be an
/// un-awaited sqlx future built from it. The transaction is put back under the current
/// thread after the await, so the enclosing future must only be driven through
/// [`block_on`], which never moves it to another worker. Methods using it stay crate-private.
macro_rules! with_session {
    ($session:expr, $conn:ident => $body:expr) => {{
        let session: &$crate::pg::PgSession = &$session;
        match session.take_transaction() {
            Some(mut tx) => {
                let result = {
                    let $conn = &mut *tx;
                    $body.await
                };
                session.put_transaction(tx);
                result
            }
            None => {
                let $conn = session.pool();
                $body.await
            }
        }
    }};
}

pub(crate) use with_session;

/// Drive an async Postgres operation from a synchronous store trait method.
///
/// Requires a multi-threaded tokio runtime on the calling thread; any other context is an
/// error rather than a panic.
pub(crate) fn block_on<F: Future>(operation: &str, future: F) -> Result<F::Output, String> {
    let handle = tokio::runtime::Handle::try_current().map_err(|_| {
        format!("{operation} requires a tokio runtime; call it from within a runtime context")
    })?;
    if handle.runtime_flavor() != RuntimeFlavor::MultiThread {
        return Err(format!(
            "{operation} requires a multi-threaded tokio runtime, found {:?}",
            handle.runtime_flavor()
        ));
    }
    Ok(tokio::task::block_in_place(|| handle.block_on(future)))
}

/// Create tables and indexes if they do not exist yet.
pub async fn apply_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(include_str!("../migrations/0001_storage_commitment.sql"))
        .execute(pool)
        .await?;
    Ok(())
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    has_code(err, "23505")
}

fn has_code(err: &sqlx::Error, expected: &str) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == expected;
        }
    }
    false
}

/// Human-readable description of a SQLx failure during `operation`.
pub(crate) fn describe(operation: &str, err: &sqlx::Error) -> String {
    match err {
        sqlx::Error::Database(db_err) => {
            format!("database error in {}: {}", operation, db_err.message())
        }
        sqlx::Error::PoolClosed => format!("connection pool closed in {operation}"),
        sqlx::Error::RowNotFound => format!("unexpected row not found in {operation}"),
        other => format!("sqlx error in {operation}: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_on_outside_a_runtime_is_an_error() {
        let err = block_on("archive.lock", async { 1 }).unwrap_err();
        assert!(err.contains("requires a tokio runtime"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn block_on_in_current_thread_runtime_is_an_error() {
        let err = block_on("ledger.find", async { 1 }).unwrap_err();
        assert!(err.contains("multi-threaded"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn block_on_in_multi_thread_runtime_drives_the_future() {
        assert_eq!(block_on("ledger.find", async { 7 }), Ok(7));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn unit_of_work_reports_unsupported_runtime() {
        use crate::unit_of_work::{PostgresUnitOfWork, UnitOfWork, UnitOfWorkError};
        use std::sync::Arc;

        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://stgcmt@localhost/stgcmt")
            .unwrap();
        let uow = PostgresUnitOfWork::new(Arc::new(PgSession::new(pool)));

        assert!(matches!(uow.begin(), Err(UnitOfWorkError::Storage(_))));
    }
}

