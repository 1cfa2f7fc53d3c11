use std::sync::Arc;

use thiserror::Error;

use stgcmt_archive::{NewTransaction, PendingTransaction, StorageCommitmentReport, TransactionStatus};
use stgcmt_core::{DomainError, RecordId, TransactionUid};

/// Ledger operation error.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("transaction record not found: {0}")]
    NotFound(RecordId),

    /// More than one record carries the same transaction UID.
    #[error("duplicate transaction UID: {0}")]
    DuplicateTransaction(TransactionUid),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("ledger storage error: {0}")]
    Storage(String),
}

/// Durable store of pending storage commitment transactions.
///
/// ## Semantics
///
/// - `record` always creates a new record; transaction UIDs are not checked for
///   uniqueness on write.
/// - `find_by_transaction_uid` returns `Ok(None)` when nothing matches and
///   `DuplicateTransaction` when more than one record matches.
/// - `attach_confirmation` overwrites any earlier confirmation of the same record and
///   updates `record` in place only after the write succeeded.
/// - `list_by_status` returns records oldest first.
pub trait TransactionLedger: Send + Sync {
    fn record(&self, new: NewTransaction) -> Result<PendingTransaction, LedgerError>;

    fn find_by_transaction_uid(
        &self,
        transaction_uid: &TransactionUid,
    ) -> Result<Option<PendingTransaction>, LedgerError>;

    fn attach_confirmation(
        &self,
        record: &mut PendingTransaction,
        report: &StorageCommitmentReport,
    ) -> Result<(), LedgerError>;

    fn list_by_status(
        &self,
        status: Option<TransactionStatus>,
        limit: usize,
    ) -> Result<Vec<PendingTransaction>, LedgerError>;
}

impl<S> TransactionLedger for Arc<S>
where
    S: TransactionLedger + ?Sized,
{
    fn record(&self, new: NewTransaction) -> Result<PendingTransaction, LedgerError> {
        (**self).record(new)
    }

    fn find_by_transaction_uid(
        &self,
        transaction_uid: &TransactionUid,
    ) -> Result<Option<PendingTransaction>, LedgerError> {
        (**self).find_by_transaction_uid(transaction_uid)
    }

    fn attach_confirmation(
        &self,
        record: &mut PendingTransaction,
        report: &StorageCommitmentReport,
    ) -> Result<(), LedgerError> {
        (**self).attach_confirmation(record, report)
    }

    fn list_by_status(
        &self,
        status: Option<TransactionStatus>,
        limit: usize,
    ) -> Result<Vec<PendingTransaction>, LedgerError> {
        (**self).list_by_status(status, limit)
    }
}
