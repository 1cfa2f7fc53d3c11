use std::sync::{Mutex, RwLock};

use chrono::Utc;

use stgcmt_archive::{NewTransaction, PendingTransaction, StorageCommitmentReport, TransactionStatus};
use stgcmt_core::{RecordId, TransactionUid};

use super::r#trait::{LedgerError, TransactionLedger};
use crate::unit_of_work::{Checkpoint, Journal, UnitOfWorkError};

/// Inverse of one ledger write made inside a unit of work.
#[derive(Debug)]
enum LedgerUndo {
    Recorded(RecordId),
    /// The record as it was before the confirmation was attached.
    Resolved(PendingTransaction),
}

/// In-memory transaction ledger.
///
/// Records are kept in insertion order, which is also creation order.
#[derive(Debug, Default)]
pub struct InMemoryTransactionLedger {
    records: RwLock<Vec<PendingTransaction>>,
    journal: Mutex<Option<Journal<LedgerUndo>>>,
}

impl InMemoryTransactionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records, resolved or not.
    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: RecordId) -> Result<Option<PendingTransaction>, LedgerError> {
        let records = self
            .records
            .read()
            .map_err(|_| LedgerError::Storage("lock poisoned".to_string()))?;
        Ok(records.iter().find(|r| r.id_typed() == id).cloned())
    }

    fn note(&self, undo: LedgerUndo) -> Result<(), LedgerError> {
        let mut journal = self
            .journal
            .lock()
            .map_err(|_| LedgerError::Storage("lock poisoned".to_string()))?;
        if let Some(journal) = journal.as_mut() {
            journal.note(undo);
        }
        Ok(())
    }
}

impl TransactionLedger for InMemoryTransactionLedger {
    fn record(&self, new: NewTransaction) -> Result<PendingTransaction, LedgerError> {
        let record = PendingTransaction::open(RecordId::new(), new, Utc::now())?;

        let mut records = self
            .records
            .write()
            .map_err(|_| LedgerError::Storage("lock poisoned".to_string()))?;
        records.push(record.clone());
        self.note(LedgerUndo::Recorded(record.id_typed()))?;
        Ok(record)
    }

    fn find_by_transaction_uid(
        &self,
        transaction_uid: &TransactionUid,
    ) -> Result<Option<PendingTransaction>, LedgerError> {
        let records = self
            .records
            .read()
            .map_err(|_| LedgerError::Storage("lock poisoned".to_string()))?;

        let mut matches = records.iter().filter(|r| r.transaction_uid() == transaction_uid);
        let first = matches.next().cloned();
        if matches.next().is_some() {
            return Err(LedgerError::DuplicateTransaction(transaction_uid.clone()));
        }
        Ok(first)
    }

    fn attach_confirmation(
        &self,
        record: &mut PendingTransaction,
        report: &StorageCommitmentReport,
    ) -> Result<(), LedgerError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| LedgerError::Storage("lock poisoned".to_string()))?;

        let id = record.id_typed();
        let stored = records
            .iter_mut()
            .find(|r| r.id_typed() == id)
            .ok_or(LedgerError::NotFound(id))?;

        let mut updated = record.clone();
        updated.resolve(report, Utc::now())?;
        let previous = std::mem::replace(stored, updated.clone());
        *record = updated;
        self.note(LedgerUndo::Resolved(previous))
    }

    fn list_by_status(
        &self,
        status: Option<TransactionStatus>,
        limit: usize,
    ) -> Result<Vec<PendingTransaction>, LedgerError> {
        let records = self
            .records
            .read()
            .map_err(|_| LedgerError::Storage("lock poisoned".to_string()))?;

        let mut selected: Vec<PendingTransaction> = records
            .iter()
            .filter(|r| status.is_none_or(|s| r.status() == s))
            .cloned()
            .collect();
        selected.sort_by_key(|r| r.created_at());
        selected.truncate(limit);
        Ok(selected)
    }
}

impl Checkpoint for InMemoryTransactionLedger {
    fn checkpoint(&self) -> Result<(), UnitOfWorkError> {
        let mut journal = self
            .journal
            .lock()
            .map_err(|_| UnitOfWorkError::Storage("lock poisoned".to_string()))?;
        *journal = Some(Journal::for_current_thread());
        Ok(())
    }

    fn restore(&self) -> Result<(), UnitOfWorkError> {
        let journal = self
            .journal
            .lock()
            .map_err(|_| UnitOfWorkError::Storage("lock poisoned".to_string()))?
            .take();
        let Some(journal) = journal else {
            return Ok(());
        };

        let mut records = self
            .records
            .write()
            .map_err(|_| UnitOfWorkError::Storage("lock poisoned".to_string()))?;
        for undo in journal.into_undo_order() {
            match undo {
                LedgerUndo::Recorded(id) => records.retain(|r| r.id_typed() != id),
                LedgerUndo::Resolved(previous) => {
                    let id = previous.id_typed();
                    if let Some(stored) = records.iter_mut().find(|r| r.id_typed() == id) {
                        *stored = previous;
                    }
                }
            }
        }
        Ok(())
    }

    fn release(&self) -> Result<(), UnitOfWorkError> {
        let mut journal = self
            .journal
            .lock()
            .map_err(|_| UnitOfWorkError::Storage("lock poisoned".to_string()))?;
        journal.take();
        Ok(())
    }
}
