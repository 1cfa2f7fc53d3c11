//! Storage commitment confirmation correlation.
//!
//! Applies a received storage commitment report to the archive:
//!
//! ```text
//! StorageCommitmentReport
//!   ↓
//! 1. Find the pending transaction by transaction UID (none: warn, stop)
//!   ↓
//! 2. Resolve the exporter the request was sent through
//!   ↓
//! 3. Lock the study, load its instances in store order
//!   ↓
//! 4-5. Add retrieve AE titles to every committed instance
//!   ↓
//! 6. Set the study retrieve AE title if all instances agree on one
//!   ↓
//! 7. Attach the report to the pending transaction
//! ```
//!
//! All steps run inside one unit of work. Any error rolls back every write of the call.

use thiserror::Error;
use tracing::{Span, debug, info, instrument, warn};

use stgcmt_archive::{StorageCommitmentReport, TransactionStatus, assign_retrieve_aets, study_retrieve_aet};
use stgcmt_core::{AeTitle, DeviceName, TransactionUid};

use crate::archive_store::{ArchiveStore, ArchiveStoreError};
use crate::exporter_registry::{ExporterRegistry, RegistryError};
use crate::ledger::{LedgerError, TransactionLedger};
use crate::unit_of_work::{UnitOfWork, UnitOfWorkError, UnitOfWorkScope};

#[derive(Debug, Error)]
pub enum CorrelationError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Archive(#[from] ArchiveStoreError),

    #[error(transparent)]
    UnitOfWork(#[from] UnitOfWorkError),
}

/// What a successful correlation changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationSummary {
    pub transaction_uid: TransactionUid,
    pub status: TransactionStatus,
    /// Instances of the study referenced by the report.
    pub matched_instances: usize,
    /// Instances of the study the report does not mention; left untouched.
    pub unmatched_instances: usize,
    /// Study-level title written by this call, if any.
    pub study_retrieve_aet: Option<AeTitle>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrelationOutcome {
    Applied(CorrelationSummary),
    /// No pending transaction carries the report's UID. Nothing was changed.
    TransactionNotFound,
}

impl CorrelationOutcome {
    pub fn summary(&self) -> Option<&CorrelationSummary> {
        match self {
            CorrelationOutcome::Applied(summary) => Some(summary),
            CorrelationOutcome::TransactionNotFound => None,
        }
    }
}

/// Matches storage commitment reports against pending transactions and records the
/// confirmed retrieve locations on the archive hierarchy.
///
/// ## Generic Parameters
///
/// - `L`: transaction ledger
/// - `A`: archive store
/// - `R`: exporter registry
/// - `U`: unit of work shared by `L` and `A`
#[derive(Debug)]
pub struct ConfirmationCorrelator<L, A, R, U> {
    ledger: L,
    archive: A,
    registry: R,
    uow: U,
}

impl<L, A, R, U> ConfirmationCorrelator<L, A, R, U> {
    pub fn new(ledger: L, archive: A, registry: R, uow: U) -> Self {
        Self {
            ledger,
            archive,
            registry,
            uow,
        }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn archive(&self) -> &A {
        &self.archive
    }
}

impl<L, A, R, U> ConfirmationCorrelator<L, A, R, U>
where
    L: TransactionLedger,
    A: ArchiveStore,
    R: ExporterRegistry,
    U: UnitOfWork,
{
    /// Apply `report`, received by `device`, to the archive.
    ///
    /// An unknown transaction UID is not an error: it is logged and reported as
    /// [`CorrelationOutcome::TransactionNotFound`]. Applying the same report again
    /// yields the same archive state.
    #[instrument(
        skip(self, report, device),
        fields(
            transaction_uid = %report.transaction_uid,
            device = %device,
            study_uid = tracing::field::Empty
        ),
        err
    )]
    pub fn correlate(
        &self,
        report: &StorageCommitmentReport,
        device: &DeviceName,
    ) -> Result<CorrelationOutcome, CorrelationError> {
        let scope = UnitOfWorkScope::begin(&self.uow)?;

        let Some(mut record) = self.ledger.find_by_transaction_uid(&report.transaction_uid)? else {
            warn!("no pending storage commitment transaction for received confirmation");
            scope.rollback()?;
            return Ok(CorrelationOutcome::TransactionNotFound);
        };
        let study_uid = record.study_uid().clone();
        Span::current().record("study_uid", tracing::field::display(&study_uid));

        let exporter = self.registry.resolve_exporter(device, record.exporter_id())?;

        self.archive.lock_study(&study_uid)?;
        let mut instances = self.archive.instances_by_study(&study_uid)?;

        let assignments = assign_retrieve_aets(&mut instances, report, &exporter);
        for assignment in &assignments {
            debug!(
                instance = %assignment.key,
                titles = ?assignment.titles,
                "adding external retrieve AE titles"
            );
            self.archive
                .add_external_retrieve_aets(&assignment.key, &assignment.titles)?;
        }

        let study_ae = study_retrieve_aet(&instances);
        if let Some(ae) = &study_ae {
            info!(ae = %ae, "all instances share one retrieve AE title; updating study");
            self.archive.set_study_external_retrieve_aet(&study_uid, ae)?;
        }

        self.ledger.attach_confirmation(&mut record, report)?;
        scope.commit()?;

        let summary = CorrelationSummary {
            transaction_uid: record.transaction_uid().clone(),
            status: record.status(),
            matched_instances: assignments.len(),
            unmatched_instances: instances.len() - assignments.len(),
            study_retrieve_aet: study_ae,
        };
        info!(
            status = %summary.status,
            matched = summary.matched_instances,
            unmatched = summary.unmatched_instances,
            "storage commitment confirmation applied"
        );
        Ok(CorrelationOutcome::Applied(summary))
    }
}
