//! Service wiring: pick the storage backend and assemble the correlator.

use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use stgcmt_archive::{NewTransaction, PendingTransaction, StorageCommitmentReport};
use stgcmt_core::DeviceName;

use crate::archive_store::{ArchiveStore, InMemoryArchiveStore, PostgresArchiveStore};
use crate::config::{Persistence, StgCmtConfig};
use crate::correlator::{ConfirmationCorrelator, CorrelationError, CorrelationOutcome};
use crate::exporter_registry::{DeviceRegistry, ExporterRegistry};
use crate::ledger::{InMemoryTransactionLedger, PostgresTransactionLedger, TransactionLedger};
use crate::pg::{self, PgSession};
use crate::unit_of_work::{InMemoryUnitOfWork, PostgresUnitOfWork, UnitOfWork, UnitOfWorkScope};

pub type DynLedger = Arc<dyn TransactionLedger>;
pub type DynArchiveStore = Arc<dyn ArchiveStore>;
pub type DynRegistry = Arc<dyn ExporterRegistry>;
pub type DynUnitOfWork = Arc<dyn UnitOfWork>;

pub type Correlator = ConfirmationCorrelator<DynLedger, DynArchiveStore, DynRegistry, DynUnitOfWork>;

/// Everything a storage commitment SCU needs for one local device.
pub struct StgCmtServices {
    pub device_name: DeviceName,
    pub ledger: DynLedger,
    pub archive: DynArchiveStore,
    pub correlator: Correlator,
    uow: DynUnitOfWork,
}

impl StgCmtServices {
    fn assemble(
        device_name: DeviceName,
        ledger: DynLedger,
        archive: DynArchiveStore,
        registry: DynRegistry,
        uow: DynUnitOfWork,
    ) -> Self {
        let correlator = ConfirmationCorrelator::new(ledger.clone(), archive.clone(), registry, uow.clone());
        Self {
            device_name,
            ledger,
            archive,
            correlator,
            uow,
        }
    }

    /// Record an outgoing storage commitment request.
    pub fn record_request(&self, new: NewTransaction) -> Result<PendingTransaction, CorrelationError> {
        let scope = UnitOfWorkScope::begin(&self.uow)?;
        let record = self.ledger.record(new)?;
        scope.commit()?;
        Ok(record)
    }

    /// Apply a confirmation received by the local device.
    pub fn correlate(&self, report: &StorageCommitmentReport) -> Result<CorrelationOutcome, CorrelationError> {
        self.correlator.correlate(report, &self.device_name)
    }
}

impl std::fmt::Debug for StgCmtServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StgCmtServices")
            .field("device_name", &self.device_name)
            .finish_non_exhaustive()
    }
}

/// In-memory wiring (dev/test). The caller keeps `archive` to seed the hierarchy.
pub fn build_in_memory_services(
    device_name: DeviceName,
    registry: DeviceRegistry,
    archive: Arc<InMemoryArchiveStore>,
) -> StgCmtServices {
    let ledger = Arc::new(InMemoryTransactionLedger::new());
    let uow = Arc::new(
        InMemoryUnitOfWork::new()
            .with_participant(ledger.clone())
            .with_participant(archive.clone()),
    );

    StgCmtServices::assemble(device_name, ledger, archive, Arc::new(registry), uow)
}

/// Wire services from configuration.
///
/// The Postgres backend requires the returned services to be used from a multi-threaded
/// tokio runtime.
pub async fn build_services(config: &StgCmtConfig) -> anyhow::Result<StgCmtServices> {
    let registry = config
        .load_registry()
        .context("failed to load device registry")?;

    match &config.persistence {
        Persistence::InMemory => {
            tracing::info!(device = %config.device_name, "using in-memory storage commitment stores");
            Ok(build_in_memory_services(
                config.device_name.clone(),
                registry,
                Arc::new(InMemoryArchiveStore::new()),
            ))
        }
        Persistence::Postgres {
            database_url,
            max_connections,
        } => {
            let pool = PgPoolOptions::new()
                .max_connections(*max_connections)
                .connect(database_url)
                .await
                .context("failed to connect to Postgres")?;
            pg::apply_schema(&pool)
                .await
                .context("failed to apply storage commitment schema")?;

            let session = Arc::new(PgSession::new(pool));
            tracing::info!(
                device = %config.device_name,
                max_connections,
                "using Postgres storage commitment stores"
            );

            Ok(StgCmtServices::assemble(
                config.device_name.clone(),
                Arc::new(PostgresTransactionLedger::new(session.clone())),
                Arc::new(PostgresArchiveStore::new(session.clone())),
                Arc::new(registry),
                Arc::new(PostgresUnitOfWork::new(session)),
            ))
        }
    }
}
