//! Postgres backend tests.
//!
//! Ignored by default; run with a scratch database:
//!
//! ```text
//! DATABASE_URL=postgres://localhost/stgcmt_test cargo test -p stgcmt-infra -- --ignored
//! ```

use std::sync::Arc;

use sqlx::PgPool;
use uuid::Uuid;

use stgcmt_archive::{
    ExporterDescriptor, Instance, InstanceKey, NewTransaction, ReferencedSop, Series,
    StorageCommitmentReport, StorageCommitmentRequest, Study, TransactionStatus,
};
use stgcmt_core::{AeTitle, DeviceName, SeriesInstanceUid, StudyInstanceUid, TransactionUid};
use stgcmt_infra::archive_store::{ArchiveStore, PostgresArchiveStore};
use stgcmt_infra::exporter_registry::DeviceRegistry;
use stgcmt_infra::ledger::{LedgerError, PostgresTransactionLedger, TransactionLedger};
use stgcmt_infra::pg::{PgSession, apply_schema};
use stgcmt_infra::unit_of_work::{PostgresUnitOfWork, UnitOfWork, UnitOfWorkScope};
use stgcmt_infra::{ConfirmationCorrelator, CorrelationOutcome};

async fn session() -> Arc<PgSession> {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for Postgres tests");
    let pool = PgPool::connect(&url).await.expect("failed to connect to Postgres");
    apply_schema(&pool).await.expect("failed to apply schema");
    Arc::new(PgSession::new(pool))
}

/// UID root unique per test run.
fn unique_root() -> String {
    format!("2.25.{}", Uuid::now_v7().as_u128())
}

fn ae(s: &str) -> AeTitle {
    s.parse().unwrap()
}

fn device() -> DeviceName {
    "dcm4chee-arc".parse().unwrap()
}

struct Hierarchy {
    study: StudyInstanceUid,
    series: SeriesInstanceUid,
}

impl Hierarchy {
    fn sop(&self, n: usize) -> stgcmt_core::SopInstanceUid {
        format!("{}.{n}", self.series).parse().unwrap()
    }

    fn key(&self, n: usize) -> InstanceKey {
        InstanceKey {
            series_uid: self.series.clone(),
            sop_instance_uid: self.sop(n),
        }
    }
}

async fn seed(archive: &PostgresArchiveStore, count: usize) -> Hierarchy {
    let root = unique_root();
    let hierarchy = Hierarchy {
        study: format!("{root}.1").parse().unwrap(),
        series: format!("{root}.1.1").parse().unwrap(),
    };
    archive.insert_study(&Study::new(hierarchy.study.clone())).await.unwrap();
    archive
        .insert_series(&Series::new(hierarchy.series.clone(), hierarchy.study.clone()))
        .await
        .unwrap();
    for n in 1..=count {
        archive
            .insert_instance(&Instance::new(hierarchy.series.clone(), hierarchy.sop(n)))
            .await
            .unwrap();
    }
    hierarchy
}

fn new_transaction(h: &Hierarchy, uid: &TransactionUid, count: usize) -> NewTransaction {
    let request = (1..=count).fold(StorageCommitmentRequest::new(uid.clone()), |r, n| {
        r.with_referenced(ReferencedSop::new(h.sop(n)))
    });
    NewTransaction {
        study_uid: h.study.clone(),
        series_uid: Some(h.series.clone()),
        sop_instance_uid: None,
        exporter_id: "STORESCP".parse().unwrap(),
        device_name: device(),
        request,
    }
}

#[tokio::test(flavor = "multi_thread")]
#[ignore]
async fn ledger_round_trip() {
    let session = session().await;
    let ledger = PostgresTransactionLedger::new(session.clone());
    let archive = PostgresArchiveStore::new(session);
    let h = seed(&archive, 2).await;
    let uid: TransactionUid = unique_root().parse().unwrap();

    let mut record = ledger.record(new_transaction(&h, &uid, 2)).unwrap();
    let found = ledger.find_by_transaction_uid(&uid).unwrap().unwrap();
    assert_eq!(found.id_typed(), record.id_typed());
    assert_eq!(found.number_of_instances(), 2);
    assert_eq!(found.status(), TransactionStatus::Pending);

    let report = StorageCommitmentReport::new(uid.clone()).with_referenced(ReferencedSop::new(h.sop(1)));
    ledger.attach_confirmation(&mut record, &report).unwrap();

    let found = ledger.find_by_transaction_uid(&uid).unwrap().unwrap();
    assert_eq!(found.status(), TransactionStatus::Completed);
    assert_eq!(found.confirmation(), record.confirmation());

    ledger.record(new_transaction(&h, &uid, 2)).unwrap();
    assert!(matches!(
        ledger.find_by_transaction_uid(&uid),
        Err(LedgerError::DuplicateTransaction(_))
    ));
}

#[tokio::test(flavor = "multi_thread")]
#[ignore]
async fn correlate_updates_instances_and_study() {
    let session = session().await;
    let ledger = Arc::new(PostgresTransactionLedger::new(session.clone()));
    let archive = Arc::new(PostgresArchiveStore::new(session.clone()));
    let uow = Arc::new(PostgresUnitOfWork::new(session));
    let h = seed(&archive, 3).await;
    let uid: TransactionUid = unique_root().parse().unwrap();
    ledger.record(new_transaction(&h, &uid, 3)).unwrap();

    let registry = DeviceRegistry::new().with_exporter(
        device(),
        ExporterDescriptor::new("STORESCP".parse().unwrap(), "dicom:STORESCP", ae("STGCMTSCP")),
    );
    let correlator = ConfirmationCorrelator::new(ledger.clone(), archive.clone(), registry, uow);

    let report = (1..=3).fold(
        StorageCommitmentReport::new(uid.clone()).with_retrieve_ae(ae("AE1")),
        |r, n| r.with_referenced(ReferencedSop::new(h.sop(n))),
    );
    let outcome = correlator.correlate(&report, &device()).unwrap();
    assert!(matches!(outcome, CorrelationOutcome::Applied(_)));

    let instances = archive.instances_by_study(&h.study).unwrap();
    assert_eq!(instances.len(), 3);
    assert!(instances.iter().all(|i| i.external_retrieve_aets().contains(&ae("AE1"))));
    let study = archive.study(&h.study).unwrap().unwrap();
    assert_eq!(study.external_retrieve_aet(), Some(&ae("AE1")));

    // Same report again: no new titles, still one record.
    correlator.correlate(&report, &device()).unwrap();
    let again = archive.instances_by_study(&h.study).unwrap();
    assert_eq!(again, instances);
}

#[tokio::test(flavor = "multi_thread")]
#[ignore]
async fn rollback_discards_archive_writes() {
    let session = session().await;
    let archive = PostgresArchiveStore::new(session.clone());
    let uow = PostgresUnitOfWork::new(session);
    let h = seed(&archive, 1).await;

    {
        let _scope = UnitOfWorkScope::begin(&uow).unwrap();
        archive.lock_study(&h.study).unwrap();
        archive.add_external_retrieve_aets(&h.key(1), &[ae("AE1")]).unwrap();
        archive.set_study_external_retrieve_aet(&h.study, &ae("AE1")).unwrap();
    }

    let instances = archive.instances_by_study(&h.study).unwrap();
    assert!(instances[0].external_retrieve_aets().is_empty());
    assert!(archive.study(&h.study).unwrap().unwrap().external_retrieve_aet().is_none());

    assert!(uow.commit().is_err());
}
