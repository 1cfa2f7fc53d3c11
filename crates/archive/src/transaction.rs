//! Pending storage commitment transactions.
//!
//! A `PendingTransaction` is created when the archive sends a storage commitment request
//! and resolved when the matching report arrives. Records are never deleted here.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stgcmt_core::{
    DeviceName, DomainError, DomainResult, Entity, ExporterId, RecordId, SeriesInstanceUid,
    SopInstanceUid, StudyInstanceUid, TransactionUid,
};

use crate::attributes::Attributes;
use crate::commitment::{StorageCommitmentReport, StorageCommitmentRequest};

/// Lifecycle status of a transaction record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Request sent, no report yet.
    Pending,
    /// Report received without failed references.
    Completed,
    /// Report lists both committed and failed references.
    Warning,
    /// Report lists only failed references.
    Failed,
}

impl TransactionStatus {
    /// Status implied by a received report.
    pub fn of_report(report: &StorageCommitmentReport) -> Self {
        match (report.referenced_sops.is_empty(), report.failed_sops.is_empty()) {
            (_, true) => TransactionStatus::Completed,
            (true, false) => TransactionStatus::Failed,
            (false, false) => TransactionStatus::Warning,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Warning => "warning",
            TransactionStatus::Failed => "failed",
        }
    }
}

impl core::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "completed" => Ok(TransactionStatus::Completed),
            "warning" => Ok(TransactionStatus::Warning),
            "failed" => Ok(TransactionStatus::Failed),
            other => Err(DomainError::validation(format!(
                "unknown transaction status '{other}'"
            ))),
        }
    }
}

/// Input for recording a new pending transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub study_uid: StudyInstanceUid,
    pub series_uid: Option<SeriesInstanceUid>,
    pub sop_instance_uid: Option<SopInstanceUid>,
    pub exporter_id: ExporterId,
    pub device_name: DeviceName,
    pub request: StorageCommitmentRequest,
}

/// Every persisted field of a transaction record, used by storage backends to rehydrate.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingTransactionParts {
    pub id: RecordId,
    pub transaction_uid: TransactionUid,
    pub study_uid: StudyInstanceUid,
    pub series_uid: Option<SeriesInstanceUid>,
    pub sop_instance_uid: Option<SopInstanceUid>,
    pub exporter_id: ExporterId,
    pub device_name: DeviceName,
    pub request: Attributes,
    pub confirmation: Option<Attributes>,
    pub status: TransactionStatus,
    pub number_of_instances: u32,
    pub number_of_failures: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outstanding (or resolved) storage commitment transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingTransaction {
    id: RecordId,
    transaction_uid: TransactionUid,
    study_uid: StudyInstanceUid,
    series_uid: Option<SeriesInstanceUid>,
    sop_instance_uid: Option<SopInstanceUid>,
    exporter_id: ExporterId,
    device_name: DeviceName,
    request: Attributes,
    confirmation: Option<Attributes>,
    status: TransactionStatus,
    number_of_instances: u32,
    number_of_failures: u32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PendingTransaction {
    /// Open a new pending record. The transaction UID is taken from the request payload.
    pub fn open(id: RecordId, new: NewTransaction, now: DateTime<Utc>) -> DomainResult<Self> {
        let request = new.request.to_attributes()?;
        let number_of_instances = u32::try_from(new.request.referenced_sops.len())
            .map_err(|_| DomainError::validation("too many referenced SOPs in request"))?;

        Ok(Self {
            id,
            transaction_uid: new.request.transaction_uid,
            study_uid: new.study_uid,
            series_uid: new.series_uid,
            sop_instance_uid: new.sop_instance_uid,
            exporter_id: new.exporter_id,
            device_name: new.device_name,
            request,
            confirmation: None,
            status: TransactionStatus::Pending,
            number_of_instances,
            number_of_failures: 0,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn from_parts(parts: PendingTransactionParts) -> Self {
        Self {
            id: parts.id,
            transaction_uid: parts.transaction_uid,
            study_uid: parts.study_uid,
            series_uid: parts.series_uid,
            sop_instance_uid: parts.sop_instance_uid,
            exporter_id: parts.exporter_id,
            device_name: parts.device_name,
            request: parts.request,
            confirmation: parts.confirmation,
            status: parts.status,
            number_of_instances: parts.number_of_instances,
            number_of_failures: parts.number_of_failures,
            created_at: parts.created_at,
            updated_at: parts.updated_at,
        }
    }

    /// Attach the received report. A later report for the same transaction overwrites it.
    pub fn resolve(&mut self, report: &StorageCommitmentReport, now: DateTime<Utc>) -> DomainResult<()> {
        if report.transaction_uid != self.transaction_uid {
            return Err(DomainError::invariant(format!(
                "report for transaction {} cannot resolve record of transaction {}",
                report.transaction_uid, self.transaction_uid
            )));
        }

        let number_of_failures = u32::try_from(report.failed_sops.len())
            .map_err(|_| DomainError::validation("too many failed SOPs in report"))?;

        self.confirmation = Some(report.to_attributes()?);
        self.status = TransactionStatus::of_report(report);
        self.number_of_failures = number_of_failures;
        self.updated_at = now;
        Ok(())
    }

    pub fn id_typed(&self) -> RecordId {
        self.id
    }

    pub fn transaction_uid(&self) -> &TransactionUid {
        &self.transaction_uid
    }

    pub fn study_uid(&self) -> &StudyInstanceUid {
        &self.study_uid
    }

    pub fn series_uid(&self) -> Option<&SeriesInstanceUid> {
        self.series_uid.as_ref()
    }

    pub fn sop_instance_uid(&self) -> Option<&SopInstanceUid> {
        self.sop_instance_uid.as_ref()
    }

    pub fn exporter_id(&self) -> &ExporterId {
        &self.exporter_id
    }

    pub fn device_name(&self) -> &DeviceName {
        &self.device_name
    }

    pub fn request(&self) -> &Attributes {
        &self.request
    }

    pub fn confirmation(&self) -> Option<&Attributes> {
        self.confirmation.as_ref()
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    pub fn number_of_instances(&self) -> u32 {
        self.number_of_instances
    }

    pub fn number_of_failures(&self) -> u32 {
        self.number_of_failures
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

impl Entity for PendingTransaction {
    type Id = RecordId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitment::{FailedSop, FailureReason, ReferencedSop};
    use chrono::TimeZone;

    fn test_time(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn sop(uid: &str) -> SopInstanceUid {
        uid.parse().unwrap()
    }

    fn new_transaction() -> NewTransaction {
        NewTransaction {
            study_uid: "1.2.3".parse().unwrap(),
            series_uid: None,
            sop_instance_uid: None,
            exporter_id: "STORESCP".parse().unwrap(),
            device_name: "dcm4chee-arc".parse().unwrap(),
            request: StorageCommitmentRequest::new("2.25.1".parse().unwrap())
                .with_referenced(ReferencedSop::new(sop("1.2.3.1.1")))
                .with_referenced(ReferencedSop::new(sop("1.2.3.1.2"))),
        }
    }

    #[test]
    fn open_takes_transaction_uid_from_request() {
        let tx = PendingTransaction::open(RecordId::new(), new_transaction(), test_time(0)).unwrap();

        assert_eq!(tx.transaction_uid().as_str(), "2.25.1");
        assert_eq!(tx.status(), TransactionStatus::Pending);
        assert_eq!(tx.number_of_instances(), 2);
        assert!(tx.confirmation().is_none());
        assert_eq!(tx.request().get_str("TransactionUID"), Some("2.25.1"));
    }

    #[test]
    fn resolve_sets_status_and_failures() {
        let mut tx = PendingTransaction::open(RecordId::new(), new_transaction(), test_time(0)).unwrap();
        let report = StorageCommitmentReport::new("2.25.1".parse().unwrap())
            .with_referenced(ReferencedSop::new(sop("1.2.3.1.1")))
            .with_failed(FailedSop::new(sop("1.2.3.1.2"), FailureReason::ProcessingFailure));

        tx.resolve(&report, test_time(5)).unwrap();

        assert_eq!(tx.status(), TransactionStatus::Warning);
        assert_eq!(tx.number_of_failures(), 1);
        assert_eq!(tx.updated_at(), test_time(5));
        assert_eq!(tx.created_at(), test_time(0));
        assert!(tx.confirmation().is_some());
    }

    #[test]
    fn resolve_rejects_foreign_transaction() {
        let mut tx = PendingTransaction::open(RecordId::new(), new_transaction(), test_time(0)).unwrap();
        let report = StorageCommitmentReport::new("2.25.999".parse().unwrap());

        let err = tx.resolve(&report, test_time(1)).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
        assert_eq!(tx.status(), TransactionStatus::Pending);
    }

    #[test]
    fn status_of_report() {
        let uid: TransactionUid = "2.25.1".parse().unwrap();
        let empty = StorageCommitmentReport::new(uid.clone());
        assert_eq!(TransactionStatus::of_report(&empty), TransactionStatus::Completed);

        let only_failed = StorageCommitmentReport::new(uid)
            .with_failed(FailedSop::new(sop("1.1"), FailureReason::NoSuchObjectInstance));
        assert_eq!(TransactionStatus::of_report(&only_failed), TransactionStatus::Failed);
    }

    #[test]
    fn status_parses_its_own_display() {
        for status in [
            TransactionStatus::Pending,
            TransactionStatus::Completed,
            TransactionStatus::Warning,
            TransactionStatus::Failed,
        ] {
            assert_eq!(status.to_string().parse::<TransactionStatus>().unwrap(), status);
        }
    }
}
