//! Storage commitment request and report payloads.
//!
//! Field names follow the DICOM keywords so the encoded attribute sets read like the
//! N-ACTION / N-EVENT-REPORT information they were taken from.

use serde::{Deserialize, Serialize};

use stgcmt_core::{AeTitle, DomainResult, SopInstanceUid, TransactionUid};

use crate::attributes::Attributes;

/// One item of the Referenced SOP Sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferencedSop {
    #[serde(rename = "ReferencedSOPInstanceUID")]
    pub sop_instance_uid: SopInstanceUid,

    #[serde(
        rename = "ReferencedSOPClassUID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sop_class_uid: Option<String>,

    /// Per-object retrieve location reported by the storage commitment SCP.
    #[serde(
        rename = "RetrieveAETitle",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub retrieve_ae_title: Option<AeTitle>,
}

impl ReferencedSop {
    pub fn new(sop_instance_uid: SopInstanceUid) -> Self {
        Self {
            sop_instance_uid,
            sop_class_uid: None,
            retrieve_ae_title: None,
        }
    }

    pub fn with_sop_class(mut self, sop_class_uid: impl Into<String>) -> Self {
        self.sop_class_uid = Some(sop_class_uid.into());
        self
    }

    pub fn with_retrieve_ae(mut self, ae: AeTitle) -> Self {
        self.retrieve_ae_title = Some(ae);
        self
    }
}

/// Failure Reason (0008,1197) values defined for storage commitment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u16", into = "u16")]
pub enum FailureReason {
    ProcessingFailure,
    NoSuchObjectInstance,
    ClassInstanceConflict,
    SopClassNotSupported,
    DuplicateTransactionUid,
    ResourceLimitation,
    Other(u16),
}

impl FailureReason {
    pub fn code(self) -> u16 {
        match self {
            FailureReason::ProcessingFailure => 0x0110,
            FailureReason::NoSuchObjectInstance => 0x0112,
            FailureReason::ClassInstanceConflict => 0x0119,
            FailureReason::SopClassNotSupported => 0x0122,
            FailureReason::DuplicateTransactionUid => 0x0131,
            FailureReason::ResourceLimitation => 0x0213,
            FailureReason::Other(code) => code,
        }
    }
}

impl From<u16> for FailureReason {
    fn from(code: u16) -> Self {
        match code {
            0x0110 => FailureReason::ProcessingFailure,
            0x0112 => FailureReason::NoSuchObjectInstance,
            0x0119 => FailureReason::ClassInstanceConflict,
            0x0122 => FailureReason::SopClassNotSupported,
            0x0131 => FailureReason::DuplicateTransactionUid,
            0x0213 => FailureReason::ResourceLimitation,
            other => FailureReason::Other(other),
        }
    }
}

impl From<FailureReason> for u16 {
    fn from(reason: FailureReason) -> Self {
        reason.code()
    }
}

/// One item of the Failed SOP Sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedSop {
    #[serde(rename = "ReferencedSOPInstanceUID")]
    pub sop_instance_uid: SopInstanceUid,

    #[serde(
        rename = "ReferencedSOPClassUID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sop_class_uid: Option<String>,

    #[serde(rename = "FailureReason")]
    pub failure_reason: FailureReason,
}

impl FailedSop {
    pub fn new(sop_instance_uid: SopInstanceUid, failure_reason: FailureReason) -> Self {
        Self {
            sop_instance_uid,
            sop_class_uid: None,
            failure_reason,
        }
    }
}

/// Storage commitment request (N-ACTION information), persisted as the request payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageCommitmentRequest {
    #[serde(rename = "TransactionUID")]
    pub transaction_uid: TransactionUid,

    #[serde(rename = "ReferencedSOPSequence", default)]
    pub referenced_sops: Vec<ReferencedSop>,
}

impl StorageCommitmentRequest {
    pub fn new(transaction_uid: TransactionUid) -> Self {
        Self {
            transaction_uid,
            referenced_sops: Vec::new(),
        }
    }

    pub fn with_referenced(mut self, sop: ReferencedSop) -> Self {
        self.referenced_sops.push(sop);
        self
    }

    pub fn to_attributes(&self) -> DomainResult<Attributes> {
        Attributes::encode(self)
    }
}

/// Storage commitment report (N-EVENT-REPORT information) confirming a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageCommitmentReport {
    #[serde(rename = "TransactionUID")]
    pub transaction_uid: TransactionUid,

    /// Message-level retrieve location, applied to references without their own.
    #[serde(
        rename = "RetrieveAETitle",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub retrieve_ae_title: Option<AeTitle>,

    #[serde(rename = "ReferencedSOPSequence", default)]
    pub referenced_sops: Vec<ReferencedSop>,

    #[serde(
        rename = "FailedSOPSequence",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub failed_sops: Vec<FailedSop>,
}

impl StorageCommitmentReport {
    pub fn new(transaction_uid: TransactionUid) -> Self {
        Self {
            transaction_uid,
            retrieve_ae_title: None,
            referenced_sops: Vec::new(),
            failed_sops: Vec::new(),
        }
    }

    pub fn with_retrieve_ae(mut self, ae: AeTitle) -> Self {
        self.retrieve_ae_title = Some(ae);
        self
    }

    pub fn with_referenced(mut self, sop: ReferencedSop) -> Self {
        self.referenced_sops.push(sop);
        self
    }

    pub fn with_failed(mut self, sop: FailedSop) -> Self {
        self.failed_sops.push(sop);
        self
    }

    /// First referenced SOP item for the given instance; duplicates are not rejected.
    pub fn find_referenced(&self, sop_instance_uid: &SopInstanceUid) -> Option<&ReferencedSop> {
        self.referenced_sops
            .iter()
            .find(|item| &item.sop_instance_uid == sop_instance_uid)
    }

    pub fn to_attributes(&self) -> DomainResult<Attributes> {
        Attributes::encode(self)
    }
}
