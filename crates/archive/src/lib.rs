//! Storage commitment domain module.
//!
//! Business rules for matching storage commitment reports to the archive's instance
//! hierarchy, implemented purely as deterministic domain logic (no IO, no storage).

pub mod attributes;
pub mod commitment;
pub mod exporter;
pub mod hierarchy;
pub mod retrieve_aet;
pub mod transaction;

pub use attributes::Attributes;
pub use commitment::{
    FailedSop, FailureReason, ReferencedSop, StorageCommitmentReport, StorageCommitmentRequest,
};
pub use exporter::{ExporterDescriptor, RetrieveAePolicy};
pub use hierarchy::{Instance, InstanceKey, RetrieveAeSet, Series, Study};
pub use retrieve_aet::{
    Assignment, assign_retrieve_aets, default_retrieve_aet, study_retrieve_aet,
};
pub use transaction::{NewTransaction, PendingTransaction, PendingTransactionParts, TransactionStatus};
