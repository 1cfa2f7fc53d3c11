use std::sync::Arc;

use thiserror::Error;

use stgcmt_archive::{Instance, InstanceKey, Study};
use stgcmt_core::{AeTitle, SeriesInstanceUid, StudyInstanceUid};

/// Archive store operation error.
#[derive(Debug, Error)]
pub enum ArchiveStoreError {
    #[error("study not found: {0}")]
    StudyNotFound(StudyInstanceUid),

    #[error("series not found: {0}")]
    SeriesNotFound(SeriesInstanceUid),

    #[error("instance not found: {0}")]
    InstanceNotFound(InstanceKey),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("archive storage error: {0}")]
    Storage(String),
}

/// Access to the study / series / instance hierarchy.
///
/// ## Semantics
///
/// - `lock_study` serialises concurrent writers of one study until the surrounding unit of
///   work ends. Locking an unknown study is a no-op.
/// - `instances_by_study` returns instances in a stable store order (insertion order) and
///   an empty list for an unknown study.
/// - `add_external_retrieve_aets` is additive: titles already present are kept, nothing is
///   removed.
pub trait ArchiveStore: Send + Sync {
    fn lock_study(&self, study_uid: &StudyInstanceUid) -> Result<(), ArchiveStoreError>;

    fn study(&self, study_uid: &StudyInstanceUid) -> Result<Option<Study>, ArchiveStoreError>;

    fn instances_by_study(
        &self,
        study_uid: &StudyInstanceUid,
    ) -> Result<Vec<Instance>, ArchiveStoreError>;

    fn add_external_retrieve_aets(
        &self,
        key: &InstanceKey,
        titles: &[AeTitle],
    ) -> Result<(), ArchiveStoreError>;

    fn set_study_external_retrieve_aet(
        &self,
        study_uid: &StudyInstanceUid,
        ae: &AeTitle,
    ) -> Result<(), ArchiveStoreError>;
}

impl<S> ArchiveStore for Arc<S>
where
    S: ArchiveStore + ?Sized,
{
    fn lock_study(&self, study_uid: &StudyInstanceUid) -> Result<(), ArchiveStoreError> {
        (**self).lock_study(study_uid)
    }

    fn study(&self, study_uid: &StudyInstanceUid) -> Result<Option<Study>, ArchiveStoreError> {
        (**self).study(study_uid)
    }

    fn instances_by_study(
        &self,
        study_uid: &StudyInstanceUid,
    ) -> Result<Vec<Instance>, ArchiveStoreError> {
        (**self).instances_by_study(study_uid)
    }

    fn add_external_retrieve_aets(
        &self,
        key: &InstanceKey,
        titles: &[AeTitle],
    ) -> Result<(), ArchiveStoreError> {
        (**self).add_external_retrieve_aets(key, titles)
    }

    fn set_study_external_retrieve_aet(
        &self,
        study_uid: &StudyInstanceUid,
        ae: &AeTitle,
    ) -> Result<(), ArchiveStoreError> {
        (**self).set_study_external_retrieve_aet(study_uid, ae)
    }
}
