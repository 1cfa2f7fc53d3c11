//! Study / Series / Instance containment hierarchy.
//!
//! Entities reference their parent by identifier only (arena addressing). The owning
//! store resolves those identifiers; nothing here holds a live back-reference.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use stgcmt_core::{AeTitle, Entity, SeriesInstanceUid, SopInstanceUid, StudyInstanceUid, ValueObject};

/// Deduplicated set of external retrieve AE titles.
///
/// Insertion is additive; titles are never replaced by later assignments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RetrieveAeSet(BTreeSet<AeTitle>);

impl RetrieveAeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the title was not present before.
    pub fn insert(&mut self, ae: AeTitle) -> bool {
        self.0.insert(ae)
    }

    /// Returns `true` if the title was present. Only rollback of an assignment removes titles.
    pub fn remove(&mut self, ae: &AeTitle) -> bool {
        self.0.remove(ae)
    }

    pub fn contains(&self, ae: &AeTitle) -> bool {
        self.0.contains(ae)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AeTitle> {
        self.0.iter()
    }
}

impl ValueObject for RetrieveAeSet {}

impl Extend<AeTitle> for RetrieveAeSet {
    fn extend<I: IntoIterator<Item = AeTitle>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

impl FromIterator<AeTitle> for RetrieveAeSet {
    fn from_iter<I: IntoIterator<Item = AeTitle>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a RetrieveAeSet {
    type Item = &'a AeTitle;
    type IntoIter = std::collections::btree_set::Iter<'a, AeTitle>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Study-level entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Study {
    uid: StudyInstanceUid,
    external_retrieve_aet: Option<AeTitle>,
}

impl Study {
    pub fn new(uid: StudyInstanceUid) -> Self {
        Self {
            uid,
            external_retrieve_aet: None,
        }
    }

    pub fn uid(&self) -> &StudyInstanceUid {
        &self.uid
    }

    pub fn external_retrieve_aet(&self) -> Option<&AeTitle> {
        self.external_retrieve_aet.as_ref()
    }

    pub fn set_external_retrieve_aet(&mut self, ae: AeTitle) {
        self.external_retrieve_aet = Some(ae);
    }

    pub fn clear_external_retrieve_aet(&mut self) {
        self.external_retrieve_aet = None;
    }
}

impl Entity for Study {
    type Id = StudyInstanceUid;

    fn id(&self) -> &Self::Id {
        &self.uid
    }
}

/// Series-level entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Series {
    uid: SeriesInstanceUid,
    study_uid: StudyInstanceUid,
}

impl Series {
    pub fn new(uid: SeriesInstanceUid, study_uid: StudyInstanceUid) -> Self {
        Self { uid, study_uid }
    }

    pub fn uid(&self) -> &SeriesInstanceUid {
        &self.uid
    }

    pub fn study_uid(&self) -> &StudyInstanceUid {
        &self.study_uid
    }
}

impl Entity for Series {
    type Id = SeriesInstanceUid;

    fn id(&self) -> &Self::Id {
        &self.uid
    }
}

/// Address of an instance: SOP instance UIDs are only unique within their series.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstanceKey {
    pub series_uid: SeriesInstanceUid,
    pub sop_instance_uid: SopInstanceUid,
}

impl core::fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.series_uid, self.sop_instance_uid)
    }
}

/// Instance-level entity (one stored SOP instance).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    key: InstanceKey,
    external_retrieve_aets: RetrieveAeSet,
}

impl Instance {
    pub fn new(series_uid: SeriesInstanceUid, sop_instance_uid: SopInstanceUid) -> Self {
        Self {
            key: InstanceKey {
                series_uid,
                sop_instance_uid,
            },
            external_retrieve_aets: RetrieveAeSet::new(),
        }
    }

    pub fn with_external_retrieve_aets(mut self, aets: impl IntoIterator<Item = AeTitle>) -> Self {
        self.external_retrieve_aets.extend(aets);
        self
    }

    pub fn key(&self) -> &InstanceKey {
        &self.key
    }

    pub fn series_uid(&self) -> &SeriesInstanceUid {
        &self.key.series_uid
    }

    pub fn sop_instance_uid(&self) -> &SopInstanceUid {
        &self.key.sop_instance_uid
    }

    pub fn external_retrieve_aets(&self) -> &RetrieveAeSet {
        &self.external_retrieve_aets
    }

    pub fn add_external_retrieve_aet(&mut self, ae: AeTitle) -> bool {
        self.external_retrieve_aets.insert(ae)
    }

    pub fn remove_external_retrieve_aet(&mut self, ae: &AeTitle) -> bool {
        self.external_retrieve_aets.remove(ae)
    }
}

impl Entity for Instance {
    type Id = InstanceKey;

    fn id(&self) -> &Self::Id {
        &self.key
    }
}
