use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use stgcmt_archive::{Instance, InstanceKey, Series, Study};
use stgcmt_core::{AeTitle, SeriesInstanceUid, StudyInstanceUid};

use super::r#trait::{ArchiveStore, ArchiveStoreError};
use crate::unit_of_work::{Checkpoint, Journal, UnitOfWorkError};

#[derive(Debug, Clone, Default)]
struct ArchiveState {
    studies: HashMap<StudyInstanceUid, Study>,
    series: HashMap<SeriesInstanceUid, Series>,
    /// Insertion order is the store order of `instances_by_study`.
    instances: Vec<Instance>,
    positions: HashMap<InstanceKey, usize>,
}

impl ArchiveState {
    fn remove_instance(&mut self, key: &InstanceKey) {
        let Some(idx) = self.positions.remove(key) else {
            return;
        };
        self.instances.remove(idx);
        for later in &self.instances[idx..] {
            if let Some(position) = self.positions.get_mut(later.key()) {
                *position -= 1;
            }
        }
    }

    fn undo(&mut self, undo: ArchiveUndo) {
        match undo {
            ArchiveUndo::InsertedStudy(uid) => {
                if !self.series.values().any(|s| s.study_uid() == &uid) {
                    self.studies.remove(&uid);
                }
            }
            ArchiveUndo::InsertedSeries(uid) => {
                if !self.instances.iter().any(|i| i.series_uid() == &uid) {
                    self.series.remove(&uid);
                }
            }
            ArchiveUndo::InsertedInstance(key) => self.remove_instance(&key),
            ArchiveUndo::AddedRetrieveAets { key, titles } => {
                if let Some(&idx) = self.positions.get(&key) {
                    for ae in &titles {
                        self.instances[idx].remove_external_retrieve_aet(ae);
                    }
                }
            }
            ArchiveUndo::SetStudyRetrieveAet {
                study_uid,
                previous,
                applied,
            } => {
                let Some(study) = self.studies.get_mut(&study_uid) else {
                    return;
                };
                // A later write from another thread wins.
                if study.external_retrieve_aet() != Some(&applied) {
                    return;
                }
                match previous {
                    Some(ae) => study.set_external_retrieve_aet(ae),
                    None => study.clear_external_retrieve_aet(),
                }
            }
        }
    }
}

/// Inverse of one write made inside a unit of work.
#[derive(Debug)]
enum ArchiveUndo {
    InsertedStudy(StudyInstanceUid),
    InsertedSeries(SeriesInstanceUid),
    InsertedInstance(InstanceKey),
    /// Only the titles that were new to the instance.
    AddedRetrieveAets { key: InstanceKey, titles: Vec<AeTitle> },
    SetStudyRetrieveAet {
        study_uid: StudyInstanceUid,
        previous: Option<AeTitle>,
        applied: AeTitle,
    },
}

/// In-memory archive hierarchy.
///
/// Intended for tests/dev. Study locking relies on the in-memory unit of work, which
/// already serialises all correlations. Rolling back a unit undoes only the writes of the
/// thread that owns it, so ingestion running alongside is never lost.
#[derive(Debug, Default)]
pub struct InMemoryArchiveStore {
    state: RwLock<ArchiveState>,
    journal: Mutex<Option<Journal<ArchiveUndo>>>,
}

impl InMemoryArchiveStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_study(&self, study: Study) -> Result<(), ArchiveStoreError> {
        let mut state = self.write()?;
        if state.studies.contains_key(study.uid()) {
            return Err(ArchiveStoreError::Conflict(format!("study {} already exists", study.uid())));
        }
        let uid = study.uid().clone();
        state.studies.insert(uid.clone(), study);
        self.note(ArchiveUndo::InsertedStudy(uid))
    }

    pub fn insert_series(&self, series: Series) -> Result<(), ArchiveStoreError> {
        let mut state = self.write()?;
        if !state.studies.contains_key(series.study_uid()) {
            return Err(ArchiveStoreError::StudyNotFound(series.study_uid().clone()));
        }
        if state.series.contains_key(series.uid()) {
            return Err(ArchiveStoreError::Conflict(format!("series {} already exists", series.uid())));
        }
        let uid = series.uid().clone();
        state.series.insert(uid.clone(), series);
        self.note(ArchiveUndo::InsertedSeries(uid))
    }

    pub fn insert_instance(&self, instance: Instance) -> Result<(), ArchiveStoreError> {
        let mut state = self.write()?;
        if !state.series.contains_key(instance.series_uid()) {
            return Err(ArchiveStoreError::SeriesNotFound(instance.series_uid().clone()));
        }
        if state.positions.contains_key(instance.key()) {
            return Err(ArchiveStoreError::Conflict(format!(
                "instance {} already exists",
                instance.key()
            )));
        }
        let key = instance.key().clone();
        let position = state.instances.len();
        state.positions.insert(key.clone(), position);
        state.instances.push(instance);
        self.note(ArchiveUndo::InsertedInstance(key))
    }

    pub fn instance(&self, key: &InstanceKey) -> Result<Option<Instance>, ArchiveStoreError> {
        let state = self.read()?;
        Ok(state.positions.get(key).map(|&idx| state.instances[idx].clone()))
    }

    /// Journal a write when the calling thread owns the open unit of work.
    ///
    /// Called with the state lock held; `restore` never holds the journal while taking it.
    fn note(&self, undo: ArchiveUndo) -> Result<(), ArchiveStoreError> {
        let mut journal = self
            .journal
            .lock()
            .map_err(|_| ArchiveStoreError::Storage("lock poisoned".to_string()))?;
        if let Some(journal) = journal.as_mut() {
            journal.note(undo);
        }
        Ok(())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, ArchiveState>, ArchiveStoreError> {
        self.state
            .read()
            .map_err(|_| ArchiveStoreError::Storage("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, ArchiveState>, ArchiveStoreError> {
        self.state
            .write()
            .map_err(|_| ArchiveStoreError::Storage("lock poisoned".to_string()))
    }
}

impl ArchiveStore for InMemoryArchiveStore {
    fn lock_study(&self, _study_uid: &StudyInstanceUid) -> Result<(), ArchiveStoreError> {
        Ok(())
    }

    fn study(&self, study_uid: &StudyInstanceUid) -> Result<Option<Study>, ArchiveStoreError> {
        Ok(self.read()?.studies.get(study_uid).cloned())
    }

    fn instances_by_study(
        &self,
        study_uid: &StudyInstanceUid,
    ) -> Result<Vec<Instance>, ArchiveStoreError> {
        let state = self.read()?;
        Ok(state
            .instances
            .iter()
            .filter(|inst| {
                state
                    .series
                    .get(inst.series_uid())
                    .is_some_and(|series| series.study_uid() == study_uid)
            })
            .cloned()
            .collect())
    }

    fn add_external_retrieve_aets(
        &self,
        key: &InstanceKey,
        titles: &[AeTitle],
    ) -> Result<(), ArchiveStoreError> {
        let mut state = self.write()?;
        let idx = *state
            .positions
            .get(key)
            .ok_or_else(|| ArchiveStoreError::InstanceNotFound(key.clone()))?;
        let instance = &mut state.instances[idx];
        let added: Vec<AeTitle> = titles
            .iter()
            .filter(|ae| instance.add_external_retrieve_aet((*ae).clone()))
            .cloned()
            .collect();
        if added.is_empty() {
            return Ok(());
        }
        self.note(ArchiveUndo::AddedRetrieveAets {
            key: key.clone(),
            titles: added,
        })
    }

    fn set_study_external_retrieve_aet(
        &self,
        study_uid: &StudyInstanceUid,
        ae: &AeTitle,
    ) -> Result<(), ArchiveStoreError> {
        let mut state = self.write()?;
        let study = state
            .studies
            .get_mut(study_uid)
            .ok_or_else(|| ArchiveStoreError::StudyNotFound(study_uid.clone()))?;
        let previous = study.external_retrieve_aet().cloned();
        study.set_external_retrieve_aet(ae.clone());
        self.note(ArchiveUndo::SetStudyRetrieveAet {
            study_uid: study_uid.clone(),
            previous,
            applied: ae.clone(),
        })
    }
}

impl Checkpoint for InMemoryArchiveStore {
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

        let mut state = self
            .state
            .write()
            .map_err(|_| UnitOfWorkError::Storage("lock poisoned".to_string()))?;
        for undo in journal.into_undo_order() {
            state.undo(undo);
        }
        Ok(())
    }

    fn release(&self) -> Result<(), UnitOfWorkError> {
        self.journal
            .lock()
            .map_err(|_| UnitOfWorkError::Storage("lock poisoned".to_string()))?
            .take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ae(s: &str) -> AeTitle {
        s.parse().unwrap()
    }

    fn seeded() -> InMemoryArchiveStore {
        let store = InMemoryArchiveStore::new();
        store.insert_study(Study::new("1.2.3".parse().unwrap())).unwrap();
        store.insert_study(Study::new("1.2.4".parse().unwrap())).unwrap();
        store
            .insert_series(Series::new("1.2.3.1".parse().unwrap(), "1.2.3".parse().unwrap()))
            .unwrap();
        store
            .insert_series(Series::new("1.2.4.1".parse().unwrap(), "1.2.4".parse().unwrap()))
            .unwrap();
        for (series, sop) in [("1.2.3.1", "1.2.3.1.2"), ("1.2.4.1", "1.2.4.1.1"), ("1.2.3.1", "1.2.3.1.1")] {
            store
                .insert_instance(Instance::new(series.parse().unwrap(), sop.parse().unwrap()))
                .unwrap();
        }
        store
    }

    fn key(series: &str, sop: &str) -> InstanceKey {
        InstanceKey {
            series_uid: series.parse().unwrap(),
            sop_instance_uid: sop.parse().unwrap(),
        }
    }

    #[test]
    fn instances_by_study_keeps_insertion_order() {
        let store = seeded();
        let sops: Vec<String> = store
            .instances_by_study(&"1.2.3".parse().unwrap())
            .unwrap()
            .iter()
            .map(|i| i.sop_instance_uid().to_string())
            .collect();

        assert_eq!(sops, vec!["1.2.3.1.2", "1.2.3.1.1"]);
        assert!(store.instances_by_study(&"9.9".parse().unwrap()).unwrap().is_empty());
    }

    #[test]
    fn add_external_retrieve_aets_is_additive() {
        let store = seeded();
        let k = key("1.2.3.1", "1.2.3.1.1");
        store.add_external_retrieve_aets(&k, &[ae("AE1")]).unwrap();
        store.add_external_retrieve_aets(&k, &[ae("AE2"), ae("AE1")]).unwrap();

        let inst = store.instance(&k).unwrap().unwrap();
        assert_eq!(inst.external_retrieve_aets().len(), 2);
    }

    #[test]
    fn unknown_targets_are_rejected() {
        let store = seeded();
        let err = store
            .add_external_retrieve_aets(&key("1.2.3.1", "1.2.3.1.9"), &[ae("AE1")])
            .unwrap_err();
        assert!(matches!(err, ArchiveStoreError::InstanceNotFound(_)));

        let err = store
            .set_study_external_retrieve_aet(&"9.9".parse().unwrap(), &ae("AE1"))
            .unwrap_err();
        assert!(matches!(err, ArchiveStoreError::StudyNotFound(_)));

        let err = store
            .insert_instance(Instance::new("7.7".parse().unwrap(), "7.7.1".parse().unwrap()))
            .unwrap_err();
        assert!(matches!(err, ArchiveStoreError::SeriesNotFound(_)));
    }

    #[test]
    fn duplicate_instance_key_conflicts() {
        let store = seeded();
        let err = store
            .insert_instance(Instance::new("1.2.3.1".parse().unwrap(), "1.2.3.1.1".parse().unwrap()))
            .unwrap_err();
        assert!(matches!(err, ArchiveStoreError::Conflict(_)));
    }

    #[test]
    fn restore_discards_retrieve_aet_changes() {
        let store = seeded();
        let study_uid: StudyInstanceUid = "1.2.3".parse().unwrap();
        let k = key("1.2.3.1", "1.2.3.1.1");

        store.checkpoint().unwrap();
        store.add_external_retrieve_aets(&k, &[ae("AE1")]).unwrap();
        store.set_study_external_retrieve_aet(&study_uid, &ae("AE1")).unwrap();
        store.restore().unwrap();

        assert!(store.instance(&k).unwrap().unwrap().external_retrieve_aets().is_empty());
        assert!(store.study(&study_uid).unwrap().unwrap().external_retrieve_aet().is_none());
    }

    #[test]
    fn restore_keeps_writes_from_other_threads() {
        let store = std::sync::Arc::new(seeded());
        let study_uid: StudyInstanceUid = "1.2.3".parse().unwrap();
        let k = key("1.2.3.1", "1.2.3.1.1");

        store.checkpoint().unwrap();
        store.add_external_retrieve_aets(&k, &[ae("AE1")]).unwrap();
        store.set_study_external_retrieve_aet(&study_uid, &ae("AE1")).unwrap();
        {
            let store = store.clone();
            let k = k.clone();
            std::thread::spawn(move || {
                store.insert_study(Study::new("9.9.9".parse().unwrap())).unwrap();
                store.add_external_retrieve_aets(&k, &[ae("AE2")]).unwrap();
            })
            .join()
            .unwrap();
        }
        store.restore().unwrap();

        assert!(store.study(&"9.9.9".parse().unwrap()).unwrap().is_some());
        let titles: Vec<String> = store
            .instance(&k)
            .unwrap()
            .unwrap()
            .external_retrieve_aets()
            .iter()
            .map(|a| a.to_string())
            .collect();
        assert_eq!(titles, vec!["AE2"]);
        assert!(store.study(&study_uid).unwrap().unwrap().external_retrieve_aet().is_none());
    }

    #[test]
    fn restore_removes_instances_inserted_by_the_owner() {
        let store = seeded();
        let k = key("1.2.3.1", "1.2.3.1.7");

        store.checkpoint().unwrap();
        store
            .insert_instance(Instance::new("1.2.4.1".parse().unwrap(), "1.2.4.1.7".parse().unwrap()))
            .unwrap();
        store
            .insert_instance(Instance::new("1.2.3.1".parse().unwrap(), "1.2.3.1.7".parse().unwrap()))
            .unwrap();
        store.restore().unwrap();

        assert!(store.instance(&k).unwrap().is_none());
        assert_eq!(store.instances_by_study(&"1.2.4".parse().unwrap()).unwrap().len(), 1);
        assert!(store.instance(&key("1.2.3.1", "1.2.3.1.1")).unwrap().is_some());
    }
}

