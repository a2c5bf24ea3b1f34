//! In-memory local store.
//!
//! Same semantics as the SQLite store, without durability across process
//! restarts. Used as the fallback cache and in tests.

use super::{remote_metadata_action, DatasetState, LocalStore, RemoteMetadataAction, SyncCommit};
use crate::{
    error::Result, now_millis, validate::validate_dataset_name, DatasetMetadata, DatasetName,
    DatasetStatus, Error, Identity, Record, RecordKey,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

type Datasets = BTreeMap<DatasetName, DatasetState>;

#[derive(Debug, Default)]
pub struct MemoryStore {
    identities: Mutex<HashMap<Identity, Datasets>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_dataset<T>(
        &self,
        identity: &str,
        dataset: &str,
        f: impl FnOnce(&mut DatasetState) -> T,
    ) -> Result<T> {
        let mut identities = self.identities.lock();
        let state = identities
            .get_mut(identity)
            .and_then(|datasets| datasets.get_mut(dataset))
            .ok_or_else(|| Error::DatasetNotFound(dataset.to_string()))?;
        Ok(f(state))
    }

    fn read_dataset<T>(
        &self,
        identity: &str,
        dataset: &str,
        f: impl FnOnce(&DatasetState) -> T,
    ) -> Option<T> {
        self.identities
            .lock()
            .get(identity)
            .and_then(|datasets| datasets.get(dataset))
            .map(f)
    }
}

impl LocalStore for MemoryStore {
    fn create_dataset(&self, identity: &str, dataset: &str) -> Result<DatasetMetadata> {
        validate_dataset_name(dataset)?;
        let mut identities = self.identities.lock();
        let state = identities
            .entry(identity.to_string())
            .or_default()
            .entry(dataset.to_string())
            .or_insert_with(|| DatasetState::new(dataset, now_millis()));
        state.metadata.status = DatasetStatus::Active;
        Ok(state.metadata.clone())
    }

    fn get_dataset_metadata(&self, identity: &str) -> Result<Vec<DatasetMetadata>> {
        Ok(self
            .identities
            .lock()
            .get(identity)
            .map(|datasets| datasets.values().map(|s| s.metadata.clone()).collect())
            .unwrap_or_default())
    }

    fn get_metadata(&self, identity: &str, dataset: &str) -> Result<Option<DatasetMetadata>> {
        Ok(self.read_dataset(identity, dataset, |s| s.metadata.clone()))
    }

    fn get_records(&self, identity: &str, dataset: &str) -> Result<BTreeMap<RecordKey, Record>> {
        Ok(self
            .read_dataset(identity, dataset, |s| s.records.clone())
            .unwrap_or_default())
    }

    fn get_record(&self, identity: &str, dataset: &str, key: &str) -> Result<Option<Record>> {
        Ok(self
            .read_dataset(identity, dataset, |s| s.records.get(key).cloned())
            .flatten())
    }

    fn put_record(&self, identity: &str, dataset: &str, record: Record) -> Result<()> {
        self.with_dataset(identity, dataset, |state| state.put_local(record))
    }

    fn commit_sync(&self, identity: &str, dataset: &str, commit: SyncCommit) -> Result<()> {
        self.with_dataset(identity, dataset, |state| state.commit(commit))
    }

    fn update_dataset_metadata(
        &self,
        identity: &str,
        metadata: Vec<DatasetMetadata>,
    ) -> Result<Vec<DatasetName>> {
        let mut identities = self.identities.lock();
        let datasets = identities.entry(identity.to_string()).or_default();
        let mut conflicts = Vec::new();

        for remote in metadata {
            match remote_metadata_action(datasets.get(&remote.name), &remote) {
                RemoteMetadataAction::Skip => {}
                RemoteMetadataAction::Purge => {
                    datasets.remove(&remote.name);
                }
                RemoteMetadataAction::Conflict => conflicts.push(remote.name.clone()),
                RemoteMetadataAction::Apply => datasets
                    .entry(remote.name.clone())
                    .or_insert_with(|| DatasetState::new(&remote.name, remote.creation_date))
                    .apply_remote_metadata(&remote),
            }
        }

        Ok(conflicts)
    }

    fn mark_dataset_deleted(&self, identity: &str, dataset: &str, device_id: &str) -> Result<()> {
        self.with_dataset(identity, dataset, |state| {
            state.mark_deleted(device_id, now_millis())
        })
    }

    fn purge_dataset(&self, identity: &str, dataset: &str) -> Result<()> {
        if let Some(datasets) = self.identities.lock().get_mut(identity) {
            datasets.remove(dataset);
        }
        Ok(())
    }

    fn change_identity_id(&self, old: &str, new: &str) -> Result<()> {
        let mut identities = self.identities.lock();
        let Some(moved) = identities.remove(old) else {
            return Ok(());
        };

        let target = identities.entry(new.to_string()).or_default();
        for (name, state) in moved {
            match target.get_mut(&name) {
                Some(existing) => existing.absorb(state),
                None => {
                    target.insert(name, state);
                }
            }
        }
        Ok(())
    }

    fn wipe_data(&self) -> Result<()> {
        self.identities.lock().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::CommitRecord;

    fn put(store: &MemoryStore, identity: &str, key: &str, value: &str) {
        store
            .put_record(
                identity,
                "scores",
                Record::new(key, Some(value.into()), "device", 1000),
            )
            .unwrap();
    }

    #[test]
    fn create_is_idempotent() {
        let store = MemoryStore::new();
        let first = store.create_dataset("id-1", "scores").unwrap();
        let second = store.create_dataset("id-1", "scores").unwrap();
        assert_eq!(first, second);
        assert_eq!(store.get_dataset_metadata("id-1").unwrap().len(), 1);
    }

    #[test]
    fn create_rejects_bad_name_without_row() {
        let store = MemoryStore::new();
        let err = store.create_dataset("id-1", "bad name!").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(store.get_dataset_metadata("id-1").unwrap().is_empty());
    }

    #[test]
    fn put_marks_modified_and_counts() {
        let store = MemoryStore::new();
        store.create_dataset("id-1", "scores").unwrap();

        let mut record = Record::new("high", Some("90".into()), "device", 1000);
        record.modified = false;
        store.put_record("id-1", "scores", record).unwrap();

        let stored = store.get_record("id-1", "scores", "high").unwrap().unwrap();
        assert!(stored.modified);

        let metadata = store.get_metadata("id-1", "scores").unwrap().unwrap();
        assert_eq!(metadata.record_count, 1);
        assert_eq!(metadata.last_modified_by, "device");
    }

    #[test]
    fn put_into_missing_dataset_fails() {
        let store = MemoryStore::new();
        let err = store
            .put_record("id-1", "scores", Record::new("k", None, "d", 1))
            .unwrap_err();
        assert_eq!(err, Error::DatasetNotFound("scores".into()));
    }

    #[test]
    fn commit_clears_modified_and_moves_cursor() {
        let store = MemoryStore::new();
        store.create_dataset("id-1", "scores").unwrap();
        put(&store, "id-1", "high", "95");
        let snapshot = store.get_record("id-1", "scores", "high").unwrap();

        store
            .commit_sync(
                "id-1",
                "scores",
                SyncCommit {
                    records: vec![CommitRecord {
                        record: snapshot.clone().unwrap().confirmed(4),
                        snapshot,
                    }],
                    sync_count: 4,
                    last_sync_count: 4,
                },
            )
            .unwrap();

        let stored = store.get_record("id-1", "scores", "high").unwrap().unwrap();
        assert_eq!(stored.sync_count, 4);
        assert!(!stored.modified);
        let metadata = store.get_metadata("id-1", "scores").unwrap().unwrap();
        assert_eq!(metadata.last_sync_count, 4);
    }

    #[test]
    fn remote_deletion_with_pending_changes_conflicts() {
        let store = MemoryStore::new();
        store.create_dataset("id-1", "scores").unwrap();
        store.create_dataset("id-1", "settings").unwrap();
        put(&store, "id-1", "high", "95");

        let mut scores = DatasetMetadata::new("scores", 0);
        scores.status = DatasetStatus::Deleted;
        let mut settings = DatasetMetadata::new("settings", 0);
        settings.status = DatasetStatus::Deleted;

        let conflicts = store
            .update_dataset_metadata("id-1", vec![scores, settings])
            .unwrap();

        assert_eq!(conflicts, vec!["scores".to_string()]);
        assert!(store.get_record("id-1", "scores", "high").unwrap().is_some());
        assert!(store.get_metadata("id-1", "settings").unwrap().is_none());
    }

    #[test]
    fn remote_metadata_creates_local_rows() {
        let store = MemoryStore::new();
        let mut remote = DatasetMetadata::new("profile", 500);
        remote.sync_count = 7;
        remote.record_count = 3;

        store.update_dataset_metadata("id-1", vec![remote]).unwrap();

        let local = store.get_metadata("id-1", "profile").unwrap().unwrap();
        assert_eq!(local.sync_count, 7);
        assert_eq!(local.last_sync_count, 0);
        assert_eq!(local.record_count, 0);
        assert_eq!(local.creation_date, 500);
    }

    #[test]
    fn change_identity_moves_rows() {
        let store = MemoryStore::new();
        store.create_dataset("anon", "scores").unwrap();
        put(&store, "anon", "high", "90");

        store.change_identity_id("anon", "user").unwrap();

        assert!(store.get_dataset_metadata("anon").unwrap().is_empty());
        assert!(store.get_records("anon", "scores").unwrap().is_empty());
        let records = store.get_records("user", "scores").unwrap();
        assert_eq!(records["high"].value.as_deref(), Some("90"));
    }

    #[test]
    fn wipe_removes_everything() {
        let store = MemoryStore::new();
        store.create_dataset("a", "scores").unwrap();
        store.create_dataset("b", "scores").unwrap();
        store.wipe_data().unwrap();
        assert!(store.get_dataset_metadata("a").unwrap().is_empty());
        assert!(store.get_dataset_metadata("b").unwrap().is_empty());
    }
}
