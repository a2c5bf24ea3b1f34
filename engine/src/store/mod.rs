//! Local stores.
//!
//! A local store persists dataset metadata and records per identity. It is
//! the only shared mutable state in the engine and serializes its own
//! mutations; every call is durable before it returns.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::{
    error::Result, DatasetMetadata, DatasetName, DatasetStatus, Record, RecordKey, SyncCount,
    Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A remote-confirmed record to write during a sync commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRecord {
    /// Confirmed state, `modified == false`
    pub record: Record,
    /// The local row the session planned against (`None` if absent)
    pub snapshot: Option<Record>,
}

/// Everything a finished sync session writes, applied atomically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCommit {
    pub records: Vec<CommitRecord>,
    /// Latest remote dataset counter observed
    pub sync_count: SyncCount,
    /// New pull cursor
    pub last_sync_count: SyncCount,
}

impl SyncCommit {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Persistence contract of the local cache.
pub trait LocalStore: Send + Sync {
    /// Create dataset metadata if absent. Reopening a locally deleted
    /// dataset makes it active again.
    fn create_dataset(&self, identity: &str, dataset: &str) -> Result<DatasetMetadata>;

    /// Metadata of every dataset of an identity.
    fn get_dataset_metadata(&self, identity: &str) -> Result<Vec<DatasetMetadata>>;

    fn get_metadata(&self, identity: &str, dataset: &str) -> Result<Option<DatasetMetadata>>;

    fn get_records(&self, identity: &str, dataset: &str) -> Result<BTreeMap<RecordKey, Record>>;

    fn get_record(&self, identity: &str, dataset: &str, key: &str) -> Result<Option<Record>>;

    /// Local write: upserts the record with `modified = true`.
    fn put_record(&self, identity: &str, dataset: &str, record: Record) -> Result<()>;

    /// Apply the result of a sync session.
    fn commit_sync(&self, identity: &str, dataset: &str, commit: SyncCommit) -> Result<()>;

    /// Merge metadata fetched from the remote store.
    ///
    /// Returns the names of datasets deleted remotely that still hold
    /// local changes; those are left untouched.
    fn update_dataset_metadata(
        &self,
        identity: &str,
        metadata: Vec<DatasetMetadata>,
    ) -> Result<Vec<DatasetName>>;

    /// Mark a dataset deleted locally, tombstoning its records.
    fn mark_dataset_deleted(&self, identity: &str, dataset: &str, device_id: &str)
        -> Result<()>;

    /// Physically remove a dataset and its records.
    fn purge_dataset(&self, identity: &str, dataset: &str) -> Result<()>;

    /// Move every row of `old` to `new`, merging on collision.
    fn change_identity_id(&self, old: &str, new: &str) -> Result<()>;

    /// Remove all data of all identities.
    fn wipe_data(&self) -> Result<()>;
}

/// What a commit entry writes, given the row currently stored.
///
/// A row that changed since the session's snapshot holds a write made
/// while the session was waiting on the network: it stays dirty and only
/// picks up the confirmed sync count.
pub(crate) fn resolve_commit(current: Option<&Record>, entry: CommitRecord) -> Record {
    match current {
        Some(current) if current.modified && entry.snapshot.as_ref() != Some(current) => {
            let mut kept = current.clone();
            kept.sync_count = kept.sync_count.max(entry.record.sync_count);
            kept
        }
        _ => entry.record,
    }
}

/// Which version survives when two identities hold the same record key.
///
/// Higher sync count wins, then the dirty row, then the row already owned
/// by the target identity.
pub(crate) fn prefer_moved(target: &Record, moved: &Record) -> bool {
    match moved.sync_count.cmp(&target.sync_count) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => moved.modified && !target.modified,
    }
}

/// How a store reacts to one dataset's remote metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RemoteMetadataAction {
    /// Remote tombstone for a dataset we don't have
    Skip,
    /// Remote tombstone, nothing pending locally: drop the local copy
    Purge,
    /// Remote tombstone but local writes are pending: surface, keep data
    Conflict,
    /// Create or refresh the local metadata
    Apply,
}

pub(crate) fn remote_metadata_action(
    local: Option<&DatasetState>,
    remote: &DatasetMetadata,
) -> RemoteMetadataAction {
    match (remote.status, local) {
        (DatasetStatus::Active, _) => RemoteMetadataAction::Apply,
        (DatasetStatus::Deleted, None) => RemoteMetadataAction::Skip,
        (DatasetStatus::Deleted, Some(state)) if state.has_local_changes() => {
            RemoteMetadataAction::Conflict
        }
        (DatasetStatus::Deleted, Some(_)) => RemoteMetadataAction::Purge,
    }
}

/// Dataset metadata plus records, the unit the stores mutate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DatasetState {
    pub metadata: DatasetMetadata,
    pub records: BTreeMap<RecordKey, Record>,
}

impl DatasetState {
    pub fn new(name: &str, timestamp: Timestamp) -> Self {
        Self {
            metadata: DatasetMetadata::new(name, timestamp),
            records: BTreeMap::new(),
        }
    }

    pub fn has_local_changes(&self) -> bool {
        self.records.values().any(|r| r.modified)
    }

    pub fn put_local(&mut self, mut record: Record) {
        record.modified = true;
        self.metadata.last_modified_date = record.last_modified_date;
        self.metadata.last_modified_by = record.last_modified_by.clone();
        self.records.insert(record.key.clone(), record);
        self.recount();
    }

    pub fn commit(&mut self, commit: SyncCommit) {
        for entry in commit.records {
            let key = entry.record.key.clone();
            let record = resolve_commit(self.records.get(&key), entry);
            self.records.insert(key, record);
        }
        self.metadata.sync_count = self.metadata.sync_count.max(commit.sync_count);
        self.metadata.last_sync_count = commit.last_sync_count;
        self.recount();
    }

    pub fn mark_deleted(&mut self, device_id: &str, timestamp: Timestamp) {
        for record in self.records.values_mut() {
            if !record.is_deleted() || record.modified {
                *record = record.with_local_value(None, device_id, timestamp);
            }
        }
        self.metadata.status = DatasetStatus::Deleted;
        self.metadata.last_modified_date = timestamp;
        self.metadata.last_modified_by = device_id.to_string();
        self.recount();
    }

    /// Take remote-reported fields; counts stay derived from local records.
    pub fn apply_remote_metadata(&mut self, remote: &DatasetMetadata) {
        self.metadata.creation_date = remote.creation_date;
        self.metadata.last_modified_date = remote.last_modified_date;
        self.metadata.last_modified_by = remote.last_modified_by.clone();
        self.metadata.sync_count = remote.sync_count;
    }

    /// Fold another identity's copy of this dataset into this one.
    pub fn absorb(&mut self, other: DatasetState) {
        for (key, moved) in other.records {
            let keep_target = self
                .records
                .get(&key)
                .is_some_and(|target| !prefer_moved(target, &moved));
            if !keep_target {
                self.records.insert(key, moved);
            }
        }

        let theirs = other.metadata;
        let ours = &mut self.metadata;
        ours.creation_date = ours.creation_date.min(theirs.creation_date);
        if theirs.last_modified_date > ours.last_modified_date {
            ours.last_modified_date = theirs.last_modified_date;
            ours.last_modified_by = theirs.last_modified_by;
        }
        ours.sync_count = ours.sync_count.max(theirs.sync_count);
        // Re-pull from the older cursor; already-merged records come back as no-ops.
        ours.last_sync_count = ours.last_sync_count.min(theirs.last_sync_count);
        if theirs.status == DatasetStatus::Active {
            ours.status = DatasetStatus::Active;
        }
        self.recount();
    }

    fn recount(&mut self) {
        self.metadata.recount(self.records.values());
    }
}
