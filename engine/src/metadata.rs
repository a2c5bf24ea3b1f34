//! Dataset metadata.

use crate::{DatasetName, Record, SyncCount, Timestamp};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetStatus {
    #[default]
    Active,
    /// Tombstone, kept until the deletion is confirmed and purged
    Deleted,
}

impl DatasetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetStatus::Active => "active",
            DatasetStatus::Deleted => "deleted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(DatasetStatus::Active),
            "deleted" => Some(DatasetStatus::Deleted),
            _ => None,
        }
    }
}

/// Metadata describing one dataset of an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetMetadata {
    /// Dataset name, unique per identity
    pub name: DatasetName,
    /// When the dataset was created (milliseconds since epoch)
    pub creation_date: Timestamp,
    /// When any record of the dataset was last written
    pub last_modified_date: Timestamp,
    /// Device that last wrote to the dataset
    pub last_modified_by: String,
    /// Sum of key and value bytes of live records
    pub storage_size_bytes: u64,
    /// Number of live (non-deleted) records
    pub record_count: u64,
    /// Latest dataset counter observed on the remote store
    pub sync_count: SyncCount,
    /// Pull cursor: remote counter up to which changes were merged
    #[serde(default)]
    pub last_sync_count: SyncCount,
    #[serde(default)]
    pub status: DatasetStatus,
}

impl DatasetMetadata {
    /// Create metadata for a new, empty dataset.
    pub fn new(name: impl Into<DatasetName>, timestamp: Timestamp) -> Self {
        Self {
            name: name.into(),
            creation_date: timestamp,
            last_modified_date: timestamp,
            last_modified_by: String::new(),
            storage_size_bytes: 0,
            record_count: 0,
            sync_count: 0,
            last_sync_count: 0,
            status: DatasetStatus::Active,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.status == DatasetStatus::Deleted
    }

    /// Recompute record count and storage size from the given records.
    pub fn recount<'a>(&mut self, records: impl Iterator<Item = &'a Record>) {
        let (count, size) = records
            .filter(|r| !r.is_deleted())
            .fold((0u64, 0u64), |(count, size), r| {
                (count + 1, size + r.storage_size())
            });
        self.record_count = count;
        self.storage_size_bytes = size;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_metadata_is_empty_and_active() {
        let metadata = DatasetMetadata::new("scores", 1000);
        assert_eq!(metadata.name, "scores");
        assert_eq!(metadata.creation_date, 1000);
        assert_eq!(metadata.record_count, 0);
        assert_eq!(metadata.last_sync_count, 0);
        assert!(!metadata.is_deleted());
    }

    #[test]
    fn recount_skips_tombstones() {
        let live = Record::new("high", Some("90".into()), "d", 1);
        let gone = Record::new("low", None, "d", 1);

        let mut metadata = DatasetMetadata::new("scores", 1000);
        metadata.recount([live, gone].iter());

        assert_eq!(metadata.record_count, 1);
        assert_eq!(metadata.storage_size_bytes, 6);
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [DatasetStatus::Active, DatasetStatus::Deleted] {
            assert_eq!(DatasetStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(DatasetStatus::parse("gone"), None);
    }

    #[test]
    fn serialization_format() {
        let metadata = DatasetMetadata::new("scores", 1000);
        let json = serde_json::to_string(&metadata).unwrap();
        assert!(json.contains("lastSyncCount"));
        assert!(json.contains("\"status\":\"active\""));
    }
}
