//! Record types for storing data.

use crate::{RecordKey, SyncCount, Timestamp};
use serde::{Deserialize, Serialize};

/// A key/value record inside a dataset.
///
/// A `None` value is a tombstone. Together with the `modified` flag this
/// gives four states: live and synced, live and dirty, confirmed deletion
/// (`None`, not modified) and pending local delete (`None`, modified).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Unique key within the dataset
    pub key: RecordKey,
    /// Record value, `None` when deleted
    pub value: Option<String>,
    /// Version assigned by the remote store on each accepted write
    pub sync_count: SyncCount,
    /// When the record was last written (milliseconds since epoch)
    pub last_modified_date: Timestamp,
    /// Device that last wrote the record
    pub last_modified_by: String,
    /// Device clock at the time of the last write
    pub device_last_modified_date: Timestamp,
    /// Local dirty flag, true until the remote store confirms the write
    #[serde(default)]
    pub modified: bool,
}

impl Record {
    /// Create a new locally written record that has never been synced.
    pub fn new(
        key: impl Into<RecordKey>,
        value: Option<String>,
        device_id: impl Into<String>,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            key: key.into(),
            value,
            sync_count: 0,
            last_modified_date: timestamp,
            last_modified_by: device_id.into(),
            device_last_modified_date: timestamp,
            modified: true,
        }
    }

    /// Check if the record is a tombstone.
    pub fn is_deleted(&self) -> bool {
        self.value.is_none()
    }

    /// Check if the record is a local delete that has not been pushed yet.
    pub fn is_pending_delete(&self) -> bool {
        self.value.is_none() && self.modified
    }

    /// Produce a local write on top of this record.
    ///
    /// The sync count is kept so the next push carries the version this
    /// write was based on.
    pub fn with_local_value(
        &self,
        value: Option<String>,
        device_id: &str,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            key: self.key.clone(),
            value,
            sync_count: self.sync_count,
            last_modified_date: timestamp,
            last_modified_by: device_id.to_string(),
            device_last_modified_date: timestamp,
            modified: true,
        }
    }

    /// Mark the record as confirmed by the remote store at `sync_count`.
    pub fn confirmed(mut self, sync_count: SyncCount) -> Self {
        self.sync_count = sync_count;
        self.modified = false;
        self
    }

    /// Whether two records carry the same synced state.
    pub fn same_content(&self, other: &Record) -> bool {
        self.value == other.value && self.sync_count == other.sync_count
    }

    /// Bytes this record contributes to the dataset storage size.
    pub fn storage_size(&self) -> u64 {
        match &self.value {
            Some(value) => (self.key.len() + value.len()) as u64,
            None => 0,
        }
    }
}
