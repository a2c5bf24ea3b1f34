//! Optimistic-concurrency rules of the authoritative store.
//!
//! This is the server half of the protocol, kept free of IO so the
//! in-process remote and the HTTP server apply exactly the same rules.
//!
//! # Rules
//!
//! 1. Each dataset has a counter. An accepted push batch bumps it by one.
//! 2. Every record accepted in that batch gets the new counter as its
//!    `sync_count`, so listing "since N" returns exactly the later writes.
//! 3. A pushed record conflicts when the stored version has a
//!    `sync_count` above the push's `base_sync_count`.
//! 4. A batch with no accepted record leaves the counter unchanged.
//! 5. Deleting a dataset drops its records and bumps the counter. Listings
//!    from before that counter are flagged as reset.

use crate::remote::{PushOutcome, PushResponse, RecordPage, RecordPush};
use crate::{
    DatasetMetadata, DatasetName, DatasetStatus, Record, RecordKey, SyncCount, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Authoritative state of one dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetAuthority {
    pub name: DatasetName,
    /// Stored records, all with `modified == false`
    pub records: BTreeMap<RecordKey, Record>,
    pub sync_count: SyncCount,
    pub creation_date: Timestamp,
    pub last_modified_date: Timestamp,
    pub last_modified_by: String,
    pub status: DatasetStatus,
    /// Counter the latest deletion was recorded at, 0 if never deleted
    #[serde(default)]
    pub deleted_sync_count: SyncCount,
}

impl DatasetAuthority {
    /// Create an empty dataset.
    pub fn new(name: impl Into<DatasetName>, timestamp: Timestamp) -> Self {
        Self {
            name: name.into(),
            records: BTreeMap::new(),
            sync_count: 0,
            creation_date: timestamp,
            last_modified_date: timestamp,
            last_modified_by: String::new(),
            status: DatasetStatus::Active,
            deleted_sync_count: 0,
        }
    }

    /// Records written after `since`, in key order.
    pub fn list_since(&self, since: SyncCount) -> RecordPage {
        RecordPage {
            records: self
                .records
                .values()
                .filter(|r| r.sync_count > since)
                .cloned()
                .collect(),
            sync_count: self.sync_count,
            status: self.status,
            reset: since < self.deleted_sync_count,
        }
    }

    /// Apply a push batch.
    ///
    /// Returns one outcome per push, in input order. Pushing to a deleted
    /// dataset revives it.
    pub fn apply_push(
        &mut self,
        pushes: Vec<RecordPush>,
        device_id: &str,
        timestamp: Timestamp,
    ) -> PushResponse {
        let next = self.sync_count + 1;
        let mut outcomes = Vec::with_capacity(pushes.len());
        let mut accepted_any = false;

        for push in pushes {
            if let Some(stored) = self.records.get(&push.record.key) {
                if stored.sync_count > push.base_sync_count {
                    outcomes.push(PushOutcome::conflict(stored.clone()));
                    continue;
                }
            }

            let record = Record {
                key: push.record.key,
                value: push.record.value,
                sync_count: next,
                last_modified_date: timestamp,
                last_modified_by: push.record.last_modified_by,
                device_last_modified_date: push.record.device_last_modified_date,
                modified: false,
            };
            outcomes.push(PushOutcome::accepted(record.key.clone(), next));
            self.records.insert(record.key.clone(), record);
            accepted_any = true;
        }

        if accepted_any {
            self.sync_count = next;
            self.last_modified_date = timestamp;
            self.last_modified_by = device_id.to_string();
            self.status = DatasetStatus::Active;
        }

        PushResponse {
            outcomes,
            sync_count: self.sync_count,
        }
    }

    /// Delete the dataset, leaving a tombstone that keeps the counter.
    pub fn delete(&mut self, timestamp: Timestamp) {
        self.records.clear();
        self.sync_count += 1;
        self.deleted_sync_count = self.sync_count;
        self.last_modified_date = timestamp;
        self.status = DatasetStatus::Deleted;
    }

    /// Metadata as reported to clients.
    pub fn metadata(&self) -> DatasetMetadata {
        let mut metadata = DatasetMetadata {
            name: self.name.clone(),
            creation_date: self.creation_date,
            last_modified_date: self.last_modified_date,
            last_modified_by: self.last_modified_by.clone(),
            storage_size_bytes: 0,
            record_count: 0,
            sync_count: self.sync_count,
            last_sync_count: self.sync_count,
            status: self.status,
        };
        metadata.recount(self.records.values());
        metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::PushStatus;

    fn push(key: &str, value: Option<&str>, base: SyncCount) -> RecordPush {
        RecordPush::new(
            Record::new(key, value.map(String::from), "device-a", 1000),
            base,
        )
    }

    #[test]
    fn accepted_batch_bumps_counter_once() {
        let mut dataset = DatasetAuthority::new("scores", 0);
        let response = dataset.apply_push(
            vec![push("high", Some("90"), 0), push("low", Some("10"), 0)],
            "device-a",
            1000,
        );

        assert_eq!(response.sync_count, 1);
        assert_eq!(response.outcomes, vec![
            PushOutcome::accepted("high", 1),
            PushOutcome::accepted("low", 1),
        ]);
        assert!(dataset.records.values().all(|r| !r.modified));
        assert_eq!(dataset.last_modified_by, "device-a");
    }

    #[test]
    fn stale_base_conflicts() {
        let mut dataset = DatasetAuthority::new("scores", 0);
        dataset.apply_push(vec![push("high", Some("90"), 0)], "device-a", 1000);
        dataset.apply_push(vec![push("high", Some("100"), 1)], "device-b", 2000);
        assert_eq!(dataset.sync_count, 2);

        let response = dataset.apply_push(vec![push("high", Some("95"), 1)], "device-a", 3000);
        assert_eq!(response.sync_count, 2);
        match &response.outcomes[0].status {
            PushStatus::Conflict { remote } => {
                assert_eq!(remote.value.as_deref(), Some("100"));
                assert_eq!(remote.sync_count, 2);
            }
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[test]
    fn partial_batch_commits_accepted_records() {
        let mut dataset = DatasetAuthority::new("scores", 0);
        dataset.apply_push(vec![push("high", Some("90"), 0)], "device-a", 1000);
        dataset.apply_push(vec![push("high", Some("91"), 1)], "device-b", 1500);

        let response = dataset.apply_push(
            vec![push("high", Some("95"), 1), push("low", Some("5"), 0)],
            "device-a",
            2000,
        );

        assert_eq!(response.sync_count, 3);
        assert!(matches!(response.outcomes[0].status, PushStatus::Conflict { .. }));
        assert_eq!(response.outcomes[1], PushOutcome::accepted("low", 3));
    }

    #[test]
    fn list_since_filters_by_sync_count() {
        let mut dataset = DatasetAuthority::new("scores", 0);
        dataset.apply_push(vec![push("a", Some("1"), 0)], "d", 1);
        dataset.apply_push(vec![push("b", Some("2"), 0)], "d", 2);

        let page = dataset.list_since(1);
        assert_eq!(page.sync_count, 2);
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].key, "b");

        assert_eq!(dataset.list_since(0).records.len(), 2);
        assert!(dataset.list_since(2).records.is_empty());
    }

    #[test]
    fn delete_leaves_tombstone_and_push_revives() {
        let mut dataset = DatasetAuthority::new("scores", 0);
        dataset.apply_push(vec![push("a", Some("1"), 0)], "d", 1);
        dataset.delete(5);

        let metadata = dataset.metadata();
        assert_eq!(metadata.status, DatasetStatus::Deleted);
        assert_eq!(metadata.record_count, 0);
        assert_eq!(metadata.sync_count, 2);

        dataset.apply_push(vec![push("a", Some("2"), 0)], "d", 6);
        assert_eq!(dataset.status, DatasetStatus::Active);
        assert_eq!(dataset.sync_count, 3);
    }

    #[test]
    fn listing_across_a_deletion_is_reset() {
        let mut dataset = DatasetAuthority::new("scores", 0);
        dataset.apply_push(vec![push("a", Some("1"), 0)], "d", 1);
        dataset.delete(5);

        let page = dataset.list_since(1);
        assert!(page.reset);
        assert_eq!(page.status, DatasetStatus::Deleted);
        assert_eq!(page.sync_count, 2);
        assert!(page.records.is_empty());

        dataset.apply_push(vec![push("b", Some("2"), 0)], "d", 6);
        let page = dataset.list_since(1);
        assert!(page.reset);
        assert_eq!(page.status, DatasetStatus::Active);
        assert_eq!(page.records.len(), 1);

        let page = dataset.list_since(2);
        assert!(!page.reset);
        assert_eq!(page.records[0].key, "b");
    }

    #[test]
    fn tombstones_are_stored_and_listed() {
        let mut dataset = DatasetAuthority::new("scores", 0);
        dataset.apply_push(vec![push("a", Some("1"), 0)], "d", 1);
        dataset.apply_push(vec![push("a", None, 1)], "d", 2);

        let page = dataset.list_since(1);
        assert_eq!(page.records.len(), 1);
        assert!(page.records[0].is_deleted());
        assert_eq!(dataset.metadata().record_count, 0);
    }
}
