//! Remote store seam.
//!
//! The remote store is the authority for dataset contents. The engine
//! talks to it through [`RemoteStore`] and never retries a failed call;
//! retry policy belongs to the transport behind the trait.

mod memory;

#[cfg(feature = "http")]
mod http;

pub use memory::MemoryRemote;

#[cfg(feature = "http")]
pub use http::HttpRemote;

use crate::{error::Result, DatasetMetadata, DatasetStatus, Record, RecordKey, SyncCount};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Records changed since a sync count, plus the dataset's current counter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPage {
    pub records: Vec<Record>,
    /// Sync token to persist once the page is merged
    pub sync_count: SyncCount,
    #[serde(default)]
    pub status: DatasetStatus,
    /// The dataset was deleted after `since`. Rows synced before the
    /// deletion no longer exist remotely unless listed in this page.
    #[serde(default)]
    pub reset: bool,
}

/// A record pushed with the remote version it was based on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPush {
    pub record: Record,
    pub base_sync_count: SyncCount,
}

impl RecordPush {
    pub fn new(record: Record, base_sync_count: SyncCount) -> Self {
        Self {
            record,
            base_sync_count,
        }
    }
}

/// Per-record result of a push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum PushStatus {
    /// The write was accepted at the given sync count
    #[serde(rename_all = "camelCase")]
    Accepted { sync_count: SyncCount },
    /// Another writer changed the record after the base sync count
    Conflict { remote: Record },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushOutcome {
    pub key: RecordKey,
    #[serde(flatten)]
    pub status: PushStatus,
}

impl PushOutcome {
    pub fn accepted(key: impl Into<RecordKey>, sync_count: SyncCount) -> Self {
        Self {
            key: key.into(),
            status: PushStatus::Accepted { sync_count },
        }
    }

    pub fn conflict(remote: Record) -> Self {
        Self {
            key: remote.key.clone(),
            status: PushStatus::Conflict { remote },
        }
    }
}

/// Response to a batched push.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    /// One outcome per pushed record, in request order
    pub outcomes: Vec<PushOutcome>,
    /// Dataset counter after the push
    pub sync_count: SyncCount,
}

/// Request body of a push over HTTP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    /// Device issuing the push
    pub device_id: String,
    pub records: Vec<RecordPush>,
}

/// Query parameters of a record listing over HTTP.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    #[serde(default)]
    pub since: SyncCount,
}

/// The authoritative store for the current identity.
///
/// Implementations are stateless proxies over a transport. Failures come
/// back as [`crate::Error::Service`].
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch metadata of every dataset known remotely, tombstones included.
    async fn get_dataset_metadata(&self, identity: &str) -> Result<Vec<DatasetMetadata>>;

    /// List records of a dataset changed after `since`.
    ///
    /// The page also reports whether the dataset was deleted after `since`,
    /// so a client holding older rows learns they are gone.
    async fn list_records(&self, identity: &str, dataset: &str, since: SyncCount)
        -> Result<RecordPage>;

    /// Push records, each checked against its base sync count.
    async fn put_records(
        &self,
        identity: &str,
        dataset: &str,
        device_id: &str,
        records: Vec<RecordPush>,
    ) -> Result<PushResponse>;

    /// Delete a dataset remotely.
    async fn delete_dataset(&self, identity: &str, dataset: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_outcome_wire_format() {
        let accepted = PushOutcome::accepted("high", 4);
        let json = serde_json::to_value(&accepted).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"key": "high", "status": "accepted", "syncCount": 4})
        );

        let remote = Record::new("high", Some("100".into()), "device-b", 1000).confirmed(5);
        let conflict = PushOutcome::conflict(remote.clone());
        let json = serde_json::to_value(&conflict).unwrap();
        assert_eq!(json["status"], "conflict");
        assert_eq!(json["remote"]["syncCount"], 5);

        let parsed: PushOutcome = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.status, PushStatus::Conflict { remote });
    }

    #[test]
    fn list_query_defaults_to_zero() {
        let query: ListQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.since, 0);
    }
}
