//! In-process remote store.
//!
//! Applies the [`crate::authority`] rules to datasets held in memory.
//! Shared between several managers it behaves like one server seen by
//! several devices.

use super::{PushResponse, RecordPage, RecordPush, RemoteStore};
use crate::authority::DatasetAuthority;
use crate::{error::Result, now_millis, DatasetMetadata, Error, Identity, SyncCount};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

/// Remote store backed by memory.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    identities: Mutex<HashMap<Identity, BTreeMap<String, DatasetAuthority>>>,
    offline: AtomicBool,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate loss of connectivity: every call fails with a service error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Snapshot of a dataset's authoritative state.
    pub fn dataset(&self, identity: &str, dataset: &str) -> Option<DatasetAuthority> {
        self.identities
            .lock()
            .get(identity)
            .and_then(|datasets| datasets.get(dataset))
            .cloned()
    }

    /// Install a dataset as-is, replacing any existing one.
    pub fn insert_dataset(&self, identity: &str, authority: DatasetAuthority) {
        self.identities
            .lock()
            .entry(identity.to_string())
            .or_default()
            .insert(authority.name.clone(), authority);
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::service("unavailable", "remote store is offline"));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn get_dataset_metadata(&self, identity: &str) -> Result<Vec<DatasetMetadata>> {
        self.check_online()?;
        Ok(self
            .identities
            .lock()
            .get(identity)
            .map(|datasets| datasets.values().map(DatasetAuthority::metadata).collect())
            .unwrap_or_default())
    }

    async fn list_records(
        &self,
        identity: &str,
        dataset: &str,
        since: SyncCount,
    ) -> Result<RecordPage> {
        self.check_online()?;
        Ok(self
            .identities
            .lock()
            .get(identity)
            .and_then(|datasets| datasets.get(dataset))
            .map(|d| d.list_since(since))
            .unwrap_or_default())
    }

    async fn put_records(
        &self,
        identity: &str,
        dataset: &str,
        device_id: &str,
        records: Vec<RecordPush>,
    ) -> Result<PushResponse> {
        self.check_online()?;
        let now = now_millis();
        let mut identities = self.identities.lock();
        let authority = identities
            .entry(identity.to_string())
            .or_default()
            .entry(dataset.to_string())
            .or_insert_with(|| DatasetAuthority::new(dataset, now));
        Ok(authority.apply_push(records, device_id, now))
    }

    async fn delete_dataset(&self, identity: &str, dataset: &str) -> Result<()> {
        self.check_online()?;
        if let Some(authority) = self
            .identities
            .lock()
            .get_mut(identity)
            .and_then(|datasets| datasets.get_mut(dataset))
        {
            authority.delete(now_millis());
        }
        Ok(())
    }
}
