//! Shared fixtures for the engine integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use satchel_engine::{
    CommitRecord, Credentials, DatasetAuthority, DatasetMetadata, Error, LocalStore, MemoryRemote,
    MemoryStore, PushResponse, Record, RecordPage, RecordPush, RemoteStore, Result, SyncCommit,
    SyncConfig, SyncCount, SyncManager,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Remote wrapper that counts calls, can hold a pull open, can inject
/// writes from another device right before a push lands, and can fail
/// pushes from a given call on.
#[derive(Default)]
pub struct TestRemote {
    pub inner: MemoryRemote,
    pub list_calls: AtomicUsize,
    pub put_calls: AtomicUsize,
    gated: AtomicBool,
    /// Notified when a gated pull starts
    pub entered: Notify,
    /// Releases a gated pull
    pub release: Notify,
    /// Notified whenever a push call starts
    pub pushing: Notify,
    /// 1-based push call from which pushes fail, 0 for never
    fail_puts_from: AtomicUsize,
    interleaved: Mutex<VecDeque<RecordPush>>,
}

impl TestRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_gated(&self, gated: bool) {
        self.gated.store(gated, Ordering::SeqCst);
    }

    /// Fail the `call`-th push and every later one. 0 turns failures off.
    pub fn fail_puts_from(&self, call: usize) {
        self.fail_puts_from.store(call, Ordering::SeqCst);
    }

    /// Queue a foreign write, applied at the start of the next push call.
    pub fn interleave(&self, push: RecordPush) {
        self.interleaved.lock().push_back(push);
    }

    pub fn puts(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }

    pub fn lists(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteStore for TestRemote {
    async fn get_dataset_metadata(&self, identity: &str) -> Result<Vec<DatasetMetadata>> {
        self.inner.get_dataset_metadata(identity).await
    }

    async fn list_records(
        &self,
        identity: &str,
        dataset: &str,
        since: SyncCount,
    ) -> Result<RecordPage> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.gated.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.list_records(identity, dataset, since).await
    }

    async fn put_records(
        &self,
        identity: &str,
        dataset: &str,
        device_id: &str,
        records: Vec<RecordPush>,
    ) -> Result<PushResponse> {
        let call = self.put_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.pushing.notify_one();
        let fail_from = self.fail_puts_from.load(Ordering::SeqCst);
        if fail_from != 0 && call >= fail_from {
            return Err(Error::service("unavailable", "push rejected by test remote"));
        }
        let foreign = self.interleaved.lock().pop_front();
        if let Some(push) = foreign {
            self.inner
                .put_records(identity, dataset, "other-device", vec![push])
                .await?;
        }
        self.inner
            .put_records(identity, dataset, device_id, records)
            .await
    }

    async fn delete_dataset(&self, identity: &str, dataset: &str) -> Result<()> {
        self.inner.delete_dataset(identity, dataset).await
    }
}

/// One client: credentials, a local cache and a manager.
pub struct Device {
    pub credentials: Arc<Credentials>,
    pub local: Arc<MemoryStore>,
    pub manager: SyncManager,
}

pub fn device(remote: &Arc<TestRemote>, identity: Option<&str>, device_id: &str) -> Device {
    let credentials = Arc::new(Credentials::new(identity));
    let local = Arc::new(MemoryStore::new());
    let manager = SyncManager::builder(credentials.clone(), local.clone(), remote.clone())
        .config(SyncConfig::new(device_id))
        .build();
    Device {
        credentials,
        local,
        manager,
    }
}

/// A record as the remote store confirmed it.
pub fn synced(key: &str, value: &str, sync_count: SyncCount, modified_at: u64) -> Record {
    Record::new(key, Some(value.into()), "seed-device", modified_at).confirmed(sync_count)
}

/// A pending local write based on `sync_count`.
pub fn dirty(key: &str, value: &str, sync_count: SyncCount, modified_at: u64) -> Record {
    let mut record = Record::new(key, Some(value.into()), "local-device", modified_at);
    record.sync_count = sync_count;
    record
}

/// Create a local dataset holding `records`, pulled up to `sync_count`.
pub fn seed_local(
    store: &dyn LocalStore,
    identity: &str,
    dataset: &str,
    records: Vec<Record>,
    sync_count: SyncCount,
) {
    store.create_dataset(identity, dataset).unwrap();
    let (dirty, clean): (Vec<_>, Vec<_>) = records.into_iter().partition(|r| r.modified);
    store
        .commit_sync(
            identity,
            dataset,
            SyncCommit {
                records: clean
                    .into_iter()
                    .map(|record| CommitRecord {
                        record,
                        snapshot: None,
                    })
                    .collect(),
                sync_count,
                last_sync_count: sync_count,
            },
        )
        .unwrap();
    for record in dirty {
        store.put_record(identity, dataset, record).unwrap();
    }
}

/// Install an authoritative dataset at counter `sync_count`.
pub fn seed_remote(
    remote: &MemoryRemote,
    identity: &str,
    dataset: &str,
    records: Vec<Record>,
    sync_count: SyncCount,
) {
    let mut authority = DatasetAuthority::new(dataset, 0);
    for record in records {
        authority.records.insert(record.key.clone(), record);
    }
    authority.sync_count = sync_count;
    remote.insert_dataset(identity, authority);
}
