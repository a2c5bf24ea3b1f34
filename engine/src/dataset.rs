//! Dataset handles.
//!
//! A [`Dataset`] is bound to the identity that was current when it was
//! opened. Every call first checks that identity against the credentials
//! provider, so a handle never reads or writes rows of another user.

use crate::config::SyncConfig;
use crate::identity::{resolve_identity, CredentialsProvider};
use crate::remote::RemoteStore;
use crate::resolver::ConflictResolver;
use crate::store::LocalStore;
use crate::sync::{SyncResult, SyncSession};
use crate::validate::validate_record_key;
use crate::{
    error::Result, now_millis, DatasetMetadata, DatasetName, Error, Identity, Record,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;

type SessionKey = (Identity, DatasetName);

/// State shared by a manager and every handle it opened.
pub(crate) struct Shared {
    pub credentials: Arc<dyn CredentialsProvider>,
    pub local: Arc<dyn LocalStore>,
    pub remote: Arc<dyn RemoteStore>,
    pub resolver: Arc<dyn ConflictResolver>,
    pub config: SyncConfig,
    /// Datasets with a session in flight
    pub sessions: DashMap<SessionKey, ()>,
}

impl Shared {
    pub fn current_identity(&self) -> Identity {
        resolve_identity(self.credentials.identity().as_deref())
    }
}

/// Marks a dataset as syncing until dropped.
#[derive(Debug)]
struct SessionGuard<'a> {
    sessions: &'a DashMap<SessionKey, ()>,
    key: SessionKey,
}

impl<'a> SessionGuard<'a> {
    fn acquire(sessions: &'a DashMap<SessionKey, ()>, identity: &str, dataset: &str) -> Result<Self> {
        let key = (identity.to_string(), dataset.to_string());
        match sessions.entry(key.clone()) {
            Entry::Occupied(_) => Err(Error::SyncInProgress {
                identity: key.0,
                dataset: key.1,
            }),
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(Self { sessions, key })
            }
        }
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.sessions.remove(&self.key);
    }
}

/// Handle to one dataset of one identity.
#[derive(Clone)]
pub struct Dataset {
    name: DatasetName,
    identity: Identity,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataset")
            .field("name", &self.name)
            .field("identity", &self.identity)
            .finish()
    }
}

impl Dataset {
    pub(crate) fn new(name: DatasetName, identity: Identity, shared: Arc<Shared>) -> Self {
        Self {
            name,
            identity,
            shared,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identity the handle was opened under.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    fn check_identity(&self) -> Result<()> {
        let current = self.shared.current_identity();
        if current != self.identity {
            return Err(Error::IdentityMismatch {
                bound: self.identity.clone(),
                current,
            });
        }
        Ok(())
    }

    fn local(&self) -> &dyn LocalStore {
        self.shared.local.as_ref()
    }

    /// Value of a record, `None` if absent or deleted.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.get_record(key)?.and_then(|record| record.value))
    }

    /// The full record, tombstones included.
    pub fn get_record(&self, key: &str) -> Result<Option<Record>> {
        self.check_identity()?;
        self.local().get_record(&self.identity, &self.name, key)
    }

    /// Write a value locally. It reaches the remote store on the next
    /// [`Dataset::synchronize`].
    pub fn put(&self, key: &str, value: impl Into<String>) -> Result<()> {
        self.write(key, Some(value.into()))
    }

    /// Delete a record locally, leaving a tombstone to push.
    pub fn remove(&self, key: &str) -> Result<()> {
        self.write(key, None)
    }

    fn write(&self, key: &str, value: Option<String>) -> Result<()> {
        self.check_identity()?;
        validate_record_key(key)?;

        let current = self.local().get_record(&self.identity, &self.name, key)?;
        let device_id = &self.shared.config.device_id;
        let record = match current {
            Some(current) if current.value == value => return Ok(()),
            Some(current) => current.with_local_value(value, device_id, now_millis()),
            // Nothing to delete
            None if value.is_none() => return Ok(()),
            None => Record::new(key, value, device_id.as_str(), now_millis()),
        };

        tracing::trace!(dataset = %self.name, key, deleted = record.is_deleted(), "local write");
        self.local().put_record(&self.identity, &self.name, record)
    }

    /// Every record of the dataset in key order, tombstones included.
    pub fn records(&self) -> Result<Vec<Record>> {
        self.check_identity()?;
        Ok(self
            .local()
            .get_records(&self.identity, &self.name)?
            .into_values()
            .collect())
    }

    pub fn metadata(&self) -> Result<DatasetMetadata> {
        self.check_identity()?;
        self.local()
            .get_metadata(&self.identity, &self.name)?
            .ok_or_else(|| Error::DatasetNotFound(self.name.clone()))
    }

    /// Delete the dataset locally. The next synchronize deletes it remotely
    /// and purges the local copy.
    pub fn delete(&self) -> Result<()> {
        self.check_identity()?;
        tracing::info!(dataset = %self.name, "dataset marked deleted");
        self.local()
            .mark_dataset_deleted(&self.identity, &self.name, &self.shared.config.device_id)
    }

    /// Merge the dataset with the remote store.
    pub async fn synchronize(&self) -> Result<SyncResult> {
        self.synchronize_until(std::future::pending()).await
    }

    /// Like [`Dataset::synchronize`], aborting with [`Error::Cancelled`] if
    /// `cancel` completes before the pull finishes.
    pub async fn synchronize_until<C>(&self, cancel: C) -> Result<SyncResult>
    where
        C: Future<Output = ()>,
    {
        self.check_identity()?;
        let shared = self.shared.as_ref();
        let _guard = SessionGuard::acquire(&shared.sessions, &self.identity, &self.name)?;

        SyncSession {
            local: shared.local.as_ref(),
            remote: shared.remote.as_ref(),
            resolver: shared.resolver.as_ref(),
            identity: &self.identity,
            dataset: &self.name,
            device_id: &shared.config.device_id,
        }
        .run(cancel)
        .await
    }
}
