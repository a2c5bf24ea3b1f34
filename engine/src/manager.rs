//! The sync manager, entry point of the engine.

use crate::config::SyncConfig;
use crate::dataset::{Dataset, Shared};
use crate::identity::{CredentialsProvider, IdentityRemapper, SubscriptionId};
use crate::remote::RemoteStore;
use crate::resolver::{ConflictResolver, LastWriterWins};
use crate::store::LocalStore;
use crate::{error::Result, DatasetMetadata, DatasetName, Identity};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Outcome of [`SyncManager::refresh_dataset_metadata`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataRefresh {
    /// Local metadata after the merge
    pub datasets: Vec<DatasetMetadata>,
    /// Datasets deleted remotely that still hold unsynced local changes.
    /// They were kept; the caller decides whether to push or drop them.
    pub deleted_conflicts: Vec<DatasetName>,
}

pub struct SyncManagerBuilder {
    credentials: Arc<dyn CredentialsProvider>,
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
    resolver: Arc<dyn ConflictResolver>,
    config: SyncConfig,
}

impl SyncManagerBuilder {
    /// Conflict resolver, [`LastWriterWins`] by default.
    pub fn resolver(mut self, resolver: impl ConflictResolver + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the manager and subscribe it to identity changes.
    pub fn build(self) -> SyncManager {
        let remapper = IdentityRemapper::new(Arc::clone(&self.local));
        let subscription = self.credentials.subscribe(Arc::new(remapper));

        SyncManager {
            shared: Arc::new(Shared {
                credentials: self.credentials,
                local: self.local,
                remote: self.remote,
                resolver: self.resolver,
                config: self.config,
                sessions: DashMap::new(),
            }),
            subscription: Mutex::new(Some(subscription)),
        }
    }
}

/// Opens datasets and manages the identity subscription.
///
/// The manager remaps cached rows whenever the credentials provider
/// reports a new identity. The subscription is released by
/// [`SyncManager::close`] or on drop, whichever comes first.
pub struct SyncManager {
    shared: Arc<Shared>,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl SyncManager {
    pub fn builder(
        credentials: Arc<dyn CredentialsProvider>,
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
    ) -> SyncManagerBuilder {
        SyncManagerBuilder {
            credentials,
            local,
            remote,
            resolver: Arc::new(LastWriterWins),
            config: SyncConfig::default(),
        }
    }

    pub fn new(
        credentials: Arc<dyn CredentialsProvider>,
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
    ) -> Self {
        Self::builder(credentials, local, remote).build()
    }

    /// Identity local rows are currently read and written under.
    pub fn identity(&self) -> Identity {
        self.shared.current_identity()
    }

    pub fn device_id(&self) -> &str {
        &self.shared.config.device_id
    }

    /// Open a dataset, creating its local metadata if absent.
    pub fn open_or_create_dataset(&self, name: &str) -> Result<Dataset> {
        let identity = self.identity();
        self.shared.local.create_dataset(&identity, name)?;
        Ok(Dataset::new(name.to_string(), identity, Arc::clone(&self.shared)))
    }

    /// Local metadata of every dataset of the current identity.
    pub fn list_datasets(&self) -> Result<Vec<DatasetMetadata>> {
        self.shared.local.get_dataset_metadata(&self.identity())
    }

    /// Remove every cached dataset of every identity.
    pub fn wipe_data(&self) -> Result<()> {
        tracing::info!("wiping all local data");
        self.shared.local.wipe_data()
    }

    /// Fetch dataset metadata from the remote store and merge it locally.
    pub async fn refresh_dataset_metadata(&self) -> Result<MetadataRefresh> {
        let identity = self.identity();
        let remote = self.shared.remote.get_dataset_metadata(&identity).await?;
        tracing::debug!(%identity, datasets = remote.len(), "fetched remote dataset metadata");

        let deleted_conflicts = self.shared.local.update_dataset_metadata(&identity, remote)?;
        if !deleted_conflicts.is_empty() {
            tracing::warn!(
                %identity,
                datasets = ?deleted_conflicts,
                "datasets deleted remotely still have local changes"
            );
        }

        Ok(MetadataRefresh {
            datasets: self.shared.local.get_dataset_metadata(&identity)?,
            deleted_conflicts,
        })
    }

    /// Release the identity subscription. Safe to call more than once.
    pub fn close(&self) {
        if let Some(id) = self.subscription.lock().take() {
            self.shared.credentials.unsubscribe(id);
            tracing::debug!("identity subscription released");
        }
    }
}

impl Drop for SyncManager {
    fn drop(&mut self) {
        self.close();
    }
}
