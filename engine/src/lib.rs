//! # Satchel Engine
//!
//! Offline-first synchronization of per-user key/value datasets.
//!
//! Applications read and write a local cache at any time, even offline.
//! [`Dataset::synchronize`] later merges the cache with an authoritative
//! remote store. Every accepted remote write carries a monotonically
//! increasing `sync_count` that is the basis for change detection and
//! optimistic concurrency.
//!
//! ## Core Concepts
//!
//! ### Datasets and Records
//!
//! A dataset is a named collection of [`Record`]s scoped to an identity.
//! Each record is a string key with an optional string value; `None` is a
//! tombstone. A record stays `modified` until the remote store accepts it.
//!
//! ### Stores
//!
//! - [`LocalStore`] - the local cache ([`SqliteStore`], [`MemoryStore`])
//! - [`RemoteStore`] - the authoritative store ([`MemoryRemote`], and
//!   `HttpRemote` with the `http` feature)
//!
//! ### Synchronization
//!
//! One session pulls records changed since the dataset's cursor, resolves
//! them against pending local writes, pushes in one batch and commits the
//! confirmed state locally. Conflicts go through a [`ConflictResolver`]
//! ([`LastWriterWins`] by default) with one retry round.
//!
//! ### Identities
//!
//! Data written before sign-in lives under [`UNKNOWN_IDENTITY`]. When the
//! [`CredentialsProvider`] reports a new identity the manager moves the
//! cached rows over, merging by `sync_count`.
//!
//! ## Quick Start
//!
//! ```rust
//! use satchel_engine::{Credentials, MemoryRemote, MemoryStore, SyncManager};
//! use std::sync::Arc;
//!
//! # tokio_test_block(async {
//! let credentials = Arc::new(Credentials::new(Some("user-1")));
//! let manager = SyncManager::new(
//!     credentials,
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(MemoryRemote::new()),
//! );
//!
//! let scores = manager.open_or_create_dataset("scores").unwrap();
//! scores.put("high", "90").unwrap();
//!
//! let result = scores.synchronize().await.unwrap();
//! assert_eq!(result.pushed, vec!["high".to_string()]);
//! assert_eq!(scores.get_record("high").unwrap().unwrap().sync_count, 1);
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

pub mod authority;
pub mod config;
pub mod dataset;
pub mod error;
pub mod identity;
pub mod manager;
pub mod metadata;
pub mod record;
pub mod remote;
pub mod resolver;
pub mod store;
pub mod sync;
pub mod validate;

// Re-export main types at crate root
pub use authority::DatasetAuthority;
pub use config::SyncConfig;
pub use dataset::Dataset;
pub use error::{Error, Result};
pub use identity::{
    Credentials, CredentialsProvider, IdentityChange, IdentityListener, IdentityRemapper,
    SubscriptionId, UNKNOWN_IDENTITY,
};
pub use manager::{MetadataRefresh, SyncManager, SyncManagerBuilder};
pub use metadata::{DatasetMetadata, DatasetStatus};
pub use record::Record;
#[cfg(feature = "http")]
pub use remote::HttpRemote;
pub use remote::{
    MemoryRemote, PushOutcome, PushRequest, PushResponse, PushStatus, RecordPage, RecordPush,
    RemoteStore,
};
pub use resolver::{
    Conflict, ConflictResolver, DeletionResolution, LastWriterWins, Resolution, ResolvedConflict,
};
pub use store::{CommitRecord, LocalStore, MemoryStore, SqliteStore, SyncCommit};
pub use sync::{FailureReason, SyncResult, SyncState};

/// Type aliases for clarity
pub type Identity = String;
pub type DatasetName = String;
pub type RecordKey = String;
pub type SyncCount = u64;
pub type Timestamp = u64;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis().max(0) as Timestamp
}
