//! Conflict resolution between local and remote versions of a record.
//!
//! A conflict exists when a record has a pending local write and the
//! remote store holds a different version of it. Resolvers are pure: the
//! same pair of records always yields the same resolution.

use crate::{Record, RecordKey};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Outcome chosen by a resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Resolution {
    /// Keep the local value and push it over the remote one
    KeepLocal,
    /// Discard the local value and take the remote one
    KeepRemote,
    /// Push a combined value (`None` deletes the record)
    Merge(Option<String>),
}

/// A detected conflict, carrying both versions of the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub key: RecordKey,
    /// The local pending version
    pub local: Record,
    /// The authoritative remote version
    pub remote: Record,
}

impl Conflict {
    pub fn new(local: Record, remote: Record) -> Self {
        Self {
            key: local.key.clone(),
            local,
            remote,
        }
    }
}

/// A conflict together with how it was resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedConflict {
    pub conflict: Conflict,
    pub resolution: Resolution,
}

/// What happens to a dataset the remote store deleted while local writes
/// were still pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeletionResolution {
    /// Accept the deletion and purge the local copy, pending writes included
    Purge,
    /// Push the pending writes, recreating the dataset remotely
    Recreate,
    /// Leave local data untouched and report the conflict
    Report,
}

/// Decides how a local/remote record pair is merged.
pub trait ConflictResolver: Send + Sync {
    fn resolve(&self, local: &Record, remote: &Record) -> Resolution;

    /// Called when the remote store deleted `dataset` and `pending` local
    /// writes have not been pushed yet.
    fn resolve_deleted(&self, _dataset: &str, _pending: &[Record]) -> DeletionResolution {
        DeletionResolution::Report
    }
}

impl<F> ConflictResolver for F
where
    F: Fn(&Record, &Record) -> Resolution + Send + Sync,
{
    fn resolve(&self, local: &Record, remote: &Record) -> Resolution {
        self(local, remote)
    }
}

/// Default policy: the most recent writer wins.
///
/// Ordering rules:
/// 1. Later `last_modified_date` wins
/// 2. If equal, later `device_last_modified_date` wins
/// 3. If equal, higher `sync_count` wins
/// 4. Full tie keeps the remote version
#[derive(Debug, Clone, Copy, Default)]
pub struct LastWriterWins;

impl LastWriterWins {
    fn compare(local: &Record, remote: &Record) -> Ordering {
        local
            .last_modified_date
            .cmp(&remote.last_modified_date)
            .then(
                local
                    .device_last_modified_date
                    .cmp(&remote.device_last_modified_date),
            )
            .then(local.sync_count.cmp(&remote.sync_count))
    }
}

impl ConflictResolver for LastWriterWins {
    fn resolve(&self, local: &Record, remote: &Record) -> Resolution {
        match Self::compare(local, remote) {
            Ordering::Greater => Resolution::KeepLocal,
            Ordering::Less | Ordering::Equal => Resolution::KeepRemote,
        }
    }
}
