//! The synchronization session.
//!
//! This is the core of the engine. One session merges one dataset of one
//! identity with the remote store.
//!
//! # Algorithm
//!
//! 1. Pull records changed remotely since the dataset's pull cursor. If
//!    the dataset was deleted remotely in the meantime, purge the local
//!    copy, or ask the resolver when local writes are pending
//! 2. Resolve: pulled records without a pending local write are staged as
//!    overwrites; pulled records that collide with a pending local write go
//!    through the conflict resolver; remaining local writes are staged as
//!    pushes
//! 3. Push all staged writes in one batch, each with the remote sync count
//!    it was based on. A conflicting push gets one more resolver pass and
//!    one retry; a second conflict is reported as unresolved
//! 4. Commit everything confirmed to the local store in one call
//!
//! The only suspension points are the remote calls. Cancellation is
//! honoured while pulling only; once pushing starts the session runs to
//! completion so local and remote never diverge half-applied.

use crate::remote::{PushStatus, RecordPush, RemoteStore};
use crate::resolver::{
    Conflict, ConflictResolver, DeletionResolution, Resolution, ResolvedConflict,
};
use crate::store::{CommitRecord, LocalStore, SyncCommit};
use crate::{
    error::Result, DatasetMetadata, DatasetName, DatasetStatus, Error, Identity, Record, RecordKey,
    SyncCount,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;

/// Why a session failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureReason {
    Network,
    Cancelled,
    LocalStorage,
}

/// Session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncState {
    Idle,
    Pulling,
    Resolving,
    Pushing,
    Committed,
    Failed(FailureReason),
}

/// Result of a completed session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub dataset: DatasetName,
    pub state: SyncState,
    /// Keys overwritten from the remote store
    pub pulled: Vec<RecordKey>,
    /// Keys whose local write the remote store accepted
    pub pushed: Vec<RecordKey>,
    /// Conflicts settled by the resolver
    pub resolved: Vec<ResolvedConflict>,
    /// Conflicts still open after the retry round, local rows left dirty
    pub unresolved: Vec<Conflict>,
    /// Pull cursor after the session
    pub sync_count: SyncCount,
    /// The dataset was deleted remotely and purged locally
    pub dataset_deleted: bool,
    /// The dataset was deleted remotely while local writes were pending,
    /// and the local copy was left untouched
    pub deletion_conflict: bool,
}

impl SyncResult {
    fn new(dataset: &str, sync_count: SyncCount) -> Self {
        Self {
            dataset: dataset.to_string(),
            state: SyncState::Idle,
            pulled: Vec::new(),
            pushed: Vec::new(),
            resolved: Vec::new(),
            unresolved: Vec::new(),
            sync_count,
            dataset_deleted: false,
            deletion_conflict: false,
        }
    }

    /// Nothing was pulled, pushed or left in conflict.
    pub fn is_noop(&self) -> bool {
        self.pulled.is_empty() && self.pushed.is_empty() && self.is_clean()
    }

    /// Whether every conflict was settled.
    pub fn is_clean(&self) -> bool {
        self.unresolved.is_empty() && !self.deletion_conflict
    }

    /// Turn leftover conflicts into [`Error::DeletionConflict`] or
    /// [`Error::UnresolvedConflict`].
    pub fn into_result(self) -> Result<Self> {
        if self.deletion_conflict {
            Err(Error::DeletionConflict(self.dataset))
        } else if self.unresolved.is_empty() {
            Ok(self)
        } else {
            Err(Error::UnresolvedConflict {
                dataset: self.dataset,
                conflicts: self.unresolved,
            })
        }
    }
}

/// A local write waiting to be pushed.
#[derive(Debug, Clone)]
struct StagedPush {
    record: Record,
    base_sync_count: SyncCount,
    /// Local row the write was planned against
    snapshot: Option<Record>,
}

/// Everything one session borrows.
pub struct SyncSession<'a> {
    pub local: &'a dyn LocalStore,
    pub remote: &'a dyn RemoteStore,
    pub resolver: &'a dyn ConflictResolver,
    pub identity: &'a Identity,
    pub dataset: &'a str,
    pub device_id: &'a str,
}

impl<'a> SyncSession<'a> {
    /// Run the session to completion, or until `cancel` fires while pulling.
    pub async fn run<C>(self, cancel: C) -> Result<SyncResult>
    where
        C: Future<Output = ()>,
    {
        let metadata = self
            .local
            .get_metadata(self.identity, self.dataset)?
            .ok_or_else(|| Error::DatasetNotFound(self.dataset.to_string()))?;

        let mut run = SessionRun::new(&self, &metadata);
        if metadata.is_deleted() {
            return run.delete_remote().await;
        }

        run.transition(SyncState::Pulling);
        let since = metadata.last_sync_count;
        let page = tokio::select! {
            biased;
            _ = cancel => {
                run.transition(SyncState::Failed(FailureReason::Cancelled));
                return Err(Error::Cancelled);
            }
            page = self.remote.list_records(self.identity, self.dataset, since) => page,
        };
        let page = run.check(page)?;
        tracing::debug!(
            dataset = self.dataset,
            since,
            pulled = page.records.len(),
            remote_sync_count = page.sync_count,
            "pulled records"
        );

        run.transition(SyncState::Resolving);
        let local = run.check(self.local.get_records(self.identity, self.dataset))?;

        // A copy that knew the dataset before it was deleted remotely.
        if page.status == DatasetStatus::Deleted && page.reset && metadata.sync_count > 0 {
            let pending: Vec<Record> = local.values().filter(|r| r.modified).cloned().collect();
            let resolution = if pending.is_empty() {
                DeletionResolution::Purge
            } else {
                self.resolver.resolve_deleted(self.dataset, &pending)
            };
            tracing::debug!(
                dataset = self.dataset,
                pending = pending.len(),
                ?resolution,
                "dataset deleted remotely"
            );
            match resolution {
                DeletionResolution::Purge => return run.purge_local(),
                DeletionResolution::Report => return Ok(run.report_deleted(pending.len())),
                DeletionResolution::Recreate => {}
            }
        }

        run.cursor = page.sync_count;
        run.remote_sync_count = run.remote_sync_count.max(page.sync_count);
        let pushes = run.resolve_pulled(&local, page.records, page.reset);

        run.push(pushes).await
    }
}

/// Mutable bookkeeping of one running session.
struct SessionRun<'s, 'a> {
    session: &'s SyncSession<'a>,
    state: SyncState,
    result: SyncResult,
    /// Confirmed writes to commit, by key
    confirmed: BTreeMap<RecordKey, CommitRecord>,
    cursor: SyncCount,
    /// False once a push response showed writes we did not pull
    cursor_contiguous: bool,
    remote_sync_count: SyncCount,
}

impl<'s, 'a> SessionRun<'s, 'a> {
    fn new(session: &'s SyncSession<'a>, metadata: &DatasetMetadata) -> Self {
        Self {
            session,
            state: SyncState::Idle,
            result: SyncResult::new(session.dataset, metadata.last_sync_count),
            confirmed: BTreeMap::new(),
            cursor: metadata.last_sync_count,
            cursor_contiguous: true,
            remote_sync_count: metadata.sync_count,
        }
    }

    fn transition(&mut self, next: SyncState) {
        tracing::debug!(
            dataset = self.session.dataset,
            from = ?self.state,
            to = ?next,
            "sync state transition"
        );
        self.state = next;
    }

    /// Move to `Failed`, classifying the failure.
    fn fail(&mut self, error: &Error) {
        let reason = match error {
            Error::Service { .. } => FailureReason::Network,
            Error::Cancelled => FailureReason::Cancelled,
            _ => FailureReason::LocalStorage,
        };
        tracing::warn!(dataset = self.session.dataset, %error, "sync failed");
        self.transition(SyncState::Failed(reason));
    }

    fn check<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.fail(e);
        }
        result
    }

    async fn delete_remote(mut self) -> Result<SyncResult> {
        let s = self.session;
        self.transition(SyncState::Pushing);
        let deleted = s.remote.delete_dataset(s.identity, s.dataset).await;
        self.check(deleted)?;
        self.purge_local()
    }

    /// Drop the local copy of a dataset that no longer exists remotely.
    fn purge_local(mut self) -> Result<SyncResult> {
        let s = self.session;
        let purged = s.local.purge_dataset(s.identity, s.dataset);
        self.check(purged)?;

        self.transition(SyncState::Committed);
        self.result.state = self.state;
        self.result.dataset_deleted = true;
        tracing::info!(dataset = s.dataset, "dataset deleted remotely and purged");
        Ok(self.result)
    }

    /// Leave local data and the pull cursor as they are.
    fn report_deleted(mut self, pending: usize) -> SyncResult {
        tracing::warn!(
            dataset = self.session.dataset,
            pending,
            "dataset deleted remotely with pending local writes"
        );
        self.transition(SyncState::Committed);
        self.result.state = self.state;
        self.result.deletion_conflict = true;
        self.result
    }

    /// Stage the pulled page against the local rows. After a `reset`, clean
    /// rows missing from the page were dropped remotely and become
    /// confirmed tombstones.
    fn resolve_pulled(
        &mut self,
        local: &BTreeMap<RecordKey, Record>,
        pulled: Vec<Record>,
        reset: bool,
    ) -> Vec<StagedPush> {
        let mut pushes = Vec::new();
        let mut seen = HashSet::with_capacity(pulled.len());

        for remote in pulled {
            seen.insert(remote.key.clone());
            let remote = as_remote(remote);
            match local.get(&remote.key) {
                Some(current) if current.modified => {
                    if current.value == remote.value {
                        // Same write landed remotely already; adopt its version.
                        let record = current.clone().confirmed(remote.sync_count);
                        self.stage_confirmed(record, Some(current.clone()));
                    } else if let Some(push) = self.resolve(current, remote, Some(current.clone())) {
                        pushes.push(push);
                    }
                }
                Some(current) if current.same_content(&remote) => {}
                current => {
                    self.result.pulled.push(remote.key.clone());
                    self.stage_confirmed(remote, current.cloned());
                }
            }
        }

        for current in local.values().filter(|r| !seen.contains(&r.key)) {
            if current.modified {
                pushes.push(StagedPush {
                    record: current.clone(),
                    base_sync_count: current.sync_count,
                    snapshot: Some(current.clone()),
                });
            } else if reset && !current.is_deleted() {
                let mut gone = current.clone();
                gone.value = None;
                self.result.pulled.push(gone.key.clone());
                self.stage_confirmed(gone, Some(current.clone()));
            }
        }

        pushes
    }

    /// Run the resolver on a conflicting pair. Returns the push it calls for,
    /// if any.
    fn resolve(
        &mut self,
        local: &Record,
        remote: Record,
        snapshot: Option<Record>,
    ) -> Option<StagedPush> {
        let resolution = self.session.resolver.resolve(local, &remote);
        tracing::debug!(
            dataset = self.session.dataset,
            key = %local.key,
            ?resolution,
            "conflict resolved"
        );
        self.result.resolved.push(ResolvedConflict {
            conflict: Conflict::new(local.clone(), remote.clone()),
            resolution: resolution.clone(),
        });

        let value = match resolution {
            Resolution::KeepRemote => {
                self.stage_confirmed(remote, snapshot);
                return None;
            }
            Resolution::KeepLocal => local.value.clone(),
            Resolution::Merge(value) => value,
        };

        let mut record = local.clone();
        record.value = value;
        record.modified = true;
        Some(StagedPush {
            record,
            base_sync_count: remote.sync_count,
            snapshot,
        })
    }

    fn stage_confirmed(&mut self, record: Record, snapshot: Option<Record>) {
        self.confirmed
            .insert(record.key.clone(), CommitRecord { record, snapshot });
    }

    async fn push(mut self, pushes: Vec<StagedPush>) -> Result<SyncResult> {
        if pushes.is_empty() {
            return self.commit();
        }

        self.transition(SyncState::Pushing);
        let retries = match self.push_round(pushes, false).await {
            Ok(retries) => retries,
            Err(e) => return self.commit_then_fail(e),
        };
        if !retries.is_empty() {
            if let Err(e) = self.push_round(retries, true).await {
                return self.commit_then_fail(e);
            }
        }

        self.commit()
    }

    /// Push one batch. Returns the writes to retry after a conflict.
    async fn push_round(
        &mut self,
        pushes: Vec<StagedPush>,
        final_round: bool,
    ) -> Result<Vec<StagedPush>> {
        let s = self.session;
        let batch = pushes
            .iter()
            .map(|p| RecordPush::new(p.record.clone(), p.base_sync_count))
            .collect();
        let response = s
            .remote
            .put_records(s.identity, s.dataset, s.device_id, batch)
            .await?;

        let mut by_key: HashMap<RecordKey, PushStatus> = response
            .outcomes
            .into_iter()
            .map(|o| (o.key, o.status))
            .collect();
        let mut accepted_any = false;
        let mut retries = Vec::new();

        for push in pushes {
            match by_key.remove(&push.record.key) {
                Some(PushStatus::Accepted { sync_count }) => {
                    accepted_any = true;
                    self.result.pushed.push(push.record.key.clone());
                    self.stage_confirmed(push.record.confirmed(sync_count), push.snapshot);
                }
                Some(PushStatus::Conflict { remote }) if final_round => {
                    tracing::warn!(
                        dataset = s.dataset,
                        key = %push.record.key,
                        "conflict persisted after retry"
                    );
                    self.result.unresolved.push(Conflict::new(push.record, remote));
                }
                Some(PushStatus::Conflict { remote }) => {
                    if let Some(retry) = self.resolve(&push.record, as_remote(remote), push.snapshot)
                    {
                        retries.push(retry);
                    }
                }
                None => {
                    tracing::warn!(
                        dataset = s.dataset,
                        key = %push.record.key,
                        "remote store returned no outcome for pushed record"
                    );
                }
            }
        }

        self.remote_sync_count = self.remote_sync_count.max(response.sync_count);
        if accepted_any && self.cursor_contiguous {
            if response.sync_count == self.cursor + 1 {
                self.cursor = response.sync_count;
            } else {
                self.cursor_contiguous = false;
            }
        }

        Ok(retries)
    }

    /// Keep what the remote store already confirmed, then report `error`.
    fn commit_then_fail(mut self, error: Error) -> Result<SyncResult> {
        let s = self.session;
        let commit = self.take_commit();
        if !commit.is_empty() {
            let committed = s.local.commit_sync(s.identity, s.dataset, commit);
            self.check(committed)?;
        }
        self.fail(&error);
        Err(error)
    }

    fn take_commit(&mut self) -> SyncCommit {
        SyncCommit {
            records: std::mem::take(&mut self.confirmed).into_values().collect(),
            sync_count: self.remote_sync_count,
            last_sync_count: self.cursor,
        }
    }

    fn commit(mut self) -> Result<SyncResult> {
        let s = self.session;
        let starting = self.result.sync_count;
        let commit = self.take_commit();

        if !commit.is_empty() || commit.last_sync_count != starting {
            let committed = s.local.commit_sync(s.identity, s.dataset, commit);
            self.check(committed)?;
        }

        self.transition(SyncState::Committed);
        self.result.state = self.state;
        self.result.sync_count = self.cursor;
        if !self.result.unresolved.is_empty() {
            tracing::warn!(
                dataset = s.dataset,
                unresolved = self.result.unresolved.len(),
                "sync committed with unresolved conflicts"
            );
        }
        tracing::debug!(
            dataset = s.dataset,
            pulled = self.result.pulled.len(),
            pushed = self.result.pushed.len(),
            sync_count = self.cursor,
            "sync committed"
        );
        Ok(self.result)
    }
}

/// Remote rows are never dirty, whatever the transport sent.
fn as_remote(mut record: Record) -> Record {
    record.modified = false;
    record
}
