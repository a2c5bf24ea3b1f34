//! Identities and identity-change handling.
//!
//! All local rows are scoped by an identity string. Before authentication
//! resolves, data lives under [`UNKNOWN_IDENTITY`]; when the credentials
//! provider reports a new identity, the [`IdentityRemapper`] moves the
//! cached rows over so nothing written while anonymous is lost.

use crate::{error::Result, store::LocalStore, Identity};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identity used while the real one is not known yet.
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// Map an optional identity to the key local rows are stored under.
pub fn resolve_identity(identity: Option<&str>) -> Identity {
    identity.unwrap_or(UNKNOWN_IDENTITY).to_string()
}

/// Notification that the current identity changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityChange {
    pub old: Option<Identity>,
    pub new: Option<Identity>,
}

impl IdentityChange {
    pub fn new(old: Option<&str>, new: Option<&str>) -> Self {
        Self {
            old: old.map(String::from),
            new: new.map(String::from),
        }
    }
}

pub type SubscriptionId = u64;

/// Receives identity-change notifications.
pub trait IdentityListener: Send + Sync {
    fn identity_changed(&self, change: &IdentityChange);
}

/// Supplies the current identity and identity-change notifications.
pub trait CredentialsProvider: Send + Sync {
    /// Current identity, `None` until authentication resolves.
    fn identity(&self) -> Option<Identity>;

    /// Register a listener. Notifications are delivered synchronously.
    fn subscribe(&self, listener: Arc<dyn IdentityListener>) -> SubscriptionId;

    /// Remove a listener. Returns false if it was not registered.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}

/// In-process credentials provider.
///
/// [`Credentials::set_identity`] notifies every listener before it returns,
/// so cached rows are remapped before the caller uses the new identity.
#[derive(Default)]
pub struct Credentials {
    identity: RwLock<Option<Identity>>,
    listeners: Mutex<Vec<(SubscriptionId, Arc<dyn IdentityListener>)>>,
    next_id: AtomicU64,
}

impl Credentials {
    pub fn new(identity: Option<&str>) -> Self {
        Self {
            identity: RwLock::new(identity.map(String::from)),
            ..Default::default()
        }
    }

    /// Change the current identity and notify listeners if it differs.
    pub fn set_identity(&self, identity: Option<&str>) {
        let change = {
            let mut current = self.identity.write();
            if current.as_deref() == identity {
                return;
            }
            let old = current.take();
            *current = identity.map(String::from);
            IdentityChange {
                old,
                new: current.clone(),
            }
        };

        // Listeners may call back into the provider, so don't hold the lock.
        let listeners: Vec<_> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener.identity_changed(&change);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

impl CredentialsProvider for Credentials {
    fn identity(&self) -> Option<Identity> {
        self.identity.read().clone()
    }

    fn subscribe(&self, listener: Arc<dyn IdentityListener>) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().push((id, listener));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }
}

/// Moves cached rows from the old identity to the new one.
pub struct IdentityRemapper {
    local: Arc<dyn LocalStore>,
}

impl IdentityRemapper {
    pub fn new(local: Arc<dyn LocalStore>) -> Self {
        Self { local }
    }

    /// Apply an identity change. Returns whether any remapping happened.
    pub fn remap(&self, change: &IdentityChange) -> Result<bool> {
        let old = resolve_identity(change.old.as_deref());
        let new = resolve_identity(change.new.as_deref());
        tracing::info!(%old, %new, "identity change detected");
        if old == new {
            return Ok(false);
        }
        self.local.change_identity_id(&old, &new)?;
        Ok(true)
    }
}

impl IdentityListener for IdentityRemapper {
    fn identity_changed(&self, change: &IdentityChange) {
        if let Err(e) = self.remap(change) {
            tracing::error!(error = %e, "failed to remap cached data to new identity");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::Record;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<IdentityChange>>);

    impl IdentityListener for Recorder {
        fn identity_changed(&self, change: &IdentityChange) {
            self.0.lock().push(change.clone());
        }
    }

    #[test]
    fn set_identity_notifies_once_per_change() {
        let credentials = Credentials::new(None);
        let recorder = Arc::new(Recorder::default());
        credentials.subscribe(recorder.clone());

        credentials.set_identity(Some("user-1"));
        credentials.set_identity(Some("user-1"));
        credentials.set_identity(Some("user-2"));

        let changes = recorder.0.lock();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0], IdentityChange::new(None, Some("user-1")));
        assert_eq!(changes[1], IdentityChange::new(Some("user-1"), Some("user-2")));
    }

    #[test]
    fn unsubscribe_stops_notifications() {
        let credentials = Credentials::new(None);
        let recorder = Arc::new(Recorder::default());
        let id = credentials.subscribe(recorder.clone());

        assert!(credentials.unsubscribe(id));
        assert!(!credentials.unsubscribe(id));
        credentials.set_identity(Some("user-1"));

        assert!(recorder.0.lock().is_empty());
        assert_eq!(credentials.listener_count(), 0);
    }

    #[test]
    fn remapper_moves_unknown_identity_rows() {
        let store = Arc::new(MemoryStore::new());
        store.create_dataset(UNKNOWN_IDENTITY, "scores").unwrap();
        store
            .put_record(
                UNKNOWN_IDENTITY,
                "scores",
                Record::new("high", Some("90".into()), "d", 1),
            )
            .unwrap();

        let remapper = IdentityRemapper::new(store.clone());
        assert!(remapper.remap(&IdentityChange::new(None, Some("user-1"))).unwrap());

        assert!(store.get_records(UNKNOWN_IDENTITY, "scores").unwrap().is_empty());
        assert!(store.get_record("user-1", "scores", "high").unwrap().is_some());
    }

    #[test]
    fn remapper_ignores_same_identity() {
        let store = Arc::new(MemoryStore::new());
        let remapper = IdentityRemapper::new(store);
        let change = IdentityChange::new(Some(UNKNOWN_IDENTITY), None);
        assert!(!remapper.remap(&change).unwrap());
    }
}
