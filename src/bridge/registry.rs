//! Subscription registry
//!
//! Maps caller-supplied subscription ids to live listener handles so a
//! later `off` (or the bridge teardown) can detach them. The registry does
//! not deduplicate ids; uniqueness is the caller's contract. Lookups,
//! inserts, and removals hold one lock, since dispatch tasks touch the map
//! concurrently.

use crate::database::listener::ListenerRegistration;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;

/// A registered listener, tagged by its scope
pub enum ListenerHandle {
    /// Whole-value listener
    Value(ListenerRegistration),
    /// Child-scoped listener
    Child(ListenerRegistration),
}

impl ListenerHandle {
    /// Tag a registration by the event category it was attached for
    pub fn from_registration(registration: ListenerRegistration) -> Self {
        if registration.event().is_child() {
            ListenerHandle::Child(registration)
        } else {
            ListenerHandle::Value(registration)
        }
    }

    /// Stop the underlying listener
    pub fn detach(&self) {
        self.registration().detach();
    }

    fn registration(&self) -> &ListenerRegistration {
        match self {
            ListenerHandle::Value(registration) => registration,
            ListenerHandle::Child(registration) => registration,
        }
    }

    fn scope(&self) -> &'static str {
        match self {
            ListenerHandle::Value(_) => "value",
            ListenerHandle::Child(_) => "child",
        }
    }
}

/// Registry of active subscriptions keyed by caller-supplied id
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: Mutex<HashMap<String, ListenerHandle>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener under a subscription id
    ///
    /// A colliding id replaces the previous entry without detaching it;
    /// callers guarantee uniqueness.
    pub async fn subscribe(&self, id: impl Into<String>, handle: ListenerHandle) {
        let id = id.into();
        debug!(id = %id, scope = handle.scope(), "subscription registered");
        self.entries.lock().await.insert(id, handle);
    }

    /// Detach and drop the subscription with this id
    ///
    /// An unknown id is a no-op, matching permissive detach semantics.
    pub async fn unsubscribe(&self, id: &str) -> bool {
        let handle = self.entries.lock().await.remove(id);
        match handle {
            Some(handle) => {
                debug!(id = %id, scope = handle.scope(), "subscription detached");
                handle.detach();
                true
            }
            None => {
                debug!(id = %id, "unsubscribe for unknown id ignored");
                false
            }
        }
    }

    /// Detach every registered listener and clear the registry
    pub async fn teardown(&self) {
        let mut entries = self.entries.lock().await;
        for (id, handle) in entries.drain() {
            debug!(id = %id, scope = handle.scope(), "subscription detached at teardown");
            handle.detach();
        }
    }

    /// Number of active subscriptions
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether the registry has no active subscriptions
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Whether a subscription id is registered
    pub async fn contains(&self, id: &str) -> bool {
        self.entries.lock().await.contains_key(id)
    }
}
