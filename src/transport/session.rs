//! Session bookkeeping shared by the HTTP transports.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

/// Generates a fresh, unguessable session identifier.
#[must_use]
pub fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}

/// A process-wide map from session id to session state.
///
/// The lock is only held for map operations, never across an `.await`.
#[derive(Debug)]
pub struct SessionMap<S> {
    sessions: RwLock<HashMap<String, Arc<S>>>,
}

impl<S> SessionMap<S> {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Stores a session under `id` and returns the shared handle.
    pub fn insert(&self, id: impl Into<String>, session: S) -> Arc<S> {
        let session = Arc::new(session);
        self.sessions.write().insert(id.into(), Arc::clone(&session));
        session
    }

    /// Looks up a session.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<S>> {
        self.sessions.read().get(id).cloned()
    }

    /// Evicts a session, returning it if it existed.
    pub fn remove(&self, id: &str) -> Option<Arc<S>> {
        self.sessions.write().remove(id)
    }

    /// Returns the number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Returns `true` if there are no live sessions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

impl<S> Default for SessionMap<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Evicts a session from its map when dropped.
///
/// Attached to a streaming response so the session disappears together with
/// the client connection.
pub struct EvictOnDrop<S> {
    sessions: Arc<SessionMap<S>>,
    id: String,
}

impl<S> EvictOnDrop<S> {
    /// Creates a guard for `id`.
    pub const fn new(sessions: Arc<SessionMap<S>>, id: String) -> Self {
        Self { sessions, id }
    }
}

impl<S> Drop for EvictOnDrop<S> {
    fn drop(&mut self) {
        if self.sessions.remove(&self.id).is_some() {
            tracing::debug!(session_id = %self.id, "Session evicted");
        }
    }
}
