//! Session registry — shared call-id to session mapping.
//!
//! Sessions are mutated only from their dispatcher task; the registry exists
//! so the control plane can read transcripts and so an outbound call placed
//! before its media stream connects can hand its context to the dispatcher.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::session::{CallId, Session};

/// Shared handle to one session.
pub type SessionHandle = Arc<Mutex<Session>>;

/// Store interface for active sessions.
#[async_trait]
pub trait SessionRegistry: Send + Sync {
    async fn get(&self, id: &CallId) -> Option<SessionHandle>;
    async fn insert(&self, session: Session) -> SessionHandle;
    async fn remove(&self, id: &CallId);
    async fn list(&self) -> Vec<SessionHandle>;
}

/// In-memory registry. Sessions live for the duration of the call only.
#[derive(Default)]
pub struct InMemoryRegistry {
    sessions: RwLock<HashMap<CallId, SessionHandle>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRegistry for InMemoryRegistry {
    async fn get(&self, id: &CallId) -> Option<SessionHandle> {
        self.sessions.read().await.get(id).cloned()
    }

    async fn insert(&self, session: Session) -> SessionHandle {
        let id = session.id.clone();
        let handle = Arc::new(Mutex::new(session));
        self.sessions.write().await.insert(id.clone(), handle.clone());
        debug!(session = %id, "Registered session");
        handle
    }

    async fn remove(&self, id: &CallId) {
        if self.sessions.write().await.remove(id).is_some() {
            debug!(session = %id, "Removed session");
        }
    }

    async fn list(&self) -> Vec<SessionHandle> {
        self.sessions.read().await.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: &str) -> Session {
        Session::new(CallId(id.into()), "sys".into(), "hello".into())
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let registry = InMemoryRegistry::new();
        registry.insert(session("CA1")).await;

        let handle = registry.get(&CallId("CA1".into())).await.unwrap();
        assert_eq!(handle.lock().await.id.as_str(), "CA1");
        assert!(registry.get(&CallId("CA2".into())).await.is_none());
    }

    #[tokio::test]
    async fn test_mutation_through_handle_is_visible() {
        let registry = InMemoryRegistry::new();
        let handle = registry.insert(session("CA1")).await;

        handle.lock().await.caller_number = Some("+15550001111".into());

        let again = registry.get(&CallId("CA1".into())).await.unwrap();
        assert_eq!(
            again.lock().await.caller_number.as_deref(),
            Some("+15550001111")
        );
    }

    #[tokio::test]
    async fn test_remove_and_list() {
        let registry = InMemoryRegistry::new();
        registry.insert(session("CA1")).await;
        registry.insert(session("CA2")).await;
        assert_eq!(registry.list().await.len(), 2);

        registry.remove(&CallId("CA1".into())).await;
        assert_eq!(registry.list().await.len(), 1);

        // Removing a missing session is a no-op.
        registry.remove(&CallId("CA1".into())).await;
    }
}
