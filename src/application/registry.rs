//! Session registry
//!
//! Owns the live sessions: session id → session plus call-id → session id.

use super::metrics;
use super::session::{ImsServiceSession, SessionKind};
use crate::domain::shared::SessionId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
struct Sessions {
    by_id: HashMap<SessionId, Arc<ImsServiceSession>>,
    by_call_id: HashMap<String, SessionId>,
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<Sessions>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_session(&self, session: Arc<ImsServiceSession>) {
        let mut sessions = self.sessions.write().await;
        let id = session.id();
        sessions.by_call_id.insert(session.call_id().to_string(), id);
        sessions.by_id.insert(id, session);
        metrics::update_active_sessions(sessions.by_id.len());
        debug!("Session {} added ({} active)", id, sessions.by_id.len());
    }

    /// Add a session unless its call-id is already owned by another one.
    /// Check and insert happen under one write lock.
    pub async fn add_if_absent(&self, session: Arc<ImsServiceSession>) -> bool {
        let mut sessions = self.sessions.write().await;
        if sessions.by_call_id.contains_key(session.call_id()) {
            return false;
        }
        let id = session.id();
        sessions.by_call_id.insert(session.call_id().to_string(), id);
        sessions.by_id.insert(id, session);
        metrics::update_active_sessions(sessions.by_id.len());
        debug!("Session {} added ({} active)", id, sessions.by_id.len());
        true
    }

    /// Remove a session; returns false when it was already gone
    pub async fn remove_session(&self, id: SessionId) -> bool {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.by_id.remove(&id) else {
            return false;
        };
        if sessions.by_call_id.get(session.call_id()) == Some(&id) {
            sessions.by_call_id.remove(session.call_id());
        }
        metrics::update_active_sessions(sessions.by_id.len());
        debug!("Session {} removed ({} active)", id, sessions.by_id.len());
        true
    }

    pub async fn get(&self, id: SessionId) -> Option<Arc<ImsServiceSession>> {
        self.sessions.read().await.by_id.get(&id).cloned()
    }

    pub async fn find_by_call_id(&self, call_id: &str) -> Option<Arc<ImsServiceSession>> {
        let sessions = self.sessions.read().await;
        let id = sessions.by_call_id.get(call_id)?;
        sessions.by_id.get(id).cloned()
    }

    pub async fn sessions(&self) -> Vec<Arc<ImsServiceSession>> {
        self.sessions.read().await.by_id.values().cloned().collect()
    }

    pub async fn sessions_of_kind(&self, kind: SessionKind) -> Vec<Arc<ImsServiceSession>> {
        self.sessions
            .read()
            .await
            .by_id
            .values()
            .filter(|session| session.kind() == kind)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.by_id.len()
    }

    /// Session count for synchronous callers, `None` while a writer holds the maps
    pub fn try_len(&self) -> Option<usize> {
        self.sessions.try_read().ok().map(|sessions| sessions.by_id.len())
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.by_id.is_empty()
    }
}
