//! Server-side session registry (§3 Session, §4.8): maps the
//! `Mcp-Session-Id` header (or WS connection) onto the in-process
//! `McpSession` the dispatcher operates on.

use std::sync::Arc;

use dashmap::DashMap;

use crate::mcp::McpSession;
use crate::types::{SessionId, TransportKind};

#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<SessionId, Arc<McpSession>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, transport: TransportKind) -> Arc<McpSession> {
        let session = Arc::new(McpSession::new(transport));
        self.sessions.insert(session.id(), session.clone());
        session
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<McpSession>> {
        self.sessions.get(&id).map(|e| e.clone())
    }

    pub fn remove(&self, id: SessionId) -> bool {
        self.sessions.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_get_round_trips() {
        let store = SessionStore::new();
        let session = store.create(TransportKind::StreamableHttp);
        let id = session.id();
        assert!(store.get(id).is_some());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn remove_drops_session() {
        let store = SessionStore::new();
        let session = store.create(TransportKind::WebSocket);
        let id = session.id();
        assert!(store.remove(id));
        assert!(store.get(id).is_none());
    }
}
