//! Per-session MCP state (§4.7 capability negotiation, §5 cancellation).
//! Wraps the persisted `Session` record with the in-process bits that
//! don't belong in storage: a cancellation signal and cheap `is_ready`
//! polling without a lock round-trip per dispatched method.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::types::{Session, SessionId, TransportKind};

pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2024-11-05"];
pub const LATEST_PROTOCOL_VERSION: &str = SUPPORTED_PROTOCOL_VERSIONS[0];

pub struct McpSession {
    pub record: RwLock<Session>,
    ready: AtomicBool,
    cancel_tx: tokio::sync::watch::Sender<bool>,
    cancel_rx: tokio::sync::watch::Receiver<bool>,
}

impl McpSession {
    pub fn new(transport: TransportKind) -> Self {
        let (cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
        Self {
            record: RwLock::new(Session::new(transport)),
            ready: AtomicBool::new(false),
            cancel_tx,
            cancel_rx,
        }
    }

    pub fn id(&self) -> SessionId {
        self.record.read().id
    }

    pub fn negotiate_protocol_version(&self, requested: &str) -> String {
        let chosen = if SUPPORTED_PROTOCOL_VERSIONS.contains(&requested) {
            requested.to_string()
        } else {
            LATEST_PROTOCOL_VERSION.to_string()
        };
        let mut record = self.record.write();
        record.protocol_version = Some(chosen.clone());
        chosen
    }

    pub fn protocol_version(&self) -> Option<String> {
        self.record.read().protocol_version.clone()
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
        self.record.write().initialized = true;
    }

    /// Methods other than `initialize`/`ping` are rejected with
    /// `PreInitialization` until the client sends
    /// `notifications/initialized`.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn cancel_all(&self) {
        let _ = self.cancel_tx.send(true);
    }

    pub fn cancellation_receiver(&self) -> tokio::sync::watch::Receiver<bool> {
        self.cancel_rx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unsupported_protocol_version_with_latest() {
        let session = McpSession::new(TransportKind::StreamableHttp);
        let chosen = session.negotiate_protocol_version("bogus-version");
        assert_eq!(chosen, LATEST_PROTOCOL_VERSION);
    }

    #[test]
    fn not_ready_until_initialized_notification() {
        let session = McpSession::new(TransportKind::Stdio);
        session.negotiate_protocol_version(LATEST_PROTOCOL_VERSION);
        assert!(!session.is_ready());
        session.mark_ready();
        assert!(session.is_ready());
        assert!(session.record.read().initialized);
    }
}
