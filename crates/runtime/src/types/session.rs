//! Per-transport session state (§3 Session).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::SessionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Stdio,
    StreamableHttp,
    WebSocket,
    LegacySse,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Stdio => "stdio",
            TransportKind::StreamableHttp => "streamable_http",
            TransportKind::WebSocket => "websocket",
            TransportKind::LegacySse => "legacy_sse",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NegotiatedCapabilities {
    pub tools: bool,
    pub prompts_list_changed: bool,
    pub resources_subscribe: bool,
    pub resources_list_changed: bool,
    pub logging: bool,
    pub completions: bool,
}

/// Server-side session record. HTTP and WS sessions are persisted across
/// requests on the same connection/session-id; stdio sessions are
/// process-scoped and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub transport: TransportKind,
    pub protocol_version: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub client_info: Option<ClientInfo>,
    pub capabilities: NegotiatedCapabilities,
    pub initialized: bool,
    pub sse_resume_cursor: i64,
    pub extra: Value,
}

impl Session {
    pub fn new(transport: TransportKind) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            transport,
            protocol_version: None,
            created_at: now,
            last_seen_at: now,
            client_info: None,
            capabilities: NegotiatedCapabilities::default(),
            initialized: false,
            sse_resume_cursor: 0,
            extra: Value::Null,
        }
    }

    pub fn touch(&mut self) {
        self.last_seen_at = Utc::now();
    }
}
