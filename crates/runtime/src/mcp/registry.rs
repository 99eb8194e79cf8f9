//! Tool/prompt/resource registries (§4.7 "Tool registry"). Registries are
//! built once at startup and treated as immutable during request handling,
//! per the concurrency model's shared-resource rules.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::types::{RuntimeResult, ServerMode};

/// What a tool call produced, before being wrapped into MCP content blocks.
pub enum ToolOutput {
    Json(Value),
    Text(String),
}

impl ToolOutput {
    /// Wraps into the MCP `tools/call` result shape (§4.7 step e):
    /// JSON becomes a pretty-printed text block plus `structuredContent`;
    /// plain text becomes a single text block.
    pub fn into_result(self) -> Value {
        match self {
            ToolOutput::Json(value) => serde_json::json!({
                "content": [{ "type": "text", "text": serde_json::to_string_pretty(&value).unwrap_or_default() }],
                "structuredContent": value,
                "isError": false,
            }),
            ToolOutput::Text(text) => serde_json::json!({
                "content": [{ "type": "text", "text": text }],
                "isError": false,
            }),
        }
    }
}

pub fn error_result(message: &str) -> Value {
    serde_json::json!({
        "content": [{ "type": "text", "text": message }],
        "isError": true,
    })
}

/// Per-call context: progress reporting and cooperative cancellation.
/// `notifications/cancelled` and session teardown set `cancelled`; handlers
/// SHOULD check it between suspension points on long-running work.
#[derive(Clone)]
pub struct ToolContext {
    pub progress_token: Option<Value>,
    progress_tx: Option<tokio::sync::mpsc::UnboundedSender<(Value, f64, Option<String>)>>,
    cancelled: tokio::sync::watch::Receiver<bool>,
}

impl ToolContext {
    pub fn new(
        progress_token: Option<Value>,
        progress_tx: Option<tokio::sync::mpsc::UnboundedSender<(Value, f64, Option<String>)>>,
        cancelled: tokio::sync::watch::Receiver<bool>,
    ) -> Self {
        Self { progress_token, progress_tx, cancelled }
    }

    /// Emits `notifications/progress` if the caller supplied a
    /// `_meta.progressToken`; a no-op otherwise.
    pub fn send_progress(&self, value: f64, message: Option<String>) {
        if let (Some(token), Some(tx)) = (&self.progress_token, &self.progress_tx) {
            let _ = tx.send((token.clone(), value, message));
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// JSON Schema for the tool's input, used both for client-facing
    /// discovery and for request validation in `dispatch`.
    fn input_schema(&self) -> Value;
    /// Tools in this set are exposed regardless of server mode (§4.7 "Mode
    /// gating" always-on set).
    fn always_on(&self) -> bool {
        false
    }
    async fn call(&self, args: Value, ctx: &ToolContext) -> RuntimeResult<ToolOutput>;
}

pub struct ToolRegistry {
    tools: HashMap<&'static str, Arc<dyn ToolHandler>>,
    mode: ServerMode,
    unified_entry: &'static str,
}

impl ToolRegistry {
    pub fn new(mode: ServerMode, unified_entry: &'static str) -> Self {
        Self { tools: HashMap::new(), mode, unified_entry }
    }

    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        self.tools.insert(handler.name(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.get(name).cloned()
    }

    /// Applies §4.7 mode gating: `Agent` exposes the unified entry point
    /// plus always-on tools; `Manual` exposes everything except the
    /// unified entry; `All` exposes everything.
    pub fn visible_tools(&self) -> Vec<Arc<dyn ToolHandler>> {
        self.tools
            .values()
            .filter(|t| match self.mode {
                ServerMode::All => true,
                ServerMode::Agent => t.always_on() || t.name() == self.unified_entry,
                ServerMode::Manual => t.always_on() || t.name() != self.unified_entry,
            })
            .cloned()
            .collect()
    }

    pub fn is_visible(&self, name: &str) -> bool {
        self.visible_tools().iter().any(|t| t.name() == name)
    }

    pub fn list_descriptors(&self) -> Vec<Value> {
        let mut tools: Vec<_> = self.visible_tools();
        tools.sort_by_key(|t| t.name());
        tools
            .into_iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name(),
                    "description": t.description(),
                    "inputSchema": t.input_schema(),
                })
            })
            .collect()
    }
}

/// Prompt/resource catalogs are external collaborators' content; this core
/// only needs to serve the protocol methods over whatever's registered.
#[derive(Default)]
pub struct PromptRegistry {
    prompts: HashMap<String, Value>,
}

impl PromptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, descriptor: Value) {
        self.prompts.insert(name.into(), descriptor);
    }

    pub fn list(&self) -> Vec<Value> {
        self.prompts.values().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.prompts.get(name).cloned()
    }
}

#[derive(Default)]
pub struct ResourceRegistry {
    resources: HashMap<String, Value>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, uri: impl Into<String>, descriptor: Value) {
        self.resources.insert(uri.into(), descriptor);
    }

    pub fn list(&self) -> Vec<Value> {
        self.resources.values().cloned().collect()
    }

    pub fn read(&self, uri: &str) -> Option<Value> {
        self.resources.get(uri).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PingTool;

    #[async_trait]
    impl ToolHandler for PingTool {
        fn name(&self) -> &'static str {
            "ping"
        }
        fn description(&self) -> &'static str {
            "liveness check"
        }
        fn input_schema(&self) -> Value {
            serde_json::json!({ "type": "object" })
        }
        fn always_on(&self) -> bool {
            true
        }
        async fn call(&self, _args: Value, _ctx: &ToolContext) -> RuntimeResult<ToolOutput> {
            Ok(ToolOutput::Json(serde_json::json!({ "pong": true })))
        }
    }

    struct ResearchTool;

    #[async_trait]
    impl ToolHandler for ResearchTool {
        fn name(&self) -> &'static str {
            "agent"
        }
        fn description(&self) -> &'static str {
            "unified entry"
        }
        fn input_schema(&self) -> Value {
            serde_json::json!({ "type": "object" })
        }
        async fn call(&self, _args: Value, _ctx: &ToolContext) -> RuntimeResult<ToolOutput> {
            Ok(ToolOutput::Text("ok".to_string()))
        }
    }

    struct ManualOnlyTool;

    #[async_trait]
    impl ToolHandler for ManualOnlyTool {
        fn name(&self) -> &'static str {
            "execute_sql"
        }
        fn description(&self) -> &'static str {
            "sql"
        }
        fn input_schema(&self) -> Value {
            serde_json::json!({ "type": "object" })
        }
        async fn call(&self, _args: Value, _ctx: &ToolContext) -> RuntimeResult<ToolOutput> {
            Ok(ToolOutput::Text("ok".to_string()))
        }
    }

    fn registry(mode: ServerMode) -> ToolRegistry {
        let mut r = ToolRegistry::new(mode, "agent");
        r.register(Arc::new(PingTool));
        r.register(Arc::new(ResearchTool));
        r.register(Arc::new(ManualOnlyTool));
        r
    }

    #[test]
    fn agent_mode_exposes_unified_entry_and_always_on_only() {
        let r = registry(ServerMode::Agent);
        assert!(r.is_visible("ping"));
        assert!(r.is_visible("agent"));
        assert!(!r.is_visible("execute_sql"));
    }

    #[test]
    fn manual_mode_exposes_individual_tools_not_unified_entry() {
        let r = registry(ServerMode::Manual);
        assert!(r.is_visible("ping"));
        assert!(r.is_visible("execute_sql"));
        assert!(!r.is_visible("agent"));
    }

    #[test]
    fn all_mode_exposes_everything() {
        let r = registry(ServerMode::All);
        assert_eq!(r.visible_tools().len(), 3);
    }
}
