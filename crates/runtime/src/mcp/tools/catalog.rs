use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::types::{RuntimeError, RuntimeResult};

use crate::mcp::registry::{ToolContext, ToolHandler, ToolOutput};

use super::AppState;

pub struct ListModelsTool {
    state: AppState,
}

impl ListModelsTool {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

#[async_trait]
impl ToolHandler for ListModelsTool {
    fn name(&self) -> &'static str {
        "list_models"
    }
    fn description(&self) -> &'static str {
        "Lists models available through the configured LLM gateway, from the TTL-cached catalog."
    }
    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "refresh": { "type": "boolean" } },
        })
    }
    async fn call(&self, args: Value, _ctx: &ToolContext) -> RuntimeResult<ToolOutput> {
        let refresh = args.get("refresh").and_then(|v| v.as_bool()).unwrap_or(false);
        let models = self.state.catalog.list(refresh).await?;
        Ok(ToolOutput::Json(json!({ "models": models })))
    }
}

pub struct GetServerStatusTool {
    state: AppState,
}

impl GetServerStatusTool {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

#[async_trait]
impl ToolHandler for GetServerStatusTool {
    fn name(&self) -> &'static str {
        "get_server_status"
    }
    fn description(&self) -> &'static str {
        "Reports server readiness: storage degradation, mode, and embedder status."
    }
    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }
    fn always_on(&self) -> bool {
        true
    }
    async fn call(&self, _args: Value, _ctx: &ToolContext) -> RuntimeResult<ToolOutput> {
        Ok(ToolOutput::Json(json!({
            "mode": format!("{:?}", self.state.mode).to_lowercase(),
            "storage_degraded": self.state.storage.is_degraded(),
        })))
    }
}

/// Snapshot of the tool registry's descriptors, filled in once after
/// registration completes (see `register_all`). `list_tools`/`search_tools`
/// can't hold a live reference to the still-being-built `ToolRegistry`.
#[derive(Default)]
pub struct ToolCatalogCell(OnceLock<Vec<Value>>);

impl ToolCatalogCell {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, descriptors: Vec<Value>) {
        let _ = self.0.set(descriptors);
    }

    fn get(&self) -> &[Value] {
        self.0.get().map(|v| v.as_slice()).unwrap_or(&[])
    }
}

pub struct ListToolsTool {
    cell: Arc<ToolCatalogCell>,
}

impl ListToolsTool {
    pub fn new(cell: Arc<ToolCatalogCell>) -> Self {
        Self { cell }
    }
}

#[async_trait]
impl ToolHandler for ListToolsTool {
    fn name(&self) -> &'static str {
        "list_tools"
    }
    fn description(&self) -> &'static str {
        "Lists every tool visible in the current server mode."
    }
    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }
    async fn call(&self, _args: Value, _ctx: &ToolContext) -> RuntimeResult<ToolOutput> {
        Ok(ToolOutput::Json(json!({ "tools": self.cell.get() })))
    }
}

pub struct SearchToolsTool {
    cell: Arc<ToolCatalogCell>,
}

impl SearchToolsTool {
    pub fn new(cell: Arc<ToolCatalogCell>) -> Self {
        Self { cell }
    }
}

#[async_trait]
impl ToolHandler for SearchToolsTool {
    fn name(&self) -> &'static str {
        "search_tools"
    }
    fn description(&self) -> &'static str {
        "Searches the tool catalog by a substring match against name and description."
    }
    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "query": { "type": "string" } },
            "required": ["query"],
        })
    }
    async fn call(&self, args: Value, _ctx: &ToolContext) -> RuntimeResult<ToolOutput> {
        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .ok_or_else(|| RuntimeError::InvalidParams("missing 'query'".to_string()))?
            .to_ascii_lowercase();
        let matches: Vec<_> = self
            .cell
            .get()
            .iter()
            .filter(|tool| {
                let name = tool.get("name").and_then(|v| v.as_str()).unwrap_or_default();
                let description = tool.get("description").and_then(|v| v.as_str()).unwrap_or_default();
                name.to_ascii_lowercase().contains(&query) || description.to_ascii_lowercase().contains(&query)
            })
            .cloned()
            .collect();
        Ok(ToolOutput::Json(json!({ "tools": matches })))
    }
}
