//! Request dispatch (§4.7): method routing, capability negotiation, mode
//! gating, argument normalization/validation, and content-block wrapping.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::types::{McpError, RuntimeError, RuntimeResult};

use super::jsonrpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use super::normalize::{apply_field_aliases, normalize};
use super::registry::{error_result, PromptRegistry, ResourceRegistry, ToolContext, ToolOutput, ToolRegistry};
use super::session::{McpSession, LATEST_PROTOCOL_VERSION, SUPPORTED_PROTOCOL_VERSIONS};

pub struct ServerInfo {
    pub name: &'static str,
    pub version: &'static str,
}

pub struct Dispatcher {
    pub tools: Arc<ToolRegistry>,
    pub prompts: Arc<PromptRegistry>,
    pub resources: Arc<ResourceRegistry>,
    pub server_info: ServerInfo,
}

/// A notification the dispatcher wants delivered out-of-band (progress
/// events); transports drain this alongside the direct response.
pub struct DispatchOutcome {
    pub response: Option<JsonRpcResponse>,
    pub progress: Vec<(Value, f64, Option<String>)>,
}

impl Dispatcher {
    pub async fn dispatch(&self, session: &McpSession, request: JsonRpcRequest) -> DispatchOutcome {
        let id = request.id.clone().unwrap_or(Value::Null);
        let is_notification = request.is_notification();

        if request.method == "notifications/cancelled" {
            session.cancel_all();
            return DispatchOutcome { response: None, progress: Vec::new() };
        }

        let gate = self.check_preinitialization_gate(session, &request.method);
        if let Err(e) = gate {
            return self.finish(is_notification, id, Err(e));
        }

        let (progress_tx, mut progress_rx) = tokio::sync::mpsc::unbounded_channel();
        let ctx = ToolContext::new(
            request.progress_token(),
            Some(progress_tx),
            session.cancellation_receiver(),
        );

        let result = self.route(session, &request, &ctx).await;
        progress_rx.close();
        let mut progress = Vec::new();
        while let Ok(p) = progress_rx.try_recv() {
            progress.push(p);
        }

        let mut outcome = self.finish(is_notification, id, result);
        outcome.progress = progress;
        outcome
    }

    fn finish(&self, is_notification: bool, id: Value, result: RuntimeResult<Value>) -> DispatchOutcome {
        if is_notification {
            return DispatchOutcome { response: None, progress: Vec::new() };
        }
        let response = match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(e) => JsonRpcResponse::failure(id, JsonRpcError::from(e)),
        };
        DispatchOutcome { response: Some(response), progress: Vec::new() }
    }

    fn check_preinitialization_gate(&self, session: &McpSession, method: &str) -> RuntimeResult<()> {
        let allowed_before_ready = matches!(method, "initialize" | "ping" | "notifications/initialized");
        if !session.is_ready() && !allowed_before_ready {
            return Err(McpError::PreInitialization.into());
        }
        Ok(())
    }

    async fn route(&self, session: &McpSession, request: &JsonRpcRequest, ctx: &ToolContext) -> RuntimeResult<Value> {
        match request.method.as_str() {
            "initialize" => Ok(self.handle_initialize(session, &request.params)),
            "notifications/initialized" => {
                session.mark_ready();
                Ok(Value::Null)
            }
            "ping" => Ok(json!({ "pong": true })),
            "tools/list" => Ok(json!({ "tools": self.tools.list_descriptors() })),
            "tools/call" => self.handle_tools_call(&request.params, ctx).await,
            "prompts/list" => Ok(json!({ "prompts": self.prompts.list() })),
            "prompts/get" => {
                let name = request
                    .params
                    .get("name")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| RuntimeError::InvalidParams("missing 'name'".to_string()))?;
                self.prompts
                    .get(name)
                    .ok_or_else(|| RuntimeError::NotFound(format!("prompt not found: {name}")))
            }
            "resources/list" => Ok(json!({ "resources": self.resources.list() })),
            "resources/read" => {
                let uri = request
                    .params
                    .get("uri")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| RuntimeError::InvalidParams("missing 'uri'".to_string()))?;
                self.resources
                    .read(uri)
                    .ok_or_else(|| RuntimeError::NotFound(format!("resource not found: {uri}")))
            }
            "resources/subscribe" => Ok(json!({ "subscribed": true })),
            "completion/complete" => Ok(json!({ "completion": { "values": [] } })),
            "logging/setLevel" => {
                tracing::info!(params = %request.params, "logging/setLevel requested");
                Ok(json!({}))
            }
            other => Err(RuntimeError::Mcp(McpError::ToolNotFound(other.to_string()))),
        }
    }

    fn handle_initialize(&self, session: &McpSession, params: &Value) -> Value {
        let requested = params
            .get("protocolVersion")
            .and_then(|v| v.as_str())
            .unwrap_or(LATEST_PROTOCOL_VERSION);
        let negotiated = session.negotiate_protocol_version(requested);
        json!({
            "protocolVersion": negotiated,
            "capabilities": {
                "tools": {},
                "prompts": { "listChanged": false },
                "resources": { "subscribe": true, "listChanged": false },
                "logging": {},
                "completions": {},
            },
            "serverInfo": { "name": self.server_info.name, "version": self.server_info.version },
            "supportedProtocolVersions": SUPPORTED_PROTOCOL_VERSIONS,
        })
    }

    async fn handle_tools_call(&self, params: &Value, ctx: &ToolContext) -> RuntimeResult<Value> {
        let name = params
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| RuntimeError::InvalidParams("missing 'name'".to_string()))?;

        if !self.tools.is_visible(name) {
            return Err(RuntimeError::Mcp(McpError::ToolNotFound(name.to_string())));
        }
        let handler = self
            .tools
            .get(name)
            .ok_or_else(|| RuntimeError::Mcp(McpError::ToolNotFound(name.to_string())))?;

        let raw_args = params.get("arguments").cloned().unwrap_or(json!({}));
        let normalized = apply_field_aliases(name, normalize(name, raw_args));

        let schema = handler.input_schema();
        if let Ok(validator) = jsonschema::validator_for(&schema) {
            let errors: Vec<String> = validator.iter_errors(&normalized).map(|e| e.to_string()).collect();
            if !errors.is_empty() {
                return Err(RuntimeError::Mcp(McpError::SchemaValidation(errors.join("; "))));
            }
        }

        match handler.call(normalized, ctx).await {
            Ok(output) => Ok(output.into_result()),
            Err(e) => Ok(error_result(&e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::registry::ToolHandler;
    use crate::types::TransportKind;
    use async_trait::async_trait;

    struct PingTool;

    #[async_trait]
    impl ToolHandler for PingTool {
        fn name(&self) -> &'static str {
            "ping"
        }
        fn description(&self) -> &'static str {
            "liveness"
        }
        fn input_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        fn always_on(&self) -> bool {
            true
        }
        async fn call(&self, _args: Value, _ctx: &ToolContext) -> RuntimeResult<ToolOutput> {
            Ok(ToolOutput::Json(json!({ "pong": true })))
        }
    }

    fn dispatcher() -> Dispatcher {
        let mut tools = ToolRegistry::new(crate::types::ServerMode::All, "agent");
        tools.register(Arc::new(PingTool));
        Dispatcher {
            tools: Arc::new(tools),
            prompts: Arc::new(PromptRegistry::new()),
            resources: Arc::new(ResourceRegistry::new()),
            server_info: ServerInfo { name: "deepresearch-mcpd", version: "0.1.0" },
        }
    }

    fn req(method: &str, params: Value, id: Option<Value>) -> JsonRpcRequest {
        JsonRpcRequest { jsonrpc: Some("2.0".to_string()), id, method: method.to_string(), params }
    }

    #[tokio::test]
    async fn methods_before_initialized_are_rejected_except_initialize_and_ping() {
        let dispatcher = dispatcher();
        let session = McpSession::new(TransportKind::StreamableHttp);

        let outcome = dispatcher.dispatch(&session, req("tools/list", json!({}), Some(json!(1)))).await;
        let response = outcome.response.unwrap();
        assert_eq!(response.error.unwrap().code, -32002);

        let outcome = dispatcher.dispatch(&session, req("ping", json!({}), Some(json!(2)))).await;
        assert!(outcome.response.unwrap().error.is_none());
    }

    #[tokio::test]
    async fn initialize_then_initialized_notification_unlocks_other_methods() {
        let dispatcher = dispatcher();
        let session = McpSession::new(TransportKind::StreamableHttp);

        dispatcher.dispatch(&session, req("initialize", json!({ "protocolVersion": "2025-06-18" }), Some(json!(1)))).await;
        let outcome = dispatcher
            .dispatch(&session, req("notifications/initialized", json!({}), None))
            .await;
        assert!(outcome.response.is_none());

        let outcome = dispatcher.dispatch(&session, req("tools/list", json!({}), Some(json!(2)))).await;
        let response = outcome.response.unwrap();
        assert!(response.error.is_none());
    }

    #[tokio::test]
    async fn tools_call_invokes_registered_handler() {
        let dispatcher = dispatcher();
        let session = McpSession::new(TransportKind::StreamableHttp);
        session.mark_ready();

        let outcome = dispatcher
            .dispatch(&session, req("tools/call", json!({ "name": "ping", "arguments": {} }), Some(json!(1))))
            .await;
        let response = outcome.response.unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["structuredContent"]["pong"], json!(true));
    }

    #[tokio::test]
    async fn unknown_tool_returns_tool_not_found() {
        let dispatcher = dispatcher();
        let session = McpSession::new(TransportKind::StreamableHttp);
        session.mark_ready();

        let outcome = dispatcher
            .dispatch(&session, req("tools/call", json!({ "name": "nonexistent" }), Some(json!(1))))
            .await;
        let response = outcome.response.unwrap();
        assert_eq!(response.error.unwrap().code, -32020);
    }
}
