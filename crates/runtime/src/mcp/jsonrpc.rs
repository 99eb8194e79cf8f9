//! JSON-RPC 2.0 envelope types (§4.7). Hand-rolled rather than pulled from
//! an SDK: transport-specific behavior (batch rejection, custom error
//! codes, resumable cursors) doesn't fit a macro-generated dispatcher.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl JsonRpcRequest {
    /// A request with no `id` is a notification: the caller does not
    /// expect a response.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    pub fn progress_token(&self) -> Option<Value> {
        self.params.get("_meta")?.get("progressToken").cloned()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self { jsonrpc: JSONRPC_VERSION, id, result: Some(result), error: None }
    }

    pub fn failure(id: Value, error: JsonRpcError) -> Self {
        Self { jsonrpc: JSONRPC_VERSION, id, result: None, error: Some(error) }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), data: None }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn parse_error() -> Self {
        Self::new(-32700, "parse error")
    }

    pub fn invalid_request() -> Self {
        Self::new(-32600, "invalid request")
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(-32601, format!("method not found: {method}"))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(-32602, message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(-32603, message.into())
    }
}

impl From<crate::types::RuntimeError> for JsonRpcError {
    fn from(err: crate::types::RuntimeError) -> Self {
        match &err {
            crate::types::RuntimeError::Mcp(mcp_err) => {
                Self::new(mcp_err.json_rpc_code(), mcp_err.to_string())
            }
            crate::types::RuntimeError::InvalidParams(_) => Self::invalid_params(err.to_string()),
            crate::types::RuntimeError::NotFound(_) => Self::new(-32001, err.to_string()),
            _ => Self::internal(err.to_string()),
        }
    }
}

/// A server-to-client notification (no `id`, no response expected).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    pub params: Value,
}

impl JsonRpcNotification {
    pub fn new(method: &'static str, params: Value) -> Self {
        Self { jsonrpc: JSONRPC_VERSION, method, params }
    }

    pub fn progress(progress_token: Value, progress: f64, message: Option<String>) -> Self {
        let mut params = serde_json::json!({ "progressToken": progress_token, "progress": progress });
        if let Some(m) = message {
            params["message"] = Value::String(m);
        }
        Self::new("notifications/progress", params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_has_no_id() {
        let req: JsonRpcRequest = serde_json::from_value(serde_json::json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized",
        }))
        .unwrap();
        assert!(req.is_notification());
    }

    #[test]
    fn extracts_progress_token_from_meta() {
        let req: JsonRpcRequest = serde_json::from_value(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/call",
            "params": { "_meta": { "progressToken": "abc" } }
        }))
        .unwrap();
        assert_eq!(req.progress_token(), Some(Value::String("abc".to_string())));
    }
}
