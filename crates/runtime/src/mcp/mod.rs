//! MCP protocol core (§4.7): JSON-RPC envelopes, tool/prompt/resource
//! registries, loose-argument normalization, session state, and dispatch.

pub mod dispatch;
pub mod jsonrpc;
pub mod normalize;
pub mod registry;
pub mod session;
pub mod tools;

pub use dispatch::{DispatchOutcome, Dispatcher, ServerInfo};
pub use jsonrpc::{JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
pub use registry::{error_result, PromptRegistry, ResourceRegistry, ToolContext, ToolHandler, ToolOutput, ToolRegistry};
pub use session::McpSession;
pub use tools::{register_all, AppState, ToolCatalogCell};
