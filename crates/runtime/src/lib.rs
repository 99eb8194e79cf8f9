//! deepresearch-runtime: the MCP broker core — JSON-RPC transport,
//! durable job engine, research orchestrator, and hybrid retrieval index.

pub mod auth;
pub mod config;
pub mod embedding;
pub mod jobs;
pub mod llm;
pub mod mcp;
pub mod metrics;
pub mod orchestrator;
pub mod prelude;
pub mod retrieval;
pub mod storage;
pub mod transport;
pub mod types;

pub use config::Config;
pub use mcp::{register_all, AppState, Dispatcher, ServerInfo};
