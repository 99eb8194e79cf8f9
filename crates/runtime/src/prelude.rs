//! Convenience re-exports for binaries embedding this crate.

pub use crate::auth::{AuthContext, Authenticator, RateLimiter};
pub use crate::config::Config;
pub use crate::embedding::{EmbeddingProvider, HttpEmbeddingProvider, NoOpEmbeddingProvider};
pub use crate::jobs::{JobEngine, JobEventBus, JobWorker};
pub use crate::llm::{HttpLlmGatewayClient, LlmGatewayClient, ModelCatalog};
pub use crate::mcp::{register_all, AppState, Dispatcher, ServerInfo, ToolCatalogCell};
pub use crate::metrics::MetricsRegistry;
pub use crate::orchestrator::ResearchOrchestrator;
pub use crate::retrieval::HybridIndex;
pub use crate::storage::{open_with_fallback, StorageGateway};
pub use crate::transport::{SessionStore, TransportState};
pub use crate::types::{RuntimeError, RuntimeResult, ServerMode};
