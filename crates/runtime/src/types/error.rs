//! Error taxonomy for the runtime.

use thiserror::Error;

/// Top-level runtime error, composed from per-component error enums.
#[derive(Error, Debug, Clone)]
pub enum RuntimeError {
    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("llm gateway error: {0}")]
    Llm(#[from] LlmError),

    #[error("job engine error: {0}")]
    Job(#[from] JobError),

    #[error("retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("mcp protocol error: {0}")]
    Mcp(#[from] McpError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RuntimeError {
    /// Maps this error onto one of the taxonomy classes used by MCP content
    /// blocks and HTTP status mapping. `Degraded` is not represented here
    /// because it never blocks a result; see `Degraded<T>`.
    pub fn class(&self) -> &'static str {
        match self {
            RuntimeError::InvalidParams(_) => "InvalidParams",
            RuntimeError::Unauthorized(_) => "Unauthorized",
            RuntimeError::Forbidden(_) => "Forbidden",
            RuntimeError::NotFound(_) => "NotFound",
            RuntimeError::Conflict(_) => "Conflict",
            RuntimeError::Timeout(_) => "Timeout",
            RuntimeError::Upstream(_) => "UpstreamError",
            RuntimeError::StorageUnavailable(_) => "StorageUnavailable",
            RuntimeError::Storage(_) => "StorageUnavailable",
            RuntimeError::Llm(_) => "UpstreamError",
            RuntimeError::Job(_) => "Conflict",
            RuntimeError::Retrieval(_) => "Internal",
            RuntimeError::Orchestrator(_) => "Internal",
            RuntimeError::Mcp(_) => "InvalidParams",
            RuntimeError::Internal(_) => "Internal",
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum StorageError {
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("sql rejected: {0}")]
    SqlRejected(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("rate limited")]
    RateLimited,
    #[error("upstream status {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("timeout after {0}ms")]
    Timeout(u64),
    #[error("retries exhausted: {0}")]
    RetriesExhausted(String),
    #[error("no model available: {0}")]
    NoModelAvailable(String),
    #[error("response parse error: {0}")]
    ParseError(String),
}

#[derive(Error, Debug, Clone)]
pub enum JobError {
    #[error("job not found: {0}")]
    NotFound(String),
    #[error("job already terminal: {0}")]
    AlreadyTerminal(String),
    #[error("lease not held by caller")]
    LeaseNotHeld,
    #[error("idempotency conflict: {0}")]
    IdempotencyConflict(String),
}

#[derive(Error, Debug, Clone)]
pub enum RetrievalError {
    #[error("embedding provider not ready")]
    EmbedderNotReady,
    #[error("index error: {0}")]
    Index(String),
}

#[derive(Error, Debug, Clone)]
pub enum OrchestratorError {
    #[error("planning failed: {0}")]
    PlanningFailed(String),
    #[error("synthesis failed: {0}")]
    SynthesisFailed(String),
    #[error("all sub-queries failed")]
    AllSubQueriesFailed,
}

#[derive(Error, Debug, Clone)]
pub enum McpError {
    #[error("pre-initialization: method called before initialize")]
    PreInitialization,
    #[error("insufficient scope: {0}")]
    InsufficientScope(String),
    #[error("tool not found: {0}")]
    ToolNotFound(String),
    #[error("batch requests not supported on this transport")]
    BatchNotSupported,
    #[error("schema validation failed: {0}")]
    SchemaValidation(String),
}

impl McpError {
    /// JSON-RPC error code for this error: the domain-specific codes
    /// (-32002/-32010/-32020) plus the standard JSON-RPC ranges for the rest.
    pub fn json_rpc_code(&self) -> i64 {
        match self {
            McpError::PreInitialization => -32002,
            McpError::InsufficientScope(_) => -32010,
            McpError::ToolNotFound(_) => -32020,
            McpError::BatchNotSupported => -32600,
            McpError::SchemaValidation(_) => -32602,
        }
    }
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Wraps a successful result that was produced via a fallback path.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Degraded<T> {
    pub value: T,
    pub reason: Option<DegradedReason>,
}

impl<T> Degraded<T> {
    pub fn ok(value: T) -> Self {
        Self {
            value,
            reason: None,
        }
    }

    pub fn degraded(value: T, reason: DegradedReason) -> Self {
        Self {
            value,
            reason: Some(reason),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.reason.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradedReason {
    NoVisionModel,
    EmbedderNotReady,
    VectorPathUnavailable,
    InMemoryStorageFallback,
}

impl DegradedReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DegradedReason::NoVisionModel => "no_vision_model",
            DegradedReason::EmbedderNotReady => "embedder_not_ready",
            DegradedReason::VectorPathUnavailable => "vector_path_unavailable",
            DegradedReason::InMemoryStorageFallback => "in_memory_storage_fallback",
        }
    }
}
