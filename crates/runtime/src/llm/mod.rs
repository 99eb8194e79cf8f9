//! LLM Gateway Client (C3): provider-agnostic chat completion, streaming,
//! retry/backoff, and a TTL-cached dynamic model catalog.

pub mod catalog;
pub mod client;
pub mod types;

pub use catalog::ModelCatalog;
pub use client::{HttpLlmGatewayClient, LlmGatewayClient};
pub use types::{
    select_vision_model, ChatCompletionResult, ChatMessage, ChatOptions, ChatRole, ModelDescriptor,
    ResponseFormat, StreamDelta,
};
