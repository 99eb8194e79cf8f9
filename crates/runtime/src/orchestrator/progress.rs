//! Progress event sink (§4.6 "Progress contract").
//!
//! Decouples the orchestrator from the job engine: the orchestrator doesn't
//! know it's running inside a job, it just emits typed progress events.

use async_trait::async_trait;
use serde_json::Value;

use crate::types::JobEventType;

#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn emit(&self, event_type: JobEventType, payload: Value);
}

pub struct NullProgressSink;

#[async_trait]
impl ProgressSink for NullProgressSink {
    async fn emit(&self, _event_type: JobEventType, _payload: Value) {}
}
