use std::str::FromStr;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::types::{JobId, RuntimeError, RuntimeResult};

use crate::mcp::registry::{ToolContext, ToolHandler, ToolOutput};

use super::AppState;

fn parse_job_id(args: &Value) -> RuntimeResult<JobId> {
    let raw = args
        .get("job_id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| RuntimeError::InvalidParams("missing 'job_id'".to_string()))?;
    JobId::from_str(raw).map_err(|_| RuntimeError::InvalidParams(format!("invalid job_id '{raw}'")))
}

fn job_id_schema() -> Value {
    json!({
        "type": "object",
        "properties": { "job_id": { "type": "string" } },
        "required": ["job_id"],
    })
}

pub struct JobStatusTool {
    state: AppState,
}

impl JobStatusTool {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

#[async_trait]
impl ToolHandler for JobStatusTool {
    fn name(&self) -> &'static str {
        "job_status"
    }
    fn description(&self) -> &'static str {
        "Returns a job's current status. format:summary|events|full controls detail."
    }
    fn input_schema(&self) -> Value {
        let mut schema = job_id_schema();
        schema["properties"]["format"] = json!({ "type": "string", "enum": ["summary", "events", "full"] });
        schema
    }
    fn always_on(&self) -> bool {
        true
    }
    async fn call(&self, args: Value, _ctx: &ToolContext) -> RuntimeResult<ToolOutput> {
        let job_id = parse_job_id(&args)?;
        let format = args.get("format").and_then(|v| v.as_str()).unwrap_or("summary");
        let job = self
            .state
            .storage
            .get_job(job_id)
            .await?
            .ok_or_else(|| RuntimeError::NotFound(format!("job not found: {job_id}")))?;

        let mut body = json!({
            "job_id": job.id.to_string(),
            "status": job.status.as_str(),
            "attempt": job.attempt,
            "created_at": job.created_at,
            "updated_at": job.updated_at,
        });
        if format == "full" {
            body["result"] = job.result.clone().unwrap_or(Value::Null);
        }
        if format == "events" || format == "full" {
            let events = self.state.storage.get_job_events(job_id, 0, 500).await?;
            body["events"] = serde_json::to_value(events).map_err(|e| RuntimeError::Internal(e.to_string()))?;
        }
        Ok(ToolOutput::Json(body))
    }
}

pub struct GetJobResultTool {
    state: AppState,
}

impl GetJobResultTool {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

#[async_trait]
impl ToolHandler for GetJobResultTool {
    fn name(&self) -> &'static str {
        "get_job_result"
    }
    fn description(&self) -> &'static str {
        "Returns a job's result payload, or an error if it has not reached a terminal state."
    }
    fn input_schema(&self) -> Value {
        job_id_schema()
    }
    fn always_on(&self) -> bool {
        true
    }
    async fn call(&self, args: Value, _ctx: &ToolContext) -> RuntimeResult<ToolOutput> {
        let job_id = parse_job_id(&args)?;
        let job = self
            .state
            .storage
            .get_job(job_id)
            .await?
            .ok_or_else(|| RuntimeError::NotFound(format!("job not found: {job_id}")))?;
        if !job.status.is_terminal() {
            return Err(RuntimeError::Conflict(format!("job {job_id} is still {}", job.status.as_str())));
        }
        Ok(ToolOutput::Json(json!({
            "job_id": job.id.to_string(),
            "status": job.status.as_str(),
            "result": job.result,
        })))
    }
}

pub struct CancelJobTool {
    state: AppState,
}

impl CancelJobTool {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

#[async_trait]
impl ToolHandler for CancelJobTool {
    fn name(&self) -> &'static str {
        "cancel_job"
    }
    fn description(&self) -> &'static str {
        "Requests cooperative cancellation of a job. Asynchronous: the job settles into 'canceled' once its worker acknowledges."
    }
    fn input_schema(&self) -> Value {
        job_id_schema()
    }
    fn always_on(&self) -> bool {
        true
    }
    async fn call(&self, args: Value, _ctx: &ToolContext) -> RuntimeResult<ToolOutput> {
        let job_id = parse_job_id(&args)?;
        let canceled = self.state.jobs.cancel(job_id).await?;
        Ok(ToolOutput::Json(json!({ "job_id": job_id.to_string(), "canceled": canceled })))
    }
}
