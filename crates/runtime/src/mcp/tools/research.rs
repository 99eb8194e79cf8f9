use async_trait::async_trait;
use serde_json::{json, Value};

use crate::orchestrator::{NullProgressSink, OrchestratorOutcome, ResearchRequest};
use crate::types::{CostPreference, JobId, RuntimeError, RuntimeResult};

use crate::mcp::registry::{ToolContext, ToolHandler, ToolOutput};

use super::AppState;

const RESEARCH_SCHEMA_PROPERTIES: &[(&str, &str)] = &[
    ("query", "string"),
    ("costPreference", "string"),
    ("audienceLevel", "string"),
    ("outputFormat", "string"),
    ("includeSources", "boolean"),
    ("images", "array"),
    ("textDocuments", "array"),
    ("structuredData", "object"),
];

fn research_schema() -> Value {
    let mut properties = serde_json::Map::new();
    for (name, ty) in RESEARCH_SCHEMA_PROPERTIES {
        properties.insert((*name).to_string(), json!({ "type": ty }));
    }
    properties.insert("async".to_string(), json!({ "type": "boolean" }));
    json!({
        "type": "object",
        "properties": Value::Object(properties),
        "required": ["query"],
    })
}

pub(crate) fn parse_research_request(args: &Value) -> Result<ResearchRequest, String> {
    let query = args
        .get("query")
        .and_then(|v| v.as_str())
        .ok_or("missing 'query'")?
        .to_string();

    let cost_preference = args
        .get("costPreference")
        .or_else(|| args.get("cost_preference"))
        .and_then(|v| v.as_str())
        .and_then(CostPreference::parse)
        .unwrap_or_default();

    let strings = |key: &str, alt: &str| -> Vec<String> {
        args.get(key)
            .or_else(|| args.get(alt))
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default()
    };

    Ok(ResearchRequest {
        query,
        cost_preference,
        audience_level: args
            .get("audienceLevel")
            .or_else(|| args.get("audience_level"))
            .and_then(|v| v.as_str())
            .map(str::to_string),
        output_format: args
            .get("outputFormat")
            .or_else(|| args.get("output_format"))
            .and_then(|v| v.as_str())
            .map(str::to_string),
        include_sources: args
            .get("includeSources")
            .or_else(|| args.get("include_sources"))
            .and_then(|v| v.as_bool())
            .unwrap_or(true),
        images: strings("images", "images"),
        text_documents: strings("textDocuments", "text_documents"),
        structured_data: args.get("structuredData").or_else(|| args.get("structured_data")).cloned(),
        max_iterations: args
            .get("maxIterations")
            .or_else(|| args.get("max_iterations"))
            .and_then(|v| v.as_u64())
            .map(|v| v as u32)
            .unwrap_or(1),
        ensemble_size: args
            .get("ensembleSize")
            .or_else(|| args.get("ensemble_size"))
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(1),
    })
}

fn wants_async(args: &Value) -> bool {
    args.get("async").and_then(|v| v.as_bool()).unwrap_or(true)
}

fn job_response(job_id: &str, status: &str, idempotency_key: &str, existing_job: bool, cached: bool) -> Value {
    json!({
        "job_id": job_id,
        "status": status,
        "resources": {
            "monitor": format!("/jobs/{job_id}/events"),
            "status": "tools://job_status",
            "result": "tools://get_job_result",
        },
        "idempotency_key": idempotency_key,
        "existing_job": existing_job,
        "cached": cached,
    })
}

pub(crate) async fn submit(state: &AppState, request: &ResearchRequest) -> RuntimeResult<Value> {
    let params = serde_json::to_value(request).map_err(|e| RuntimeError::Internal(e.to_string()))?;
    let outcome = state.jobs.submit("research", params, None, false, None).await?;
    Ok(job_response(
        &outcome.job.id.to_string(),
        outcome.job.status.as_str(),
        &outcome.job.idempotency_key,
        outcome.existing_job,
        outcome.cached,
    ))
}

async fn run_sync(state: &AppState, request: ResearchRequest) -> RuntimeResult<Value> {
    let job_id = JobId::new();
    match state.orchestrator.run(job_id, request, std::sync::Arc::new(NullProgressSink)).await? {
        OrchestratorOutcome::Completed(report) => Ok(json!({
            "report_id": report.id.0,
            "output_markdown": report.output_markdown,
            "sources": report.sources,
            "metadata": report.metadata,
        })),
        OrchestratorOutcome::Failed { message, sub_query_outputs } => Ok(json!({
            "failed": true,
            "message": message,
            "sub_query_outputs": sub_query_outputs,
        })),
    }
}

/// Unified entry point (§4.7): routes on `action`, defaulting to `research`
/// when the caller only supplies a `query`.
pub struct AgentTool {
    state: AppState,
}

impl AgentTool {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

#[async_trait]
impl ToolHandler for AgentTool {
    fn name(&self) -> &'static str {
        "agent"
    }
    fn description(&self) -> &'static str {
        "Unified entry point: routes to research, retrieve, or follow-up based on 'action'."
    }
    fn input_schema(&self) -> Value {
        let mut schema = research_schema();
        schema["properties"]["action"] = json!({ "type": "string", "enum": ["research", "retrieve", "follow_up"] });
        schema
    }
    async fn call(&self, args: Value, ctx: &ToolContext) -> RuntimeResult<ToolOutput> {
        let action = args.get("action").and_then(|v| v.as_str()).unwrap_or("research");
        match action {
            "retrieve" => super::retrieval::handle_retrieve(&self.state, &args).await,
            _ => {
                let request = parse_research_request(&args).map_err(RuntimeError::InvalidParams)?;
                if wants_async(&args) {
                    Ok(ToolOutput::Json(submit(&self.state, &request).await?))
                } else {
                    ctx.send_progress(0.0, Some("running research synchronously".to_string()));
                    Ok(ToolOutput::Json(run_sync(&self.state, request).await?))
                }
            }
        }
    }
}

pub struct ResearchTool {
    state: AppState,
}

impl ResearchTool {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

#[async_trait]
impl ToolHandler for ResearchTool {
    fn name(&self) -> &'static str {
        "research"
    }
    fn description(&self) -> &'static str {
        "Runs deep research over a query. Async by default; pass async:false to block for the result."
    }
    fn input_schema(&self) -> Value {
        research_schema()
    }
    async fn call(&self, args: Value, _ctx: &ToolContext) -> RuntimeResult<ToolOutput> {
        let request = parse_research_request(&args).map_err(RuntimeError::InvalidParams)?;
        if wants_async(&args) {
            Ok(ToolOutput::Json(submit(&self.state, &request).await?))
        } else {
            Ok(ToolOutput::Json(run_sync(&self.state, request).await?))
        }
    }
}

pub struct SubmitResearchTool {
    state: AppState,
}

impl SubmitResearchTool {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

#[async_trait]
impl ToolHandler for SubmitResearchTool {
    fn name(&self) -> &'static str {
        "submit_research"
    }
    fn description(&self) -> &'static str {
        "Submits a research job and returns immediately with a job_id, never blocking."
    }
    fn input_schema(&self) -> Value {
        research_schema()
    }
    async fn call(&self, args: Value, _ctx: &ToolContext) -> RuntimeResult<ToolOutput> {
        let request = parse_research_request(&args).map_err(RuntimeError::InvalidParams)?;
        Ok(ToolOutput::Json(submit(&self.state, &request).await?))
    }
}

pub struct ConductResearchTool {
    state: AppState,
}

impl ConductResearchTool {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

#[async_trait]
impl ToolHandler for ConductResearchTool {
    fn name(&self) -> &'static str {
        "conduct_research"
    }
    fn description(&self) -> &'static str {
        "Runs research synchronously, bypassing the job queue, and returns the finished report."
    }
    fn input_schema(&self) -> Value {
        research_schema()
    }
    async fn call(&self, args: Value, _ctx: &ToolContext) -> RuntimeResult<ToolOutput> {
        let request = parse_research_request(&args).map_err(RuntimeError::InvalidParams)?;
        Ok(ToolOutput::Json(run_sync(&self.state, request).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_camel_case_fields() {
        let args = json!({
            "query": "rust ownership",
            "costPreference": "high",
            "includeSources": false,
        });
        let request = parse_research_request(&args).unwrap();
        assert_eq!(request.query, "rust ownership");
        assert_eq!(request.cost_preference, CostPreference::High);
        assert!(!request.include_sources);
    }

    #[test]
    fn missing_query_is_rejected() {
        assert!(parse_research_request(&json!({})).is_err());
    }

    #[test]
    fn async_defaults_to_true() {
        assert!(wants_async(&json!({})));
        assert!(!wants_async(&json!({ "async": false })));
    }
}
