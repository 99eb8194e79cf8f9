use async_trait::async_trait;
use serde_json::{json, Value};

use crate::types::{ReportId, RuntimeError, RuntimeResult};

use crate::mcp::registry::{ToolContext, ToolHandler, ToolOutput};

use super::AppState;

const DEFAULT_HISTORY_LIMIT: usize = 20;

pub struct ListResearchHistoryTool {
    state: AppState,
}

impl ListResearchHistoryTool {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

#[async_trait]
impl ToolHandler for ListResearchHistoryTool {
    fn name(&self) -> &'static str {
        "list_research_history"
    }
    fn description(&self) -> &'static str {
        "Lists recently completed research reports, most recent first."
    }
    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "limit": { "type": "integer" },
                "queryFilter": { "type": "string" },
            },
        })
    }
    async fn call(&self, args: Value, _ctx: &ToolContext) -> RuntimeResult<ToolOutput> {
        let limit = args.get("limit").and_then(|v| v.as_u64()).unwrap_or(DEFAULT_HISTORY_LIMIT as u64) as usize;
        let query_filter = args.get("queryFilter").and_then(|v| v.as_str());

        let reports = self.state.storage.list_recent_reports(limit.max(1)).await?;
        let filtered: Vec<_> = reports
            .into_iter()
            .filter(|r| query_filter.map(|f| r.query.to_ascii_lowercase().contains(&f.to_ascii_lowercase())).unwrap_or(true))
            .map(|r| {
                json!({
                    "report_id": r.id.0,
                    "query": r.query,
                    "created_at": r.created_at,
                    "iterations": r.metadata.iterations,
                    "total_tokens": r.metadata.total_tokens,
                })
            })
            .collect();
        Ok(ToolOutput::Json(json!({ "reports": filtered })))
    }
}

pub struct GetReportContentTool {
    state: AppState,
}

impl GetReportContentTool {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

#[async_trait]
impl ToolHandler for GetReportContentTool {
    fn name(&self) -> &'static str {
        "get_report_content"
    }
    fn description(&self) -> &'static str {
        "Fetches a saved report's content. mode:summary truncates to maxChars (default 2000)."
    }
    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "reportId": { "type": "string" },
                "mode": { "type": "string", "enum": ["summary", "full"] },
                "maxChars": { "type": "integer" },
            },
            "required": ["reportId"],
        })
    }
    async fn call(&self, args: Value, _ctx: &ToolContext) -> RuntimeResult<ToolOutput> {
        let raw_id = args
            .get("reportId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| RuntimeError::InvalidParams("missing 'reportId'".to_string()))?;
        let id = raw_id
            .parse::<i64>()
            .map_err(|_| RuntimeError::InvalidParams(format!("invalid reportId '{raw_id}'")))?;
        let report = self
            .state
            .storage
            .get_report(ReportId(id))
            .await?
            .ok_or_else(|| RuntimeError::NotFound(format!("report not found: {raw_id}")))?;

        let mode = args.get("mode").and_then(|v| v.as_str()).unwrap_or("full");
        let max_chars = args.get("maxChars").and_then(|v| v.as_u64()).unwrap_or(2000) as usize;

        let output_markdown = if mode == "summary" && report.output_markdown.chars().count() > max_chars {
            let truncated: String = report.output_markdown.chars().take(max_chars).collect();
            format!("{truncated}\n...[truncated]")
        } else {
            report.output_markdown
        };

        Ok(ToolOutput::Json(json!({
            "report_id": report.id.0,
            "query": report.query,
            "created_at": report.created_at,
            "output_markdown": output_markdown,
            "sources": report.sources,
            "metadata": report.metadata,
        })))
    }
}
