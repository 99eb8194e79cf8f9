use async_trait::async_trait;
use serde_json::{json, Value};

use crate::retrieval::NewDocument;
use crate::types::{DocOrigin, RuntimeError, RuntimeResult};

use crate::mcp::registry::{ToolContext, ToolHandler, ToolOutput};

use super::AppState;

const DEFAULT_TOP_K: usize = 10;

fn parse_scope(args: &Value) -> Option<DocOrigin> {
    match args.get("scope").and_then(|v| v.as_str()) {
        Some("reports") => Some(DocOrigin::Report),
        // "docs" and "both" can't be expressed as a single DocOrigin filter;
        // both fall through to unscoped search.
        _ => None,
    }
}

/// Shared by the `retrieve` tool and the `agent` unified entry's
/// `action:retrieve` route.
pub async fn handle_retrieve(state: &AppState, args: &Value) -> RuntimeResult<ToolOutput> {
    let mode = args.get("mode").and_then(|v| v.as_str()).unwrap_or("index");
    let k = args.get("k").and_then(|v| v.as_u64()).unwrap_or(DEFAULT_TOP_K as u64) as usize;

    match mode {
        "sql" => {
            let sql = args
                .get("sql")
                .and_then(|v| v.as_str())
                .ok_or_else(|| RuntimeError::InvalidParams("missing 'sql'".to_string()))?;
            let params: Vec<Value> = args
                .get("params")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();
            let result = state.storage.execute_read_only_sql(sql, &params).await?;
            Ok(ToolOutput::Json(json!({ "columns": result.columns, "rows": result.rows })))
        }
        _ => {
            let query = args
                .get("query")
                .and_then(|v| v.as_str())
                .ok_or_else(|| RuntimeError::InvalidParams("missing 'query'".to_string()))?;
            let scope = parse_scope(args);
            let hits = state.index.search(query, k, scope).await?;
            Ok(ToolOutput::Json(json!({
                "hits": hits.value.iter().map(|h| json!({
                    "doc_id": h.doc_id.0,
                    "title": h.title,
                    "origin": h.origin.as_str(),
                    "score": h.fused_score,
                })).collect::<Vec<_>>(),
                "degraded": hits.reason.map(|r| r.as_str()),
            })))
        }
    }
}

pub struct RetrieveTool {
    state: AppState,
}

impl RetrieveTool {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

#[async_trait]
impl ToolHandler for RetrieveTool {
    fn name(&self) -> &'static str {
        "retrieve"
    }
    fn description(&self) -> &'static str {
        "Hybrid BM25+vector search over ingested documents (mode:index), or a read-only SQL query (mode:sql)."
    }
    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "mode": { "type": "string", "enum": ["index", "sql"] },
                "query": { "type": "string" },
                "sql": { "type": "string" },
                "k": { "type": "integer" },
                "scope": { "type": "string", "enum": ["reports", "docs", "both"] },
            },
        })
    }
    async fn call(&self, args: Value, _ctx: &ToolContext) -> RuntimeResult<ToolOutput> {
        handle_retrieve(&self.state, &args).await
    }
}

pub struct SearchIndexTool {
    state: AppState,
}

impl SearchIndexTool {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

#[async_trait]
impl ToolHandler for SearchIndexTool {
    fn name(&self) -> &'static str {
        "search_index"
    }
    fn description(&self) -> &'static str {
        "Hybrid BM25+vector search over ingested documents. Equivalent to retrieve with mode:index."
    }
    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "k": { "type": "integer" },
                "scope": { "type": "string", "enum": ["reports", "docs", "both"] },
            },
            "required": ["query"],
        })
    }
    async fn call(&self, args: Value, _ctx: &ToolContext) -> RuntimeResult<ToolOutput> {
        let mut args = args;
        if let Some(obj) = args.as_object_mut() {
            obj.insert("mode".to_string(), json!("index"));
        }
        handle_retrieve(&self.state, &args).await
    }
}

pub struct IndexTextsTool {
    state: AppState,
}

impl IndexTextsTool {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

#[async_trait]
impl ToolHandler for IndexTextsTool {
    fn name(&self) -> &'static str {
        "index_texts"
    }
    fn description(&self) -> &'static str {
        "Ingests one or more raw text documents into the hybrid index."
    }
    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "documents": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": { "title": { "type": "string" }, "text": { "type": "string" } },
                        "required": ["text"],
                    },
                },
            },
            "required": ["documents"],
        })
    }
    async fn call(&self, args: Value, _ctx: &ToolContext) -> RuntimeResult<ToolOutput> {
        let docs = args
            .get("documents")
            .and_then(|v| v.as_array())
            .ok_or_else(|| RuntimeError::InvalidParams("missing 'documents'".to_string()))?;
        let mut new_documents = Vec::with_capacity(docs.len());
        for (i, doc) in docs.iter().enumerate() {
            let text = doc
                .get("text")
                .and_then(|v| v.as_str())
                .ok_or_else(|| RuntimeError::InvalidParams(format!("documents[{i}] missing 'text'")))?;
            let title = doc.get("title").and_then(|v| v.as_str()).unwrap_or("untitled").to_string();
            new_documents.push(NewDocument { origin: DocOrigin::Text, title, body: text.to_string() });
        }
        let ids = self.state.index.index_documents(new_documents).await?;
        Ok(ToolOutput::Json(json!({ "doc_ids": ids.iter().map(|id| id.0).collect::<Vec<_>>() })))
    }
}

pub struct IndexUrlTool {
    state: AppState,
}

impl IndexUrlTool {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

#[async_trait]
impl ToolHandler for IndexUrlTool {
    fn name(&self) -> &'static str {
        "index_url"
    }
    fn description(&self) -> &'static str {
        "Submits an async job to fetch a URL and ingest its text into the hybrid index."
    }
    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "url": { "type": "string" } },
            "required": ["url"],
        })
    }
    async fn call(&self, args: Value, _ctx: &ToolContext) -> RuntimeResult<ToolOutput> {
        let url = args
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| RuntimeError::InvalidParams("missing 'url'".to_string()))?;
        let outcome = self
            .state
            .jobs
            .submit("index_url", json!({ "url": url }), None, false, None)
            .await?;
        Ok(ToolOutput::Json(json!({ "job_id": outcome.job.id.to_string(), "status": outcome.job.status.as_str() })))
    }
}

pub struct IndexStatusTool {
    state: AppState,
}

impl IndexStatusTool {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

#[async_trait]
impl ToolHandler for IndexStatusTool {
    fn name(&self) -> &'static str {
        "index_status"
    }
    fn description(&self) -> &'static str {
        "Reports how many documents are ingested into the hybrid index, by origin."
    }
    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }
    async fn call(&self, _args: Value, _ctx: &ToolContext) -> RuntimeResult<ToolOutput> {
        let mut counts = serde_json::Map::new();
        for origin in [DocOrigin::Report, DocOrigin::Url, DocOrigin::Text] {
            let docs = self.state.storage.list_index_documents(Some(origin), usize::MAX).await?;
            counts.insert(origin.as_str().to_string(), json!(docs.len()));
        }
        Ok(ToolOutput::Json(json!({ "counts": counts })))
    }
}

pub struct ExecuteSqlTool {
    state: AppState,
}

impl ExecuteSqlTool {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

#[async_trait]
impl ToolHandler for ExecuteSqlTool {
    fn name(&self) -> &'static str {
        "execute_sql"
    }
    fn description(&self) -> &'static str {
        "Executes a read-only SQL statement (SELECT/WITH/EXPLAIN only) against the persisted store."
    }
    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "sql": { "type": "string" },
                "params": { "type": "array" },
            },
            "required": ["sql"],
        })
    }
    async fn call(&self, args: Value, _ctx: &ToolContext) -> RuntimeResult<ToolOutput> {
        let sql = args
            .get("sql")
            .and_then(|v| v.as_str())
            .ok_or_else(|| RuntimeError::InvalidParams("missing 'sql'".to_string()))?;
        let params: Vec<Value> = args.get("params").and_then(|v| v.as_array()).cloned().unwrap_or_default();
        let result = self.state.storage.execute_read_only_sql(sql, &params).await?;
        Ok(ToolOutput::Json(json!({ "columns": result.columns, "rows": result.rows })))
    }
}
