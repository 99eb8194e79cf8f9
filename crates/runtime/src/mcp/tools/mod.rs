//! Tool catalog (§4.7 "Tool registry", §6 external tool surface).
//!
//! Each handler is a thin adapter from MCP arguments onto the job engine,
//! orchestrator, hybrid index, or storage gateway; none of them hold
//! business logic of their own.

mod catalog;
mod jobs;
mod misc;
mod reports;
pub(crate) mod research;
mod retrieval;

use std::sync::Arc;

use crate::jobs::JobEngine;
use crate::llm::ModelCatalog;
use crate::orchestrator::ResearchOrchestrator;
use crate::retrieval::HybridIndex;
use crate::storage::StorageGateway;
use crate::types::ServerMode;

use super::registry::ToolRegistry;

pub use catalog::ToolCatalogCell;

/// Shared handles every tool adapter needs. Built once at startup and
/// cloned (cheaply, via `Arc`) into each handler.
#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<JobEngine>,
    pub orchestrator: Arc<ResearchOrchestrator>,
    pub storage: Arc<dyn StorageGateway>,
    pub index: Arc<HybridIndex>,
    pub catalog: Arc<ModelCatalog>,
    pub mode: ServerMode,
}

/// Registers the full tool catalog. `unified_entry` ("agent") is the single
/// tool exposed in `Agent` mode; the rest are gated per `ToolRegistry`'s
/// mode logic.
///
/// `tool_catalog` backs `list_tools`/`search_tools`; callers MUST fill it in
/// with `registry.list_descriptors()` after this returns, since the
/// descriptors (including these two tools' own) aren't known until
/// registration is complete.
pub fn register_all(registry: &mut ToolRegistry, state: AppState, tool_catalog: Arc<ToolCatalogCell>) {
    registry.register(Arc::new(misc::PingTool));
    registry.register(Arc::new(misc::CalcTool));
    registry.register(Arc::new(misc::DateTimeTool));

    registry.register(Arc::new(research::AgentTool::new(state.clone())));
    registry.register(Arc::new(research::ResearchTool::new(state.clone())));
    registry.register(Arc::new(research::SubmitResearchTool::new(state.clone())));
    registry.register(Arc::new(research::ConductResearchTool::new(state.clone())));

    registry.register(Arc::new(jobs::JobStatusTool::new(state.clone())));
    registry.register(Arc::new(jobs::GetJobResultTool::new(state.clone())));
    registry.register(Arc::new(jobs::CancelJobTool::new(state.clone())));

    registry.register(Arc::new(reports::ListResearchHistoryTool::new(state.clone())));
    registry.register(Arc::new(reports::GetReportContentTool::new(state.clone())));

    registry.register(Arc::new(retrieval::RetrieveTool::new(state.clone())));
    registry.register(Arc::new(retrieval::ExecuteSqlTool::new(state.clone())));
    registry.register(Arc::new(retrieval::SearchIndexTool::new(state.clone())));
    registry.register(Arc::new(retrieval::IndexTextsTool::new(state.clone())));
    registry.register(Arc::new(retrieval::IndexUrlTool::new(state.clone())));
    registry.register(Arc::new(retrieval::IndexStatusTool::new(state.clone())));

    registry.register(Arc::new(catalog::ListModelsTool::new(state.clone())));
    registry.register(Arc::new(catalog::GetServerStatusTool::new(state)));
    registry.register(Arc::new(catalog::ListToolsTool::new(tool_catalog.clone())));
    registry.register(Arc::new(catalog::SearchToolsTool::new(tool_catalog)));
}
