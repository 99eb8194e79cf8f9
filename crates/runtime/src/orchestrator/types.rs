//! Request/result types for the Research Orchestrator (C6).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{CostPreference, Usage};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchRequest {
    pub query: String,
    #[serde(default)]
    pub cost_preference: CostPreference,
    pub audience_level: Option<String>,
    pub output_format: Option<String>,
    #[serde(default = "default_true")]
    pub include_sources: bool,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub text_documents: Vec<String>,
    pub structured_data: Option<Value>,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_ensemble_size")]
    pub ensemble_size: usize,
}

fn default_true() -> bool {
    true
}

fn default_max_iterations() -> u32 {
    1
}

fn default_ensemble_size() -> usize {
    1
}

#[derive(Debug, Clone, Serialize)]
pub struct SubQueryOutcome {
    pub sub_query: String,
    pub model: String,
    pub text: Option<String>,
    pub usage: Usage,
    pub error: Option<String>,
}

impl SubQueryOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.text.is_some()
    }
}

/// What `ResearchOrchestrator::run` produced. Synthesis failure is not a
/// hard error: prior sub-query outputs are preserved for retrieval (§4.6
/// "Failure semantics").
pub enum OrchestratorOutcome {
    Completed(crate::types::Report),
    Failed {
        message: String,
        sub_query_outputs: Vec<SubQueryOutcome>,
    },
}
