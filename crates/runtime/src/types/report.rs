//! Report and index document record types (§3 Report, Index Document).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{DocId, DocOrigin, ReportId};

/// Persistent record of a completed research query. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: ReportId,
    pub query: String,
    pub created_at: DateTime<Utc>,
    pub output_markdown: String,
    pub sources: Vec<SourceRef>,
    pub metadata: ReportMetadata,
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub label: String,
    pub url: Option<String>,
    pub doc_id: Option<DocId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub plan: Vec<String>,
    pub iterations: u32,
    pub ensemble_models: Vec<String>,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub confidence: Option<f32>,
    pub failed_sub_queries: Vec<String>,
}

impl Default for ReportMetadata {
    fn default() -> Self {
        Self {
            plan: Vec::new(),
            iterations: 1,
            ensemble_models: Vec::new(),
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
            confidence: None,
            failed_sub_queries: Vec::new(),
        }
    }
}

/// Unit of retrievable content ingested into the hybrid index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDocument {
    pub id: DocId,
    pub origin: DocOrigin,
    pub title: String,
    pub body: String,
    pub term_frequencies: Value,
    pub doc_length: u32,
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
}
