//! Hybrid Index (C4): BM25 + vector fusion search over ingested documents.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;

use crate::embedding::EmbeddingProvider;
use crate::llm::LlmGatewayClient;
use crate::storage::StorageGateway;
use crate::types::{
    DegradedReason, Degraded, DocId, DocOrigin, IndexDocument, RetrievalError, RuntimeError, RuntimeResult,
};

use super::bm25::{Bm25Index, Bm25Params};
use super::fusion::{fuse, Candidate, FusionWeights};
use super::rerank::{rerank_pointwise, RerankCandidate};
use super::tokenizer::{default_stopwords, tokenize};

/// Body length cap (in characters) before truncation with a marker.
const MAX_DOC_LENGTH: usize = 20_000;
const TRUNCATION_MARKER: &str = "\n...[truncated]";

#[derive(Debug, Clone)]
pub struct NewDocument {
    pub origin: DocOrigin,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub doc_id: DocId,
    pub title: String,
    pub origin: DocOrigin,
    pub fused_score: f32,
    pub bm25_score: f32,
    pub vector_score: Option<f32>,
}

pub struct RerankConfig {
    pub client: Arc<dyn LlmGatewayClient>,
    pub model: String,
}

pub struct HybridIndex {
    storage: Arc<dyn StorageGateway>,
    embedding: Arc<dyn EmbeddingProvider>,
    bm25: Bm25Index,
    stopwords: HashSet<String>,
    weights: FusionWeights,
    rerank: Option<RerankConfig>,
}

impl HybridIndex {
    pub fn new(
        storage: Arc<dyn StorageGateway>,
        embedding: Arc<dyn EmbeddingProvider>,
        params: Bm25Params,
        weights: FusionWeights,
        rerank: Option<RerankConfig>,
    ) -> Self {
        Self {
            storage,
            embedding,
            bm25: Bm25Index::new(params),
            stopwords: default_stopwords(),
            weights,
            rerank,
        }
    }

    /// Rebuilds the in-process BM25 index from the document store. Call
    /// once at startup; ingestion keeps the index updated incrementally
    /// after that.
    pub async fn rebuild(&self) -> RuntimeResult<()> {
        let docs = self.storage.list_index_documents(None, usize::MAX).await?;
        for doc in docs {
            let tokens = tokenize(&doc.body, &self.stopwords);
            self.bm25.add_document(doc.id, &tokens);
        }
        Ok(())
    }

    pub async fn index_documents(&self, docs: Vec<NewDocument>) -> RuntimeResult<Vec<DocId>> {
        let mut ids = Vec::with_capacity(docs.len());
        for doc in docs {
            let body = truncate(&doc.body);
            let tokens = tokenize(&body, &self.stopwords);
            let embedding = if self.embedding.is_ready() {
                self.embedding.embed(&body).await.ok()
            } else {
                None
            };

            let record = IndexDocument {
                id: DocId(0),
                origin: doc.origin,
                title: doc.title,
                body: body.clone(),
                term_frequencies: serde_json::json!({}),
                doc_length: tokens.len() as u32,
                embedding,
                created_at: Utc::now(),
            };
            let id = self.storage.index_document(&record).await?;
            self.bm25.add_document(id, &tokens);
            ids.push(id);
        }
        Ok(ids)
    }

    pub async fn delete(&self, id: DocId) -> RuntimeResult<bool> {
        self.bm25.remove_document(id);
        Ok(self.storage.delete_from_index(id).await?)
    }

    /// Runs the full retrieval pipeline: BM25 scoring, vector scoring
    /// (skipped/degraded if the embedder isn't ready or the vector path
    /// fails), fusion, optional rerank, tie-breaking, and top-`k` selection.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        scope: Option<DocOrigin>,
    ) -> RuntimeResult<Degraded<Vec<SearchHit>>> {
        if !self.weights.is_valid() {
            return Err(RuntimeError::InvalidParams(
                "fusion weights must sum to a positive, finite value".to_string(),
            ));
        }

        let query_terms = tokenize(query, &self.stopwords);
        let pool_size = (k * 4).max(50);

        let mut bm25_hits = self.bm25.score(&query_terms);
        bm25_hits.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        bm25_hits.truncate(pool_size);

        let mut degraded_reason: Option<DegradedReason> = None;
        let mut vector_hits = Vec::new();
        if self.embedding.is_ready() {
            match self.embedding.embed(query).await {
                Ok(embedding) => match self.storage.search_vector(&embedding, pool_size).await {
                    Ok(hits) => vector_hits = hits,
                    Err(_) => degraded_reason = Some(DegradedReason::VectorPathUnavailable),
                },
                Err(RetrievalError::EmbedderNotReady) => {
                    degraded_reason = Some(DegradedReason::EmbedderNotReady);
                }
                Err(_) => degraded_reason = Some(DegradedReason::VectorPathUnavailable),
            }
        } else {
            degraded_reason = Some(DegradedReason::EmbedderNotReady);
        }

        let mut candidate_ids: Vec<DocId> = bm25_hits.iter().map(|(id, _)| *id).collect();
        for h in &vector_hits {
            if !candidate_ids.contains(&h.doc_id) {
                candidate_ids.push(h.doc_id);
            }
        }
        if candidate_ids.is_empty() {
            return Ok(Degraded::ok(Vec::new()));
        }

        let mut docs = Vec::with_capacity(candidate_ids.len());
        for id in &candidate_ids {
            if let Some(doc) = self.storage.get_index_document(*id).await? {
                if scope.is_none() || scope == Some(doc.origin) {
                    docs.push(doc);
                }
            }
        }

        let bm25_by_id: std::collections::HashMap<DocId, f32> = bm25_hits.into_iter().collect();
        let vector_by_id: std::collections::HashMap<DocId, f32> =
            vector_hits.into_iter().map(|h| (h.doc_id, h.similarity)).collect();

        let candidates: Vec<Candidate> = docs
            .iter()
            .map(|doc| Candidate {
                doc_id: doc.id,
                bm25_raw: bm25_by_id.get(&doc.id).copied().unwrap_or(0.0),
                vector_raw: vector_by_id.get(&doc.id).copied(),
                created_at: doc.created_at,
            })
            .collect();

        let mut fused = fuse(candidates, self.weights);

        if let Some(rerank) = &self.rerank {
            let top_2k = (k * 2).min(fused.len());
            let to_rerank = &fused[..top_2k];
            let rerank_candidates: Vec<RerankCandidate> = to_rerank
                .iter()
                .filter_map(|f| {
                    docs.iter()
                        .find(|d| d.id == f.doc_id)
                        .map(|d| RerankCandidate { doc_id: d.id, snippet: format!("{}\n{}", d.title, d.body) })
                })
                .collect();
            if let Ok(scored) = rerank_pointwise(rerank.client.as_ref(), &rerank.model, query, &rerank_candidates).await {
                let score_by_id: std::collections::HashMap<DocId, f32> = scored.into_iter().collect();
                let mut reranked: Vec<_> = fused[..top_2k].to_vec();
                reranked.sort_by(|a, b| {
                    let sa = score_by_id.get(&a.doc_id).copied().unwrap_or(0.0);
                    let sb = score_by_id.get(&b.doc_id).copied().unwrap_or(0.0);
                    sb.partial_cmp(&sa).unwrap_or(std::cmp::Ordering::Equal)
                });
                fused.splice(..top_2k, reranked);
            }
        }

        fused.truncate(k);

        let hits = fused
            .into_iter()
            .filter_map(|f| {
                docs.iter().find(|d| d.id == f.doc_id).map(|d| SearchHit {
                    doc_id: f.doc_id,
                    title: d.title.clone(),
                    origin: d.origin,
                    fused_score: f.fused_score,
                    bm25_score: f.bm25_score,
                    vector_score: f.vector_score,
                })
            })
            .collect();

        Ok(match degraded_reason {
            Some(reason) => Degraded::degraded(hits, reason),
            None => Degraded::ok(hits),
        })
    }
}

fn truncate(body: &str) -> String {
    if body.chars().count() <= MAX_DOC_LENGTH {
        return body.to_string();
    }
    let truncated: String = body.chars().take(MAX_DOC_LENGTH).collect();
    format!("{truncated}{TRUNCATION_MARKER}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::NoOpEmbeddingProvider;
    use crate::storage::InMemoryStorageGateway;

    fn index() -> HybridIndex {
        HybridIndex::new(
            Arc::new(InMemoryStorageGateway::new()),
            Arc::new(NoOpEmbeddingProvider::new(8)),
            Bm25Params::default(),
            FusionWeights::default(),
            None,
        )
    }

    #[tokio::test]
    async fn ingest_then_search_returns_the_matching_document() {
        let idx = index();
        idx.index_documents(vec![NewDocument {
            origin: DocOrigin::Text,
            title: "Rust ownership".to_string(),
            body: "Rust's ownership model prevents data races at compile time.".to_string(),
        }])
        .await
        .unwrap();

        let result = idx.search("ownership model", 5, None).await.unwrap();
        assert!(result.is_degraded());
        assert_eq!(result.value.len(), 1);
        assert_eq!(result.value[0].title, "Rust ownership");
    }

    #[tokio::test]
    async fn search_without_embedder_is_annotated_degraded() {
        let idx = index();
        idx.index_documents(vec![NewDocument {
            origin: DocOrigin::Text,
            title: "doc".to_string(),
            body: "some text content here".to_string(),
        }])
        .await
        .unwrap();
        let result = idx.search("text", 5, None).await.unwrap();
        assert!(result.is_degraded());
        assert_eq!(result.reason, Some(DegradedReason::EmbedderNotReady));
    }

    #[tokio::test]
    async fn invalid_weights_are_rejected() {
        let idx = HybridIndex::new(
            Arc::new(InMemoryStorageGateway::new()),
            Arc::new(NoOpEmbeddingProvider::new(8)),
            Bm25Params::default(),
            FusionWeights { bm25: 0.0, vector: 0.0 },
            None,
        );
        let err = idx.search("anything", 5, None).await.unwrap_err();
        assert_eq!(err.class(), "InvalidParams");
    }

    #[tokio::test]
    async fn empty_index_returns_empty_results() {
        let idx = index();
        let result = idx.search("nothing indexed", 5, None).await.unwrap();
        assert!(result.value.is_empty());
    }

    #[tokio::test]
    async fn scope_filters_out_other_origins() {
        let idx = index();
        idx.index_documents(vec![NewDocument {
            origin: DocOrigin::Url,
            title: "web doc".to_string(),
            body: "shared keyword appears here".to_string(),
        }])
        .await
        .unwrap();
        let result = idx.search("shared keyword", 5, Some(DocOrigin::Text)).await.unwrap();
        assert!(result.value.is_empty());
    }
}
