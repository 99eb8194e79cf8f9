//! Embedding Provider (C2): `Embed`/`EmbedBatch` with readiness state.
//!
//! Out of scope as a concrete model runtime; this module ships the trait
//! plus a no-op implementation (used in tests and when unconfigured) and an
//! HTTP-backed implementation that calls a configured embeddings endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::RetrievalError;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError>;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError>;

    /// True once the backend can serve requests. Callers MUST tolerate a
    /// `NotReady` state and degrade to a BM25-only path.
    fn is_ready(&self) -> bool;
    fn dimension(&self) -> usize;
}

/// Always `NotReady`. Used when no embedding backend is configured.
pub struct NoOpEmbeddingProvider {
    dimension: usize,
}

impl NoOpEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl EmbeddingProvider for NoOpEmbeddingProvider {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, RetrievalError> {
        Err(RetrievalError::EmbedderNotReady)
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        Err(RetrievalError::EmbedderNotReady)
    }

    fn is_ready(&self) -> bool {
        false
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbedDatum {
    embedding: Vec<f32>,
}

/// Calls a configured embeddings HTTP endpoint (OpenAI-compatible
/// `{input: [...]}` → `{data: [{embedding: [...]}]}` shape). Readiness is
/// latched true after the first successful call; stays `NotReady` before
/// that so that cold-start never blocks the BM25-only path.
pub struct HttpEmbeddingProvider {
    endpoint: String,
    dimension: usize,
    client: reqwest::Client,
    ready: std::sync::atomic::AtomicBool,
}

impl HttpEmbeddingProvider {
    pub fn new(endpoint: impl Into<String>, dimension: usize) -> Self {
        Self {
            endpoint: endpoint.into(),
            dimension,
            client: reqwest::Client::new(),
            ready: std::sync::atomic::AtomicBool::new(false),
        }
    }

    fn unit_norm(mut v: Vec<f32>) -> Vec<f32> {
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in v.iter_mut() {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        let mut batch = self.embed_batch(std::slice::from_ref(&text.to_string())).await?;
        batch
            .pop()
            .ok_or_else(|| RetrievalError::Index("empty embedding response".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&EmbedRequest { input: texts })
            .send()
            .await
            .map_err(|e| RetrievalError::Index(format!("embedding request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(RetrievalError::Index(format!(
                "embedding endpoint returned {}",
                resp.status()
            )));
        }

        let parsed: EmbedResponse = resp
            .json()
            .await
            .map_err(|e| RetrievalError::Index(format!("bad embedding response: {e}")))?;

        self.ready.store(true, std::sync::atomic::Ordering::Relaxed);
        Ok(parsed
            .data
            .into_iter()
            .map(|d| Self::unit_norm(d.embedding))
            .collect())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(std::sync::atomic::Ordering::Relaxed)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_provider_is_never_ready() {
        let provider = NoOpEmbeddingProvider::new(1536);
        assert!(!provider.is_ready());
        assert!(matches!(
            provider.embed("hello").await,
            Err(RetrievalError::EmbedderNotReady)
        ));
    }

    #[test]
    fn unit_norm_produces_unit_length_vectors() {
        let v = HttpEmbeddingProvider::unit_norm(vec![3.0, 4.0]);
        let len: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((len - 1.0).abs() < 1e-6);
    }
}
