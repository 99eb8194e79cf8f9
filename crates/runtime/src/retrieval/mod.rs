//! Hybrid Index (C4): BM25 + vector fusion retrieval with optional LLM
//! rerank.

pub mod bm25;
pub mod fusion;
pub mod index;
pub mod rerank;
pub mod tokenizer;

pub use bm25::{Bm25Index, Bm25Params};
pub use fusion::{Candidate, FusedResult, FusionWeights};
pub use index::{HybridIndex, NewDocument, RerankConfig, SearchHit};
pub use rerank::{rerank_pointwise, RerankCandidate};
