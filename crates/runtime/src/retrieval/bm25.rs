//! In-process Okapi BM25 inverted index (§4.4).
//!
//! Lives entirely in memory as a `DashMap<String, PostingList>`; the
//! document store of record is the `StorageGateway` (`index_documents`
//! table). Callers rebuild this index from `list_index_documents` on
//! startup and keep it updated incrementally as documents are ingested or
//! deleted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use dashmap::DashMap;

use crate::types::DocId;

#[derive(Debug, Clone, Default)]
struct PostingList {
    /// doc_id -> term frequency within that document.
    postings: HashMap<DocId, u32>,
}

#[derive(Debug, Clone, Copy)]
pub struct Bm25Params {
    pub k1: f32,
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

pub struct Bm25Index {
    postings: DashMap<String, PostingList>,
    doc_lengths: DashMap<DocId, u32>,
    doc_terms: DashMap<DocId, HashMap<String, u32>>,
    doc_count: AtomicI64,
    total_length: AtomicU64,
    params: Bm25Params,
}

impl Bm25Index {
    pub fn new(params: Bm25Params) -> Self {
        Self {
            postings: DashMap::new(),
            doc_lengths: DashMap::new(),
            doc_terms: DashMap::new(),
            doc_count: AtomicI64::new(0),
            total_length: AtomicU64::new(0),
            params,
        }
    }

    /// Indexes (or re-indexes) a document's tokens. Idempotent: a second
    /// call for the same `doc_id` replaces the first.
    pub fn add_document(&self, doc_id: DocId, tokens: &[String]) {
        self.remove_document(doc_id);

        let mut term_counts: HashMap<String, u32> = HashMap::new();
        for t in tokens {
            *term_counts.entry(t.clone()).or_insert(0) += 1;
        }
        for (term, count) in &term_counts {
            self.postings
                .entry(term.clone())
                .or_default()
                .postings
                .insert(doc_id, *count);
        }
        self.doc_lengths.insert(doc_id, tokens.len() as u32);
        self.total_length.fetch_add(tokens.len() as u64, Ordering::SeqCst);
        self.doc_count.fetch_add(1, Ordering::SeqCst);
        self.doc_terms.insert(doc_id, term_counts);
    }

    pub fn remove_document(&self, doc_id: DocId) {
        if let Some((_, term_counts)) = self.doc_terms.remove(&doc_id) {
            for term in term_counts.keys() {
                if let Some(mut list) = self.postings.get_mut(term) {
                    list.postings.remove(&doc_id);
                }
            }
            if let Some((_, len)) = self.doc_lengths.remove(&doc_id) {
                self.total_length.fetch_sub(len as u64, Ordering::SeqCst);
            }
            self.doc_count.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn avg_doc_length(&self) -> f32 {
        let n = self.doc_count.load(Ordering::SeqCst);
        if n <= 0 {
            return 0.0;
        }
        self.total_length.load(Ordering::SeqCst) as f32 / n as f32
    }

    /// Scores every document with at least one matching term. Unsorted;
    /// callers apply fusion and tie-breaking on top.
    pub fn score(&self, query_terms: &[String]) -> Vec<(DocId, f32)> {
        let n = self.doc_count.load(Ordering::SeqCst);
        if n <= 0 {
            return Vec::new();
        }
        let avgdl = self.avg_doc_length();
        let mut unique_terms: Vec<&String> = Vec::new();
        for t in query_terms {
            if !unique_terms.contains(&t) {
                unique_terms.push(t);
            }
        }

        let mut scores: HashMap<DocId, f32> = HashMap::new();
        for term in unique_terms {
            let Some(list) = self.postings.get(term) else {
                continue;
            };
            let doc_freq = list.postings.len() as f32;
            if doc_freq == 0.0 {
                continue;
            }
            let idf = ((n as f32 - doc_freq + 0.5) / (doc_freq + 0.5) + 1.0).ln();
            for (&doc_id, &tf) in list.postings.iter() {
                let dl = self.doc_lengths.get(&doc_id).map(|r| *r).unwrap_or(0) as f32;
                let denom = tf as f32 + self.params.k1 * (1.0 - self.params.b + self.params.b * dl / avgdl.max(1.0));
                let term_score = idf * (tf as f32 * (self.params.k1 + 1.0)) / denom.max(f32::EPSILON);
                *scores.entry(doc_id).or_insert(0.0) += term_score;
            }
        }
        scores.into_iter().collect()
    }

    pub fn document_count(&self) -> i64 {
        self.doc_count.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scores_documents_containing_query_terms() {
        let idx = Bm25Index::new(Bm25Params::default());
        idx.add_document(DocId(1), &["rust".into(), "async".into(), "runtime".into()]);
        idx.add_document(DocId(2), &["python".into(), "async".into(), "io".into()]);

        let scores = idx.score(&["rust".to_string()]);
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].0, DocId(1));
        assert!(scores[0].1 > 0.0);
    }

    #[test]
    fn higher_term_frequency_increases_score() {
        let idx = Bm25Index::new(Bm25Params::default());
        idx.add_document(DocId(1), &["rust".into(), "rust".into(), "rust".into()]);
        idx.add_document(DocId(2), &["rust".into(), "other".into(), "words".into()]);

        let scores: HashMap<DocId, f32> = idx.score(&["rust".to_string()]).into_iter().collect();
        assert!(scores[&DocId(1)] > scores[&DocId(2)]);
    }

    #[test]
    fn reindexing_a_document_replaces_its_postings() {
        let idx = Bm25Index::new(Bm25Params::default());
        idx.add_document(DocId(1), &["rust".into()]);
        idx.add_document(DocId(1), &["python".into()]);

        assert!(idx.score(&["rust".to_string()]).is_empty());
        assert_eq!(idx.score(&["python".to_string()]).len(), 1);
        assert_eq!(idx.document_count(), 1);
    }

    #[test]
    fn remove_document_drops_it_from_future_scores() {
        let idx = Bm25Index::new(Bm25Params::default());
        idx.add_document(DocId(1), &["rust".into()]);
        idx.remove_document(DocId(1));
        assert!(idx.score(&["rust".to_string()]).is_empty());
        assert_eq!(idx.document_count(), 0);
    }
}
