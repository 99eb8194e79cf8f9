//! Score fusion and tie-breaking for hybrid search (§4.4 steps 3/5).

use chrono::{DateTime, Utc};

use crate::types::DocId;

#[derive(Debug, Clone, Copy)]
pub struct FusionWeights {
    pub bm25: f32,
    pub vector: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self { bm25: 0.5, vector: 0.5 }
    }
}

impl FusionWeights {
    /// Weights must sum to a positive, finite value (§4.4).
    pub fn is_valid(&self) -> bool {
        let sum = self.bm25 + self.vector;
        sum.is_finite() && sum > 0.0
    }
}

#[derive(Debug, Clone)]
pub struct Candidate {
    pub doc_id: DocId,
    pub bm25_raw: f32,
    pub vector_raw: Option<f32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct FusedResult {
    pub doc_id: DocId,
    pub fused_score: f32,
    pub bm25_score: f32,
    pub vector_score: Option<f32>,
    pub created_at: DateTime<Utc>,
}

fn min_max_normalize(values: &[f32]) -> Vec<f32> {
    let min = values.iter().cloned().fold(f32::INFINITY, f32::min);
    let max = values.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    if !min.is_finite() || !max.is_finite() || (max - min).abs() < f32::EPSILON {
        return values.iter().map(|_| 1.0).collect();
    }
    values.iter().map(|&v| (v - min) / (max - min)).collect()
}

/// Fuses BM25 and vector scores with min-max normalization over the
/// candidate pool, then applies the §4.4 tie-break: higher BM25, then newer
/// document, then smaller id.
pub fn fuse(candidates: Vec<Candidate>, weights: FusionWeights) -> Vec<FusedResult> {
    if candidates.is_empty() {
        return Vec::new();
    }
    let bm25_raw: Vec<f32> = candidates.iter().map(|c| c.bm25_raw).collect();
    let bm25_norm = min_max_normalize(&bm25_raw);

    let have_vector: Vec<f32> = candidates.iter().filter_map(|c| c.vector_raw).collect();
    let vector_norm_by_idx: Vec<Option<f32>> = if have_vector.is_empty() {
        vec![None; candidates.len()]
    } else {
        let raws: Vec<f32> = candidates.iter().map(|c| c.vector_raw.unwrap_or(0.0)).collect();
        let norm = min_max_normalize(&raws);
        candidates
            .iter()
            .zip(norm)
            .map(|(c, n)| c.vector_raw.map(|_| n))
            .collect()
    };

    let mut results: Vec<FusedResult> = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let bm25_score = bm25_norm[i];
            let vector_score = vector_norm_by_idx[i];
            let fused = weights.bm25 * bm25_score + weights.vector * vector_score.unwrap_or(0.0);
            FusedResult {
                doc_id: c.doc_id,
                fused_score: fused,
                bm25_score: c.bm25_raw,
                vector_score,
                created_at: c.created_at,
            }
        })
        .collect();

    results.sort_by(|a, b| {
        b.fused_score
            .partial_cmp(&a.fused_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.bm25_score.partial_cmp(&a.bm25_score).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| b.created_at.cmp(&a.created_at))
            .then_with(|| a.doc_id.0.cmp(&b.doc_id.0))
    });
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn weights_must_be_positive_finite() {
        assert!(FusionWeights { bm25: 0.5, vector: 0.5 }.is_valid());
        assert!(!FusionWeights { bm25: 0.0, vector: 0.0 }.is_valid());
        assert!(!FusionWeights { bm25: f32::NAN, vector: 0.5 }.is_valid());
    }

    #[test]
    fn fuses_and_orders_by_score_descending() {
        let candidates = vec![
            Candidate { doc_id: DocId(1), bm25_raw: 1.0, vector_raw: Some(0.2), created_at: at(1) },
            Candidate { doc_id: DocId(2), bm25_raw: 5.0, vector_raw: Some(0.9), created_at: at(2) },
        ];
        let fused = fuse(candidates, FusionWeights::default());
        assert_eq!(fused[0].doc_id, DocId(2));
    }

    #[test]
    fn ties_break_on_bm25_then_recency_then_id() {
        let candidates = vec![
            Candidate { doc_id: DocId(5), bm25_raw: 1.0, vector_raw: None, created_at: at(1) },
            Candidate { doc_id: DocId(2), bm25_raw: 1.0, vector_raw: None, created_at: at(2) },
            Candidate { doc_id: DocId(1), bm25_raw: 1.0, vector_raw: None, created_at: at(2) },
        ];
        let fused = fuse(candidates, FusionWeights::default());
        // all fused scores equal (no vector signal) -> identical bm25 too ->
        // newest created_at wins, then smallest id among the remaining tie.
        assert_eq!(fused[0].doc_id, DocId(1));
        assert_eq!(fused[1].doc_id, DocId(2));
        assert_eq!(fused[2].doc_id, DocId(5));
    }

    #[test]
    fn missing_vector_scores_do_not_panic_on_normalization() {
        let candidates = vec![
            Candidate { doc_id: DocId(1), bm25_raw: 1.0, vector_raw: None, created_at: at(1) },
            Candidate { doc_id: DocId(2), bm25_raw: 2.0, vector_raw: None, created_at: at(2) },
        ];
        let fused = fuse(candidates, FusionWeights::default());
        assert!(fused.iter().all(|f| f.vector_score.is_none()));
    }
}
