//! Optional LLM rerank stage (§4.4 step 4): pointwise relevance scoring of
//! the top `2k` fused candidates, replacing the fused ordering when enabled.
//!
//! Pointwise (one score per candidate, from a single prompt) rather than
//! pairwise: simpler to test deterministically and the fusion contract
//! accepts either framing.

use serde::Deserialize;
use serde_json::Value;

use crate::llm::{ChatMessage, ChatOptions, LlmGatewayClient, ResponseFormat};
use crate::types::{DocId, LlmError};

#[derive(Debug, Clone)]
pub struct RerankCandidate {
    pub doc_id: DocId,
    pub snippet: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ScoredIndex {
    index: usize,
    score: f32,
}

/// Asks `model` to rate each candidate's relevance to `query` on a 0-10
/// scale in one round trip. Returns `(DocId, score)` pairs in the model's
/// response order; candidates the model omits are scored `0.0` and appended
/// last so no candidate silently disappears from the result set.
pub async fn rerank_pointwise(
    client: &dyn LlmGatewayClient,
    model: &str,
    query: &str,
    candidates: &[RerankCandidate],
) -> Result<Vec<(DocId, f32)>, LlmError> {
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let listing = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| format!("[{i}] {}", c.snippet.chars().take(500).collect::<String>()))
        .collect::<Vec<_>>()
        .join("\n\n");

    let prompt = format!(
        "Query: {query}\n\nRate each candidate's relevance to the query on a 0-10 scale.\n\
         Respond with a JSON array only, like [{{\"index\":0,\"score\":7.5}}].\n\n{listing}"
    );

    let messages = vec![
        ChatMessage::system("You are a precise relevance-ranking assistant."),
        ChatMessage::user(prompt),
    ];
    let options = ChatOptions {
        max_tokens: Some(1024),
        temperature: Some(0.0),
        response_format: Some(ResponseFormat::Json),
        ..Default::default()
    };

    let result = client.chat_completion(model, &messages, &options).await?;
    let scored = parse_scores(&result.text).unwrap_or_default();

    let mut seen = vec![false; candidates.len()];
    let mut ordered: Vec<(DocId, f32)> = Vec::with_capacity(candidates.len());
    for s in &scored {
        if let Some(c) = candidates.get(s.index) {
            if !seen[s.index] {
                seen[s.index] = true;
                ordered.push((c.doc_id, s.score));
            }
        }
    }
    for (i, c) in candidates.iter().enumerate() {
        if !seen[i] {
            ordered.push((c.doc_id, 0.0));
        }
    }
    Ok(ordered)
}

fn parse_scores(text: &str) -> Option<Vec<ScoredIndex>> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end < start {
        return None;
    }
    let slice = &text[start..=end];
    let raw: Vec<Value> = serde_json::from_str(slice).ok()?;
    Some(
        raw.into_iter()
            .filter_map(|v| serde_json::from_value::<ScoredIndex>(v).ok())
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scores_embedded_in_prose() {
        let text = "Here you go:\n[{\"index\":1,\"score\":9},{\"index\":0,\"score\":3}]\nDone.";
        let scores = parse_scores(text).unwrap();
        assert_eq!(scores.len(), 2);
        assert_eq!(scores[0].index, 1);
        assert_eq!(scores[0].score, 9.0);
    }

    #[test]
    fn malformed_response_yields_none() {
        assert!(parse_scores("not json at all").is_none());
    }
}
