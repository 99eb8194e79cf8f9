//! Token budgeting (§4.6 "Token budgeting"): estimates input size against a
//! model's context window and decides what to drop, never to silently
//! truncate.

use std::sync::OnceLock;

use tiktoken_rs::CoreBPE;

fn encoder() -> &'static CoreBPE {
    static ENCODER: OnceLock<CoreBPE> = OnceLock::new();
    ENCODER.get_or_init(|| tiktoken_rs::cl100k_base().expect("cl100k_base encoder tables"))
}

pub fn estimate_tokens(text: &str) -> usize {
    encoder().encode_ordinary(text).len()
}

/// A piece of context competing for budget, ranked by salience (higher
/// salience is kept longer under pressure).
#[derive(Debug, Clone)]
pub struct BudgetedDocument {
    pub label: String,
    pub text: String,
    pub salience: f32,
}

/// Caps `max_tokens_for` responses by the model's context window, reserving
/// `reserved_for_output` tokens and never going below `floor`.
pub fn max_tokens_for(context_window: usize, reserved_for_output: usize, floor: usize) -> usize {
    context_window.saturating_sub(reserved_for_output).max(floor)
}

/// Fits `instructions` plus as many `documents` as possible under
/// `token_budget`. Drops lowest-salience documents first; instructions are
/// never dropped. Returns the documents that were kept, in their original
/// relative order, plus the labels of any dropped ones so callers can log
/// what was cut rather than silently truncating.
pub fn fit_documents(
    instructions: &str,
    documents: Vec<BudgetedDocument>,
    token_budget: usize,
) -> (Vec<BudgetedDocument>, Vec<String>) {
    let instruction_tokens = estimate_tokens(instructions);
    let mut remaining = token_budget.saturating_sub(instruction_tokens);

    let mut ranked: Vec<(usize, usize)> = documents
        .iter()
        .enumerate()
        .map(|(i, d)| (i, estimate_tokens(&d.text)))
        .collect();
    ranked.sort_by(|a, b| {
        documents[b.0]
            .salience
            .partial_cmp(&documents[a.0].salience)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept_indices = std::collections::HashSet::new();
    for (idx, tokens) in &ranked {
        if *tokens <= remaining {
            kept_indices.insert(*idx);
            remaining -= tokens;
        }
    }

    let mut kept = Vec::new();
    let mut dropped = Vec::new();
    for (i, doc) in documents.into_iter().enumerate() {
        if kept_indices.contains(&i) {
            kept.push(doc);
        } else {
            dropped.push(doc.label);
        }
    }
    (kept, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimates_nonzero_tokens_for_nonempty_text() {
        assert!(estimate_tokens("hello world, this is a research query") > 0);
    }

    #[test]
    fn max_tokens_respects_floor() {
        assert_eq!(max_tokens_for(4096, 8000, 512), 512);
        assert_eq!(max_tokens_for(16384, 1000, 512), 15384);
    }

    #[test]
    fn keeps_all_documents_when_budget_is_ample() {
        let docs = vec![
            BudgetedDocument { label: "a".into(), text: "short text".into(), salience: 1.0 },
            BudgetedDocument { label: "b".into(), text: "more short text".into(), salience: 0.5 },
        ];
        let (kept, dropped) = fit_documents("instructions", docs, 10_000);
        assert_eq!(kept.len(), 2);
        assert!(dropped.is_empty());
    }

    #[test]
    fn drops_lowest_salience_documents_first_under_pressure() {
        let low = "padding ".repeat(200);
        let high = "padding ".repeat(200);
        let docs = vec![
            BudgetedDocument { label: "low-salience".into(), text: low, salience: 0.1 },
            BudgetedDocument { label: "high-salience".into(), text: high, salience: 0.9 },
        ];
        let budget = estimate_tokens(&"padding ".repeat(200)) + 5;
        let (kept, dropped) = fit_documents("instructions", docs, budget);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].label, "high-salience");
        assert_eq!(dropped, vec!["low-salience".to_string()]);
    }
}
