//! Wire types for the LLM Gateway Client (C3).

use serde::{Deserialize, Serialize};

use crate::types::Usage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Text,
    Json,
}

/// Options recognized by `ChatCompletion` (§4.3).
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub stream: bool,
    pub timeout_ms: Option<u64>,
    pub response_format: Option<ResponseFormat>,
}

#[derive(Debug, Clone)]
pub struct ChatCompletionResult {
    pub text: String,
    pub usage: Usage,
    pub model: String,
}

/// One ordered delta of a streaming chat completion.
#[derive(Debug, Clone)]
pub struct StreamDelta {
    pub text: String,
    pub done: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub modalities: Vec<String>,
    pub context_window: u32,
    pub input_price_per_1k: Option<f64>,
    pub output_price_per_1k: Option<f64>,
}

impl ModelDescriptor {
    pub fn supports_vision(&self) -> bool {
        self.modalities.iter().any(|m| m == "image")
    }
}

/// First of `preferred` that is both present and vision-capable; otherwise
/// the lowest-priced vision-capable model in `available`. Models with no
/// price quote are treated as most expensive rather than cheapest, so a
/// priced model is never passed over for an unpriced one.
pub fn select_vision_model(preferred: &[String], available: &[ModelDescriptor]) -> Option<String> {
    for id in preferred {
        if available.iter().any(|m| &m.id == id && m.supports_vision()) {
            return Some(id.clone());
        }
    }
    available
        .iter()
        .filter(|m| m.supports_vision())
        .min_by(|a, b| {
            let pa = a.input_price_per_1k.unwrap_or(f64::INFINITY);
            let pb = b.input_price_per_1k.unwrap_or(f64::INFINITY);
            pa.partial_cmp(&pb).unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|m| m.id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(id: &str, vision: bool, price: Option<f64>) -> ModelDescriptor {
        ModelDescriptor {
            id: id.to_string(),
            modalities: if vision {
                vec!["text".to_string(), "image".to_string()]
            } else {
                vec!["text".to_string()]
            },
            context_window: 8192,
            input_price_per_1k: price,
            output_price_per_1k: price,
        }
    }

    #[test]
    fn prefers_first_available_preferred_model() {
        let available = vec![model("a", true, Some(1.0)), model("b", true, Some(0.1))];
        let preferred = vec!["b".to_string(), "a".to_string()];
        assert_eq!(
            select_vision_model(&preferred, &available),
            Some("b".to_string())
        );
    }

    #[test]
    fn falls_back_to_cheapest_vision_model() {
        let available = vec![
            model("a", false, Some(0.01)),
            model("b", true, Some(2.0)),
            model("c", true, Some(0.5)),
        ];
        assert_eq!(
            select_vision_model(&[], &available),
            Some("c".to_string())
        );
    }

    #[test]
    fn no_vision_model_returns_none() {
        let available = vec![model("a", false, Some(0.01))];
        assert_eq!(select_vision_model(&[], &available), None);
    }
}
