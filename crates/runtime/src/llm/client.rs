//! LLM Gateway Client (C3): chat completions with streaming, retry, and a
//! dynamic model catalog.
//!
//! Provider is auto-detected from configuration/environment, generalizing
//! `http_input/llm_client.rs`'s single-fixed-model OpenAI/Anthropic split
//! into the full `ChatCompletion`/`ListModels`/`SelectVisionModel` surface.
//! Retry/backoff is hand-rolled (full jitter, exponential) rather than
//! pulled in from a crate, matching the rest of the dependency stack.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::types::{LlmError, Usage};

use super::types::{ChatCompletionResult, ChatMessage, ChatOptions, ChatRole, ModelDescriptor, StreamDelta};

#[async_trait]
pub trait LlmGatewayClient: Send + Sync {
    async fn chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ChatCompletionResult, LlmError>;

    /// Ordered deltas on a bounded channel. The channel closes when the
    /// response completes, errors, or the receiver is dropped (the latter
    /// cancels the upstream request).
    async fn chat_completion_stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<mpsc::Receiver<StreamDelta>, LlmError>;

    async fn list_models(&self, refresh: bool) -> Result<Vec<ModelDescriptor>, LlmError>;

    fn default_model(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Provider {
    OpenAiCompatible,
    Anthropic,
}

pub struct HttpLlmGatewayClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    provider: Provider,
    default_model: String,
    max_attempts: u32,
}

impl HttpLlmGatewayClient {
    fn new(base_url: String, api_key: String, provider: Provider, default_model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
            provider,
            default_model,
            max_attempts: 5,
        }
    }

    /// Prefers an explicit gateway URL/key (an OpenAI-compatible endpoint
    /// fronting any provider); falls back to scanning provider-specific
    /// environment variables in the order OpenRouter, OpenAI, Anthropic.
    pub fn from_config(cfg: &crate::config::Config) -> Option<Self> {
        if let (Some(url), Some(key)) = (cfg.llm_gateway_url.clone(), cfg.llm_gateway_key.clone()) {
            let model = std::env::var("DRMCP_LLM_DEFAULT_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());
            return Some(Self::new(url, key, Provider::OpenAiCompatible, model));
        }
        Self::from_env()
    }

    /// A client with no credentials, installed when startup finds none
    /// configured. Every call fails through the normal request path (empty
    /// base URL) rather than introducing a separate disabled-state branch
    /// through the rest of the stack.
    pub fn unconfigured() -> Self {
        Self::new(String::new(), String::new(), Provider::OpenAiCompatible, "unconfigured".to_string())
    }

    pub fn from_env() -> Option<Self> {
        if let Ok(api_key) = std::env::var("OPENROUTER_API_KEY") {
            let model = std::env::var("OPENROUTER_MODEL")
                .unwrap_or_else(|_| "anthropic/claude-sonnet-4".to_string());
            let base_url = std::env::var("OPENROUTER_BASE_URL")
                .unwrap_or_else(|_| "https://openrouter.ai/api/v1".to_string());
            tracing::info!(provider = "openrouter", model, "LLM gateway client initialized");
            return Some(Self::new(base_url, api_key, Provider::OpenAiCompatible, model));
        }

        if let Ok(api_key) = std::env::var("OPENAI_API_KEY") {
            let model = std::env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());
            let base_url =
                std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
            tracing::info!(provider = "openai", model, "LLM gateway client initialized");
            return Some(Self::new(base_url, api_key, Provider::OpenAiCompatible, model));
        }

        if let Ok(api_key) = std::env::var("ANTHROPIC_API_KEY") {
            let model =
                std::env::var("ANTHROPIC_MODEL").unwrap_or_else(|_| "claude-sonnet-4-5-20250514".to_string());
            let base_url = std::env::var("ANTHROPIC_BASE_URL")
                .unwrap_or_else(|_| "https://api.anthropic.com/v1".to_string());
            tracing::info!(provider = "anthropic", model, "LLM gateway client initialized");
            return Some(Self::new(base_url, api_key, Provider::Anthropic, model));
        }

        tracing::info!("no LLM credentials found in environment; gateway client disabled");
        None
    }

    async fn retry<F, Fut, T>(&self, mut attempt_fn: F) -> Result<T, LlmError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, LlmError>>,
    {
        let mut last_err = None;
        for attempt in 0..self.max_attempts {
            match attempt_fn().await {
                Ok(v) => return Ok(v),
                Err(LlmError::Unauthorized) => return Err(LlmError::Unauthorized),
                Err(e) if !is_retryable(&e) => return Err(e),
                Err(e) => {
                    last_err = Some(e);
                    if attempt + 1 < self.max_attempts {
                        tokio::time::sleep(full_jitter_backoff(attempt)).await;
                    }
                }
            }
        }
        Err(LlmError::RetriesExhausted(
            last_err.map(|e| e.to_string()).unwrap_or_default(),
        ))
    }

    async fn chat_once(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ChatCompletionResult, LlmError> {
        match self.provider {
            Provider::Anthropic => self.anthropic_chat(model, messages, options).await,
            Provider::OpenAiCompatible => self.openai_chat(model, messages, options).await,
        }
    }

    async fn openai_chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ChatCompletionResult, LlmError> {
        let body = openai_request_body(model, messages, options, false);
        let resp = self.send(&format!("{}/chat/completions", self.base_url), &body).await?;

        let prompt_tokens = resp
            .get("usage")
            .and_then(|u| u.get("prompt_tokens"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let completion_tokens = resp
            .get("usage")
            .and_then(|u| u.get("completion_tokens"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0);

        let text = resp
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| LlmError::ParseError("missing choices[0].message.content".to_string()))?
            .to_string();

        Ok(ChatCompletionResult {
            text,
            usage: Usage::new(prompt_tokens, completion_tokens, 0.0),
            model: model.to_string(),
        })
    }

    async fn anthropic_chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ChatCompletionResult, LlmError> {
        let body = anthropic_request_body(model, messages, options, false);
        let resp = self
            .send_anthropic(&format!("{}/messages", self.base_url), &body)
            .await?;

        let input_tokens = resp
            .get("usage")
            .and_then(|u| u.get("input_tokens"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let output_tokens = resp
            .get("usage")
            .and_then(|u| u.get("output_tokens"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0);

        let text = resp
            .get("content")
            .and_then(|c| c.as_array())
            .and_then(|blocks| blocks.iter().find(|b| b.get("type").and_then(|t| t.as_str()) == Some("text")))
            .and_then(|b| b.get("text"))
            .and_then(|t| t.as_str())
            .ok_or_else(|| LlmError::ParseError("no text content block in response".to_string()))?
            .to_string();

        Ok(ChatCompletionResult {
            text,
            usage: Usage::new(input_tokens, output_tokens, 0.0),
            model: model.to_string(),
        })
    }

    async fn send(&self, url: &str, body: &Value) -> Result<Value, LlmError> {
        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(send_error)?;
        parse_response(resp).await
    }

    async fn send_anthropic(&self, url: &str, body: &Value) -> Result<Value, LlmError> {
        let resp = self
            .client
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(body)
            .send()
            .await
            .map_err(send_error)?;
        parse_response(resp).await
    }
}

fn send_error(e: reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout(120_000)
    } else {
        LlmError::Upstream {
            status: 0,
            body: e.to_string(),
        }
    }
}

async fn parse_response(resp: reqwest::Response) -> Result<Value, LlmError> {
    let status = resp.status();
    if status.as_u16() == 401 || status.as_u16() == 403 {
        return Err(LlmError::Unauthorized);
    }
    if status.as_u16() == 429 {
        return Err(LlmError::RateLimited);
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(LlmError::Upstream {
            status: status.as_u16(),
            body,
        });
    }
    resp.json::<Value>()
        .await
        .map_err(|e| LlmError::ParseError(e.to_string()))
}

fn is_retryable(e: &LlmError) -> bool {
    match e {
        LlmError::RateLimited => true,
        LlmError::Upstream { status, .. } => *status == 0 || *status >= 500,
        LlmError::Timeout(_) => true,
        _ => false,
    }
}

/// Full-jitter exponential backoff: uniform in `[0, min(cap, base * 2^attempt)]`.
fn full_jitter_backoff(attempt: u32) -> Duration {
    const BASE_MS: u64 = 250;
    const CAP_MS: u64 = 15_000;
    let max = BASE_MS.saturating_mul(1u64 << attempt.min(10)).min(CAP_MS);
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0);
    let jittered = if max == 0 { 0 } else { nanos % (max + 1) };
    Duration::from_millis(jittered)
}

fn role_str(role: ChatRole) -> &'static str {
    match role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
    }
}

fn openai_request_body(model: &str, messages: &[ChatMessage], options: &ChatOptions, stream: bool) -> Value {
    let msgs: Vec<Value> = messages
        .iter()
        .map(|m| serde_json::json!({ "role": role_str(m.role), "content": m.content }))
        .collect();
    let mut body = serde_json::json!({
        "model": model,
        "messages": msgs,
        "stream": stream,
    });
    if let Some(obj) = body.as_object_mut() {
        if let Some(v) = options.max_tokens {
            obj.insert("max_tokens".to_string(), serde_json::json!(v));
        }
        if let Some(v) = options.temperature {
            obj.insert("temperature".to_string(), serde_json::json!(v));
        }
        if let Some(v) = options.top_p {
            obj.insert("top_p".to_string(), serde_json::json!(v));
        }
    }
    body
}

fn anthropic_request_body(model: &str, messages: &[ChatMessage], options: &ChatOptions, stream: bool) -> Value {
    let system: String = messages
        .iter()
        .filter(|m| m.role == ChatRole::System)
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let msgs: Vec<Value> = messages
        .iter()
        .filter(|m| m.role != ChatRole::System)
        .map(|m| serde_json::json!({ "role": role_str(m.role), "content": m.content }))
        .collect();
    serde_json::json!({
        "model": model,
        "system": system,
        "messages": msgs,
        "max_tokens": options.max_tokens.unwrap_or(4096),
        "stream": stream,
    })
}

#[async_trait]
impl LlmGatewayClient for HttpLlmGatewayClient {
    async fn chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ChatCompletionResult, LlmError> {
        self.retry(|| self.chat_once(model, messages, options)).await
    }

    async fn chat_completion_stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<mpsc::Receiver<StreamDelta>, LlmError> {
        let (tx, rx) = mpsc::channel(128);
        let url = match self.provider {
            Provider::Anthropic => format!("{}/messages", self.base_url),
            Provider::OpenAiCompatible => format!("{}/chat/completions", self.base_url),
        };
        let body = match self.provider {
            Provider::Anthropic => anthropic_request_body(model, messages, options, true),
            Provider::OpenAiCompatible => openai_request_body(model, messages, options, true),
        };
        let request = match self.provider {
            Provider::Anthropic => self
                .client
                .post(&url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", "2023-06-01")
                .json(&body),
            Provider::OpenAiCompatible => self.client.post(&url).bearer_auth(&self.api_key).json(&body),
        };

        let provider = self.provider;
        let response = request.send().await.map_err(send_error)?;
        parse_stream_status(&response)?;

        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buf = String::new();
            while let Some(chunk) = stream.next().await {
                let bytes = match chunk {
                    Ok(b) => b,
                    Err(_) => break,
                };
                buf.push_str(&String::from_utf8_lossy(&bytes));
                while let Some(pos) = buf.find("\n\n") {
                    let event: String = buf.drain(..pos + 2).collect();
                    if let Some(delta) = parse_sse_event(provider, &event) {
                        let done = delta.done;
                        if tx.send(delta).await.is_err() {
                            return;
                        }
                        if done {
                            return;
                        }
                    }
                }
            }
            let _ = tx.send(StreamDelta { text: String::new(), done: true }).await;
        });

        Ok(rx)
    }

    async fn list_models(&self, _refresh: bool) -> Result<Vec<ModelDescriptor>, LlmError> {
        match self.provider {
            Provider::Anthropic => Ok(vec![ModelDescriptor {
                id: self.default_model.clone(),
                modalities: vec!["text".to_string(), "image".to_string()],
                context_window: 200_000,
                input_price_per_1k: None,
                output_price_per_1k: None,
            }]),
            Provider::OpenAiCompatible => {
                let resp = self
                    .client
                    .get(format!("{}/models", self.base_url))
                    .bearer_auth(&self.api_key)
                    .send()
                    .await
                    .map_err(send_error)?;
                let parsed = parse_response(resp).await?;
                let data = parsed.get("data").and_then(|d| d.as_array()).cloned().unwrap_or_default();
                Ok(data
                    .into_iter()
                    .filter_map(|m| {
                        let id = m.get("id")?.as_str()?.to_string();
                        let modalities = m
                            .get("architecture")
                            .and_then(|a| a.get("input_modalities"))
                            .and_then(|v| v.as_array())
                            .map(|arr| arr.iter().filter_map(|x| x.as_str().map(str::to_string)).collect())
                            .unwrap_or_else(|| vec!["text".to_string()]);
                        let context_window = m
                            .get("context_length")
                            .and_then(|v| v.as_u64())
                            .unwrap_or(8192) as u32;
                        let input_price_per_1k = m
                            .get("pricing")
                            .and_then(|p| p.get("prompt"))
                            .and_then(|v| v.as_str())
                            .and_then(|s| s.parse::<f64>().ok())
                            .map(|per_token| per_token * 1000.0);
                        Some(ModelDescriptor {
                            id,
                            modalities,
                            context_window,
                            input_price_per_1k,
                            output_price_per_1k: None,
                        })
                    })
                    .collect())
            }
        }
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}

fn parse_stream_status(resp: &reqwest::Response) -> Result<(), LlmError> {
    let status = resp.status();
    if status.as_u16() == 401 || status.as_u16() == 403 {
        return Err(LlmError::Unauthorized);
    }
    if status.as_u16() == 429 {
        return Err(LlmError::RateLimited);
    }
    if !status.is_success() {
        return Err(LlmError::Upstream {
            status: status.as_u16(),
            body: String::new(),
        });
    }
    Ok(())
}

fn parse_sse_event(provider: Provider, event: &str) -> Option<StreamDelta> {
    let data_line = event.lines().find(|l| l.starts_with("data:"))?;
    let payload = data_line.trim_start_matches("data:").trim();
    if payload == "[DONE]" {
        return Some(StreamDelta { text: String::new(), done: true });
    }
    let json: Value = serde_json::from_str(payload).ok()?;
    match provider {
        Provider::OpenAiCompatible => {
            let text = json
                .get("choices")?
                .get(0)?
                .get("delta")?
                .get("content")
                .and_then(|c| c.as_str())
                .unwrap_or("")
                .to_string();
            let finished = json
                .get("choices")
                .and_then(|c| c.get(0))
                .and_then(|c| c.get("finish_reason"))
                .map(|v| !v.is_null())
                .unwrap_or(false);
            Some(StreamDelta { text, done: finished })
        }
        Provider::Anthropic => {
            let event_type = json.get("type").and_then(|t| t.as_str()).unwrap_or("");
            match event_type {
                "content_block_delta" => {
                    let text = json
                        .get("delta")
                        .and_then(|d| d.get("text"))
                        .and_then(|t| t.as_str())
                        .unwrap_or("")
                        .to_string();
                    Some(StreamDelta { text, done: false })
                }
                "message_stop" => Some(StreamDelta { text: String::new(), done: true }),
                _ => None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classifies_rate_limit_and_5xx() {
        assert!(is_retryable(&LlmError::RateLimited));
        assert!(is_retryable(&LlmError::Upstream { status: 503, body: String::new() }));
        assert!(!is_retryable(&LlmError::Upstream { status: 400, body: String::new() }));
        assert!(!is_retryable(&LlmError::Unauthorized));
    }

    #[test]
    fn backoff_is_bounded_by_cap() {
        for attempt in 0..20 {
            assert!(full_jitter_backoff(attempt) <= Duration::from_millis(15_000));
        }
    }

    #[test]
    fn parses_openai_sse_delta() {
        let event = "data: {\"choices\":[{\"delta\":{\"content\":\"hi\"},\"finish_reason\":null}]}\n\n";
        let delta = parse_sse_event(Provider::OpenAiCompatible, event).unwrap();
        assert_eq!(delta.text, "hi");
        assert!(!delta.done);
    }

    #[test]
    fn parses_openai_sse_done_sentinel() {
        let event = "data: [DONE]\n\n";
        let delta = parse_sse_event(Provider::OpenAiCompatible, event).unwrap();
        assert!(delta.done);
    }

    #[test]
    fn parses_anthropic_content_block_delta() {
        let event = "data: {\"type\":\"content_block_delta\",\"delta\":{\"text\":\"hi\"}}\n\n";
        let delta = parse_sse_event(Provider::Anthropic, event).unwrap();
        assert_eq!(delta.text, "hi");
        assert!(!delta.done);
    }
}
