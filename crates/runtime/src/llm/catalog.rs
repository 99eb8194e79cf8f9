//! Dynamic model catalog (§4.3): TTL-cached `ListModels`, with a
//! configuration-supplied static allowlist for providers whose catalog
//! response doesn't expose modality information.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::types::LlmError;

use super::client::LlmGatewayClient;
use super::types::{select_vision_model, ModelDescriptor};

pub struct ModelCatalog {
    client: Arc<dyn LlmGatewayClient>,
    ttl: Duration,
    cache: Mutex<Option<(Instant, Vec<ModelDescriptor>)>>,
    static_vision_allowlist: Vec<String>,
}

impl ModelCatalog {
    pub fn new(client: Arc<dyn LlmGatewayClient>, ttl: Duration, static_vision_allowlist: Vec<String>) -> Self {
        Self {
            client,
            ttl,
            cache: Mutex::new(None),
            static_vision_allowlist,
        }
    }

    /// Returns the cached catalog unless `refresh` is set or the TTL has
    /// elapsed since the last fetch.
    pub async fn list(&self, refresh: bool) -> Result<Vec<ModelDescriptor>, LlmError> {
        let mut guard = self.cache.lock().await;
        if !refresh {
            if let Some((fetched_at, models)) = guard.as_ref() {
                if fetched_at.elapsed() < self.ttl {
                    return Ok(models.clone());
                }
            }
        }
        let models = self.client.list_models(refresh).await?;
        *guard = Some((Instant::now(), models.clone()));
        Ok(models)
    }

    /// Picks a vision-capable model per `SelectVisionModel` (§4.3). Falls
    /// back to the first entry of the configured static allowlist if the
    /// catalog exposes no modality information for any model at all (rather
    /// than if it simply has none with `image` support, which is a real "no
    /// vision model available" outcome the caller must still handle).
    pub async fn select_vision_model(&self, preferred: &[String]) -> Result<Option<String>, LlmError> {
        let models = self.list(false).await?;
        if models.is_empty() {
            return Ok(self.static_vision_allowlist.first().cloned());
        }
        let catalog_exposes_modalities = models.iter().any(|m| !m.modalities.is_empty());
        if !catalog_exposes_modalities {
            return Ok(self.static_vision_allowlist.first().cloned());
        }
        Ok(select_vision_model(preferred, &models))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    use crate::llm::types::{ChatCompletionResult, ChatMessage, ChatOptions, StreamDelta};

    struct CountingClient {
        calls: AtomicUsize,
        models: Vec<ModelDescriptor>,
    }

    #[async_trait]
    impl LlmGatewayClient for CountingClient {
        async fn chat_completion(
            &self,
            _model: &str,
            _messages: &[ChatMessage],
            _options: &ChatOptions,
        ) -> Result<ChatCompletionResult, LlmError> {
            unimplemented!()
        }

        async fn chat_completion_stream(
            &self,
            _model: &str,
            _messages: &[ChatMessage],
            _options: &ChatOptions,
        ) -> Result<mpsc::Receiver<StreamDelta>, LlmError> {
            unimplemented!()
        }

        async fn list_models(&self, _refresh: bool) -> Result<Vec<ModelDescriptor>, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.models.clone())
        }

        fn default_model(&self) -> &str {
            "test-model"
        }
    }

    fn model(id: &str, vision: bool) -> ModelDescriptor {
        ModelDescriptor {
            id: id.to_string(),
            modalities: if vision { vec!["image".to_string()] } else { vec!["text".to_string()] },
            context_window: 8192,
            input_price_per_1k: Some(1.0),
            output_price_per_1k: Some(1.0),
        }
    }

    #[tokio::test]
    async fn caches_within_ttl_and_refetches_after() {
        let client = Arc::new(CountingClient {
            calls: AtomicUsize::new(0),
            models: vec![model("a", true)],
        });
        let catalog = ModelCatalog::new(client.clone(), Duration::from_millis(20), vec![]);

        catalog.list(false).await.unwrap();
        catalog.list(false).await.unwrap();
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(30)).await;
        catalog.list(false).await.unwrap();
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn refresh_forces_refetch() {
        let client = Arc::new(CountingClient {
            calls: AtomicUsize::new(0),
            models: vec![model("a", true)],
        });
        let catalog = ModelCatalog::new(client.clone(), Duration::from_secs(60), vec![]);
        catalog.list(false).await.unwrap();
        catalog.list(true).await.unwrap();
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn falls_back_to_static_allowlist_when_catalog_has_no_modalities() {
        let client = Arc::new(CountingClient {
            calls: AtomicUsize::new(0),
            models: vec![ModelDescriptor {
                id: "opaque".to_string(),
                modalities: vec![],
                context_window: 4096,
                input_price_per_1k: None,
                output_price_per_1k: None,
            }],
        });
        let catalog = ModelCatalog::new(client, Duration::from_secs(60), vec!["fallback-vision".to_string()]);
        let selected = catalog.select_vision_model(&[]).await.unwrap();
        assert_eq!(selected, Some("fallback-vision".to_string()));
    }

    #[tokio::test]
    async fn selects_from_catalog_when_modalities_present() {
        let client = Arc::new(CountingClient {
            calls: AtomicUsize::new(0),
            models: vec![model("text-only", false), model("vision-model", true)],
        });
        let catalog = ModelCatalog::new(client, Duration::from_secs(60), vec!["fallback".to_string()]);
        let selected = catalog.select_vision_model(&[]).await.unwrap();
        assert_eq!(selected, Some("vision-model".to_string()));
    }
}
