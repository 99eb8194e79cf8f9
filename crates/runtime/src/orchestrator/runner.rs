//! Stages R (Research) and S (Synthesize), and the orchestrator entry point
//! that ties Plan → Research → Synthesize together (§4.6).

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::embedding::EmbeddingProvider;
use crate::llm::{ChatMessage, ChatOptions, LlmGatewayClient, ModelCatalog};
use crate::storage::StorageGateway;
use crate::types::{
    CostPreference, JobEventType, JobId, OrchestratorError, Report, ReportId, ReportMetadata, RuntimeError,
    RuntimeResult, SourceRef, Usage, UsageCounters,
};

use super::budget::{estimate_tokens, fit_documents, max_tokens_for, BudgetedDocument};
use super::plan::{build_planning_prompt, extract_sub_queries};
use super::progress::ProgressSink;
use super::types::{OrchestratorOutcome, ResearchRequest, SubQueryOutcome};

/// Context window assumed for models the catalog doesn't describe.
const DEFAULT_CONTEXT_WINDOW: u32 = 32_000;
const OUTPUT_RESERVATION: usize = 2_000;

pub struct ResearchOrchestrator {
    llm: Arc<dyn LlmGatewayClient>,
    catalog: Arc<ModelCatalog>,
    storage: Arc<dyn StorageGateway>,
    embedding: Arc<dyn EmbeddingProvider>,
    parallelism: usize,
    min_max_tokens: usize,
    vision_allowlist: Vec<String>,
    usage: Arc<UsageCounters>,
}

impl ResearchOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        llm: Arc<dyn LlmGatewayClient>,
        catalog: Arc<ModelCatalog>,
        storage: Arc<dyn StorageGateway>,
        embedding: Arc<dyn EmbeddingProvider>,
        parallelism: usize,
        min_max_tokens: usize,
        vision_allowlist: Vec<String>,
        usage: Arc<UsageCounters>,
    ) -> Self {
        Self {
            llm,
            catalog,
            storage,
            embedding,
            parallelism: parallelism.max(1),
            min_max_tokens,
            vision_allowlist,
            usage,
        }
    }

    pub async fn run(
        &self,
        job_id: JobId,
        request: ResearchRequest,
        progress: Arc<dyn ProgressSink>,
    ) -> RuntimeResult<OrchestratorOutcome> {
        let planner_model = self.select_planner_model(request.cost_preference).await?;
        let ensemble_model = self.select_ensemble_model(request.cost_preference).await?;

        let allow_images = if request.images.is_empty() {
            true
        } else {
            match self.catalog.select_vision_model(&self.vision_allowlist).await {
                Ok(Some(_)) => true,
                _ => {
                    progress
                        .emit(
                            JobEventType::Progress,
                            json!({ "degraded": "no_vision_model", "images_dropped": request.images.len() }),
                        )
                        .await;
                    false
                }
            }
        };

        let mut all_outcomes: Vec<SubQueryOutcome> = Vec::new();
        let max_iterations = request.max_iterations.max(1);

        for iteration in 0..max_iterations {
            let plan_context = if all_outcomes.is_empty() {
                String::new()
            } else {
                format!(
                    "\n\nPrior findings so far:\n{}",
                    all_outcomes
                        .iter()
                        .filter(|o| o.succeeded())
                        .map(|o| format!("- {}", o.sub_query))
                        .collect::<Vec<_>>()
                        .join("\n")
                )
            };
            let query_for_plan = format!("{}{}", request.query, plan_context);

            let sub_queries = self
                .plan(&planner_model, &query_for_plan, request.audience_level.as_deref())
                .await?;

            progress
                .emit(
                    JobEventType::PlanComplete,
                    json!({ "iteration": iteration, "sub_queries": sub_queries }),
                )
                .await;

            let outcomes = self
                .research(
                    &ensemble_model,
                    &sub_queries,
                    request.ensemble_size.max(1),
                    &request,
                    allow_images,
                    progress.as_ref(),
                )
                .await;
            all_outcomes.extend(outcomes);
        }

        if all_outcomes.iter().all(|o| !o.succeeded()) {
            return Err(OrchestratorError::AllSubQueriesFailed.into());
        }

        self.synthesize(job_id, &request, &planner_model, all_outcomes, progress.as_ref()).await
    }

    async fn select_planner_model(&self, pref: CostPreference) -> RuntimeResult<String> {
        self.select_model_for_tier(pref).await
    }

    async fn select_ensemble_model(&self, pref: CostPreference) -> RuntimeResult<String> {
        self.select_model_for_tier(pref).await
    }

    /// `High` picks the model with the largest context window (most
    /// capable); `VeryLow` picks the cheapest priced model; `Low` keeps the
    /// gateway's configured default. Domain-aware routing per sub-query is
    /// not attempted: the catalog carries no topic metadata to route on.
    async fn select_model_for_tier(&self, pref: CostPreference) -> RuntimeResult<String> {
        let models = self.catalog.list(false).await.map_err(RuntimeError::from)?;
        if models.is_empty() {
            return Ok(self.llm.default_model().to_string());
        }
        let chosen = match pref {
            CostPreference::Low => return Ok(self.llm.default_model().to_string()),
            CostPreference::High => models.iter().max_by_key(|m| m.context_window),
            CostPreference::VeryLow => models.iter().min_by(|a, b| {
                let pa = a.input_price_per_1k.unwrap_or(f64::INFINITY);
                let pb = b.input_price_per_1k.unwrap_or(f64::INFINITY);
                pa.partial_cmp(&pb).unwrap_or(std::cmp::Ordering::Equal)
            }),
        };
        Ok(chosen.map(|m| m.id.clone()).unwrap_or_else(|| self.llm.default_model().to_string()))
    }

    async fn plan(&self, model: &str, query: &str, audience: Option<&str>) -> RuntimeResult<Vec<String>> {
        let first = self.run_planning_prompt(model, query, audience, false).await?;
        match extract_sub_queries(&first) {
            Ok(subs) => Ok(subs),
            Err(_) => {
                let retry = self.run_planning_prompt(model, query, audience, true).await?;
                extract_sub_queries(&retry).map_err(RuntimeError::from)
            }
        }
    }

    async fn run_planning_prompt(
        &self,
        model: &str,
        query: &str,
        audience: Option<&str>,
        strict: bool,
    ) -> RuntimeResult<String> {
        let prompt = build_planning_prompt(query, audience, strict);
        let messages = vec![ChatMessage::user(prompt)];
        let result = self
            .llm
            .chat_completion(model, &messages, &ChatOptions::default())
            .await
            .map_err(RuntimeError::from)?;
        Ok(result.text)
    }

    #[allow(clippy::too_many_arguments)]
    async fn research(
        &self,
        model: &str,
        sub_queries: &[String],
        ensemble_size: usize,
        request: &ResearchRequest,
        allow_images: bool,
        progress: &dyn ProgressSink,
    ) -> Vec<SubQueryOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let mut tasks = JoinSet::new();

        for sub_query in sub_queries {
            for _ in 0..ensemble_size {
                let semaphore = semaphore.clone();
                let llm = self.llm.clone();
                let model = model.to_string();
                let sub_query = sub_query.clone();
                let documents = request.text_documents.clone();
                let structured_data = request.structured_data.clone();
                let images = if allow_images { request.images.clone() } else { Vec::new() };
                let min_max_tokens = self.min_max_tokens;

                tasks.spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    run_sub_query(llm, &model, &sub_query, &documents, structured_data.as_ref(), &images, min_max_tokens)
                        .await
                });
            }
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            if let Ok(outcome) = joined {
                progress
                    .emit(
                        if outcome.succeeded() { JobEventType::AgentCompleted } else { JobEventType::AgentUsage },
                        json!({
                            "sub_query": outcome.sub_query,
                            "model": outcome.model,
                            "usage": outcome.usage,
                            "error": outcome.error,
                        }),
                    )
                    .await;
                outcomes.push(outcome);
            }
        }
        outcomes
    }

    async fn synthesize(
        &self,
        job_id: JobId,
        request: &ResearchRequest,
        model: &str,
        sub_query_outputs: Vec<SubQueryOutcome>,
        progress: &dyn ProgressSink,
    ) -> RuntimeResult<OrchestratorOutcome> {
        progress.emit(JobEventType::SynthesisStarted, json!({})).await;

        let instructions = synthesis_instructions(request);
        let documents: Vec<BudgetedDocument> = sub_query_outputs
            .iter()
            .filter(|o| o.succeeded())
            .map(|o| BudgetedDocument {
                label: o.sub_query.clone(),
                text: o.text.clone().unwrap_or_default(),
                salience: 1.0,
            })
            .collect();

        let budget = max_tokens_for(DEFAULT_CONTEXT_WINDOW as usize, OUTPUT_RESERVATION, self.min_max_tokens);
        let (kept, dropped) = fit_documents(&instructions, documents, budget);
        if !dropped.is_empty() {
            progress
                .emit(JobEventType::Progress, json!({ "documents_dropped_for_budget": dropped }))
                .await;
        }

        let body: String = kept
            .iter()
            .map(|d| format!("### {}\n{}\n", d.label, d.text))
            .collect::<Vec<_>>()
            .join("\n");
        let messages = vec![ChatMessage::system(instructions), ChatMessage::user(body)];

        let stream = self
            .llm
            .chat_completion_stream(model, &messages, &ChatOptions { stream: true, ..Default::default() })
            .await;

        let mut receiver = match stream {
            Ok(rx) => rx,
            Err(e) => {
                progress.emit(JobEventType::SynthesisError, json!({ "error": e.to_string() })).await;
                return Ok(OrchestratorOutcome::Failed {
                    message: format!("synthesis stream failed to start: {e}"),
                    sub_query_outputs,
                });
            }
        };

        let mut output = String::new();
        while let Some(delta) = receiver.recv().await {
            if !delta.text.is_empty() {
                output.push_str(&delta.text);
                progress.emit(JobEventType::SynthesisToken, json!({ "text": delta.text })).await;
            }
            if delta.done {
                break;
            }
        }

        if output.trim().is_empty() {
            progress
                .emit(JobEventType::SynthesisError, json!({ "error": "empty synthesis output" }))
                .await;
            return Ok(OrchestratorOutcome::Failed {
                message: "synthesis produced no output".to_string(),
                sub_query_outputs,
            });
        }

        let sources = if request.include_sources {
            sub_query_outputs
                .iter()
                .filter(|o| o.succeeded())
                .map(|o| SourceRef { label: o.sub_query.clone(), url: None, doc_id: None })
                .collect()
        } else {
            Vec::new()
        };

        let mut total_usage = Usage::default();
        for o in &sub_query_outputs {
            total_usage.add(&o.usage);
        }
        self.usage.record(model, &job_id.to_string(), total_usage);

        let embedding = if self.embedding.is_ready() {
            self.embedding.embed(&output).await.ok()
        } else {
            None
        };

        let report = Report {
            id: ReportId(0),
            query: request.query.clone(),
            created_at: Utc::now(),
            output_markdown: output,
            sources,
            metadata: ReportMetadata {
                plan: sub_query_outputs.iter().map(|o| o.sub_query.clone()).collect(),
                iterations: request.max_iterations.max(1),
                ensemble_models: vec![model.to_string()],
                prompt_tokens: total_usage.prompt_tokens,
                completion_tokens: total_usage.completion_tokens,
                total_tokens: total_usage.total_tokens,
                confidence: None,
                failed_sub_queries: sub_query_outputs
                    .iter()
                    .filter(|o| !o.succeeded())
                    .map(|o| o.sub_query.clone())
                    .collect(),
            },
            embedding,
        };

        let id = self.storage.upsert_report(&report).await.map_err(RuntimeError::from)?;
        let mut saved = report;
        saved.id = id;

        progress.emit(JobEventType::ReportSaved, json!({ "report_id": id.to_string() })).await;
        Ok(OrchestratorOutcome::Completed(saved))
    }
}

fn synthesis_instructions(request: &ResearchRequest) -> String {
    let audience = request.audience_level.as_deref().unwrap_or("general");
    let format = request.output_format.as_deref().unwrap_or("markdown report");
    format!(
        "Synthesize the findings below into a {format} answering: {}\n\
         Write for a {audience} audience. Cite the sub-query each claim came from.",
        request.query
    )
}

async fn run_sub_query(
    llm: Arc<dyn LlmGatewayClient>,
    model: &str,
    sub_query: &str,
    documents: &[String],
    structured_data: Option<&Value>,
    images: &[String],
    min_max_tokens: usize,
) -> SubQueryOutcome {
    let mut prompt = format!("Research the following and report findings concisely:\n{sub_query}");
    if !documents.is_empty() {
        prompt.push_str("\n\nAttached documents:\n");
        prompt.push_str(&documents.join("\n---\n"));
    }
    if let Some(data) = structured_data {
        prompt.push_str(&format!("\n\nStructured data:\n{data}"));
    }
    if !images.is_empty() {
        prompt.push_str(&format!("\n\n[{} image(s) attached]", images.len()));
    }

    let options = ChatOptions {
        max_tokens: Some(estimate_tokens(&prompt).max(min_max_tokens) as u32),
        ..Default::default()
    };
    let messages = vec![ChatMessage::user(prompt)];

    match llm.chat_completion(model, &messages, &options).await {
        Ok(result) => SubQueryOutcome {
            sub_query: sub_query.to_string(),
            model: result.model,
            text: Some(result.text),
            usage: result.usage,
            error: None,
        },
        Err(e) => SubQueryOutcome {
            sub_query: sub_query.to_string(),
            model: model.to_string(),
            text: None,
            usage: Usage::default(),
            error: Some(e.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    use crate::embedding::NoOpEmbeddingProvider;
    use crate::llm::{ChatCompletionResult, ModelDescriptor, StreamDelta};
    use crate::storage::InMemoryStorageGateway;
    use crate::types::DegradedReason;

    struct ScriptedClient {
        plan_response: String,
        research_response: String,
        synthesis_text: String,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmGatewayClient for ScriptedClient {
        async fn chat_completion(
            &self,
            _model: &str,
            messages: &[ChatMessage],
            _options: &ChatOptions,
        ) -> Result<ChatCompletionResult, crate::types::LlmError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let text = if messages[0].content.contains("Break the query into") {
                self.plan_response.clone()
            } else {
                self.research_response.clone()
            };
            let _ = call;
            Ok(ChatCompletionResult { text, usage: Usage::new(10, 10, 0.0), model: "test-model".to_string() })
        }

        async fn chat_completion_stream(
            &self,
            _model: &str,
            _messages: &[ChatMessage],
            _options: &ChatOptions,
        ) -> Result<mpsc::Receiver<StreamDelta>, crate::types::LlmError> {
            let (tx, rx) = mpsc::channel(16);
            let text = self.synthesis_text.clone();
            tokio::spawn(async move {
                let _ = tx.send(StreamDelta { text, done: false }).await;
                let _ = tx.send(StreamDelta { text: String::new(), done: true }).await;
            });
            Ok(rx)
        }

        async fn list_models(&self, _refresh: bool) -> Result<Vec<ModelDescriptor>, crate::types::LlmError> {
            Ok(vec![])
        }

        fn default_model(&self) -> &str {
            "test-model"
        }
    }

    fn orchestrator(client: Arc<ScriptedClient>) -> ResearchOrchestrator {
        let catalog = Arc::new(ModelCatalog::new(client.clone(), Duration::from_secs(60), vec![]));
        ResearchOrchestrator::new(
            client,
            catalog,
            Arc::new(InMemoryStorageGateway::new()),
            Arc::new(NoOpEmbeddingProvider::new(8)),
            4,
            256,
            vec![],
            Arc::new(UsageCounters::new()),
        )
    }

    fn test_job_id() -> JobId {
        JobId(uuid::Uuid::nil())
    }

    #[tokio::test]
    async fn full_pipeline_produces_a_completed_report() {
        let client = Arc::new(ScriptedClient {
            plan_response: "<agent_1>a</agent_1><agent_2>b</agent_2><agent_3>c</agent_3>".to_string(),
            research_response: "some finding".to_string(),
            synthesis_text: "# Report\nfindings here".to_string(),
            calls: AtomicUsize::new(0),
        });
        let orchestrator = orchestrator(client);
        let request = ResearchRequest {
            query: "what is rust ownership".to_string(),
            cost_preference: CostPreference::Low,
            audience_level: None,
            output_format: None,
            include_sources: true,
            images: vec![],
            text_documents: vec![],
            structured_data: None,
            max_iterations: 1,
            ensemble_size: 1,
        };
        let outcome = orchestrator.run(test_job_id(), request, Arc::new(super::super::progress::NullProgressSink)).await.unwrap();
        match outcome {
            OrchestratorOutcome::Completed(report) => {
                assert!(report.output_markdown.contains("findings here"));
                assert_eq!(report.metadata.plan.len(), 3);
            }
            OrchestratorOutcome::Failed { message, .. } => panic!("expected success, got {message}"),
        }
    }

    #[tokio::test]
    async fn malformed_plan_response_retries_once_then_fails() {
        let client = Arc::new(ScriptedClient {
            plan_response: "not tagged at all".to_string(),
            research_response: "finding".to_string(),
            synthesis_text: "report".to_string(),
            calls: AtomicUsize::new(0),
        });
        let orchestrator = orchestrator(client);
        let request = ResearchRequest {
            query: "q".to_string(),
            cost_preference: CostPreference::Low,
            audience_level: None,
            output_format: None,
            include_sources: true,
            images: vec![],
            text_documents: vec![],
            structured_data: None,
            max_iterations: 1,
            ensemble_size: 1,
        };
        let err = orchestrator.run(test_job_id(), request, Arc::new(super::super::progress::NullProgressSink)).await.unwrap_err();
        assert_eq!(err.class(), "Internal");
    }

    #[tokio::test]
    async fn images_without_vision_model_degrade_instead_of_failing() {
        struct RecordingSink {
            events: parking_lot::Mutex<Vec<(JobEventType, Value)>>,
        }
        #[async_trait]
        impl ProgressSink for RecordingSink {
            async fn emit(&self, event_type: JobEventType, payload: Value) {
                self.events.lock().push((event_type, payload));
            }
        }

        let client = Arc::new(ScriptedClient {
            plan_response: "<agent_1>a</agent_1><agent_2>b</agent_2><agent_3>c</agent_3>".to_string(),
            research_response: "finding".to_string(),
            synthesis_text: "report body".to_string(),
            calls: AtomicUsize::new(0),
        });
        let orchestrator = orchestrator(client);
        let sink = Arc::new(RecordingSink { events: parking_lot::Mutex::new(Vec::new()) });
        let request = ResearchRequest {
            query: "q".to_string(),
            cost_preference: CostPreference::Low,
            audience_level: None,
            output_format: None,
            include_sources: false,
            images: vec!["http://example.com/a.png".to_string()],
            text_documents: vec![],
            structured_data: None,
            max_iterations: 1,
            ensemble_size: 1,
        };
        let outcome = orchestrator.run(test_job_id(), request, sink.clone()).await.unwrap();
        assert!(matches!(outcome, OrchestratorOutcome::Completed(_)));
        let events = sink.events.lock();
        assert!(events
            .iter()
            .any(|(t, p)| *t == JobEventType::Progress && p.get("degraded").and_then(|v| v.as_str()) == Some(DegradedReason::NoVisionModel.as_str())));
    }
}
