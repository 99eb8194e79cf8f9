//! In-process job worker (§4.5, §4.6): claims queued jobs and drives them to
//! completion, bridging orchestrator progress events into the durable event
//! log via `JobEngine::record_event`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::orchestrator::{OrchestratorOutcome, ProgressSink, ResearchOrchestrator, ResearchRequest};
use crate::retrieval::{HybridIndex, NewDocument};
use crate::types::{DocOrigin, JobEventType, JobId};

use super::engine::JobEngine;

/// Bridges orchestrator progress into the job's durable event log.
struct JobProgressSink {
    engine: Arc<JobEngine>,
    job_id: JobId,
}

#[async_trait]
impl ProgressSink for JobProgressSink {
    async fn emit(&self, event_type: JobEventType, payload: Value) {
        let _ = self.engine.record_event(self.job_id, event_type, payload).await;
    }
}

pub struct JobWorker {
    engine: Arc<JobEngine>,
    orchestrator: Arc<ResearchOrchestrator>,
    index: Arc<HybridIndex>,
    worker_id: String,
    poll_interval: Duration,
}

impl JobWorker {
    pub fn new(
        engine: Arc<JobEngine>,
        orchestrator: Arc<ResearchOrchestrator>,
        index: Arc<HybridIndex>,
        worker_id: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            orchestrator,
            index,
            worker_id: worker_id.into(),
            poll_interval: Duration::from_millis(250),
        }
    }

    /// Runs forever, claiming and executing jobs one at a time. Intended to
    /// be spawned as a background task at startup; multiple instances can
    /// run concurrently since claims are lease-guarded in storage.
    pub async fn run(self: Arc<Self>) {
        loop {
            match self.engine.claim_next(&self.worker_id).await {
                Ok(Some(job)) => {
                    let worker = Arc::clone(&self);
                    tokio::spawn(async move {
                        worker.execute(job).await;
                    });
                }
                Ok(None) => tokio::time::sleep(self.poll_interval).await,
                Err(err) => {
                    tracing::error!(error = %err, "job claim failed");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    async fn execute(&self, job: crate::types::Job) {
        let result = match job.job_type.as_str() {
            "research" => self.execute_research(job.id, job.params.clone()).await,
            "index_url" => self.execute_index_url(job.params.clone()).await,
            other => Err(format!("unknown job type: {other}")),
        };
        match result {
            Ok(value) => {
                let _ = self.engine.complete(job.id, value).await;
            }
            Err(message) => {
                let _ = self.engine.fail(job.id, serde_json::json!({ "error": message })).await;
            }
        }
    }

    async fn execute_research(&self, job_id: JobId, params: Value) -> Result<Value, String> {
        let request: ResearchRequest = serde_json::from_value(params).map_err(|e| e.to_string())?;
        let sink = Arc::new(JobProgressSink { engine: Arc::clone(&self.engine), job_id });
        match self.orchestrator.run(job_id, request, sink).await {
            Ok(OrchestratorOutcome::Completed(report)) => {
                Ok(serde_json::json!({ "report_id": report.id, "output_markdown": report.output_markdown }))
            }
            Ok(OrchestratorOutcome::Failed { message, sub_query_outputs }) => Err(format!(
                "synthesis failed: {message} ({} sub-query outcomes preserved)",
                sub_query_outputs.len()
            )),
            Err(err) => Err(err.to_string()),
        }
    }

    async fn execute_index_url(&self, params: Value) -> Result<Value, String> {
        let url = params.get("url").and_then(|v| v.as_str()).ok_or("missing 'url'")?;
        let body = fetch_url_text(url).await.map_err(|e| e.to_string())?;
        let ids = self
            .index
            .index_documents(vec![NewDocument { origin: DocOrigin::Url, title: url.to_string(), body }])
            .await
            .map_err(|e| e.to_string())?;
        Ok(serde_json::json!({ "doc_ids": ids.iter().map(|id| id.0).collect::<Vec<_>>() }))
    }
}

async fn fetch_url_text(url: &str) -> Result<String, reqwest::Error> {
    reqwest::get(url).await?.text().await
}
