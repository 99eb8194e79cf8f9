//! Job Engine (C5): submission with idempotency, lease-based claiming,
//! heartbeats, reclamation, and terminal-state event/webhook delivery.
//!
//! Grounded on the SQLite CRUD idiom in `storage/sqlite.rs` (itself grounded
//! on the teacher's `scheduler/job_store.rs`); the difference from a cron
//! scheduler is purely in what `job_type` means, not in the state machine.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;

use crate::storage::StorageGateway;
use crate::types::{Job, JobEvent, JobEventType, JobId, JobStatus, RuntimeResult};

use super::events::JobEventBus;
use super::idempotency::canonical_hash;
use super::webhook;

#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub job: Job,
    pub existing_job: bool,
    pub cached: bool,
}

pub struct JobEngine {
    storage: Arc<dyn StorageGateway>,
    events: Arc<JobEventBus>,
    http: reqwest::Client,
    lease_timeout: Duration,
}

impl JobEngine {
    pub fn new(storage: Arc<dyn StorageGateway>, events: Arc<JobEventBus>, lease_timeout: Duration) -> Self {
        Self {
            storage,
            events,
            http: reqwest::Client::new(),
            lease_timeout,
        }
    }

    /// Workers MUST heartbeat strictly more often than this (§4.5: "at an
    /// interval strictly less than `leaseTimeoutMs / 2`"). A third of the
    /// lease leaves headroom under that bound.
    pub fn heartbeat_interval(&self) -> Duration {
        self.lease_timeout / 3
    }

    pub fn event_bus(&self) -> &Arc<JobEventBus> {
        &self.events
    }

    pub async fn submit(
        &self,
        job_type: &str,
        params: Value,
        idempotency_key: Option<String>,
        force_new: bool,
        notify_url: Option<String>,
    ) -> RuntimeResult<SubmitOutcome> {
        let key = idempotency_key.unwrap_or_else(|| canonical_hash(job_type, &params));

        if !force_new {
            if let Some(existing) = self.storage.find_active_job_by_idempotency_key(&key, Utc::now()).await? {
                let cached = existing.status == JobStatus::Succeeded;
                return Ok(SubmitOutcome {
                    job: existing,
                    existing_job: !cached,
                    cached,
                });
            }
        }

        let retry_of = if force_new {
            None
        } else {
            match self.storage.find_latest_job_by_idempotency_key(&key).await? {
                Some(prior) if prior.status == JobStatus::Failed || prior.status == JobStatus::Canceled => {
                    Some(prior.id)
                }
                _ => None,
            }
        };

        let mut job = Job::new(job_type, params, key);
        job.retry_of = retry_of;
        job.notify_url = notify_url;
        self.storage.create_job(&job).await?;
        self.record_event(
            job.id,
            JobEventType::Submitted,
            serde_json::json!({ "retry_of": retry_of.map(|id| id.to_string()) }),
        )
        .await?;

        Ok(SubmitOutcome { job, existing_job: false, cached: false })
    }

    /// Atomically claims the oldest queued job, if any, and records a
    /// `started` event.
    pub async fn claim_next(&self, worker_id: &str) -> RuntimeResult<Option<Job>> {
        let lease_until = lease_deadline(self.lease_timeout);
        let job = self.storage.claim_next_job(worker_id, lease_until).await?;
        if let Some(job) = &job {
            self.record_event(job.id, JobEventType::Started, serde_json::json!({ "attempt": job.attempt }))
                .await?;
        }
        Ok(job)
    }

    pub async fn heartbeat(&self, job_id: JobId, worker_id: &str) -> RuntimeResult<bool> {
        let lease_until = lease_deadline(self.lease_timeout);
        Ok(self.storage.heartbeat_job(job_id, worker_id, lease_until, lease_until).await?)
    }

    /// Cooperative cancellation: marks the job canceled and emits the
    /// terminal event. Workers poll `get_job`/the event stream to notice and
    /// stop promptly; an already-succeeded job cannot be canceled.
    pub async fn cancel(&self, job_id: JobId) -> RuntimeResult<bool> {
        let canceled = self.storage.cancel_job(job_id).await?;
        if canceled {
            self.record_event(job_id, JobEventType::Canceled, serde_json::json!({})).await?;
            self.fire_webhook_if_configured(job_id).await;
        }
        Ok(canceled)
    }

    pub async fn complete(&self, job_id: JobId, result: Value) -> RuntimeResult<()> {
        self.storage.set_job_status(job_id, JobStatus::Succeeded, Some(result.clone())).await?;
        self.record_event(job_id, JobEventType::Completed, result).await?;
        self.fire_webhook_if_configured(job_id).await;
        Ok(())
    }

    pub async fn fail(&self, job_id: JobId, error: Value) -> RuntimeResult<()> {
        self.storage.set_job_status(job_id, JobStatus::Failed, Some(error.clone())).await?;
        self.record_event(job_id, JobEventType::Error, error).await?;
        self.fire_webhook_if_configured(job_id).await;
        Ok(())
    }

    /// Returns jobs reassigned from `running` back to `queued` because their
    /// heartbeat is older than the lease timeout.
    pub async fn reclaim_stale(&self) -> RuntimeResult<Vec<JobId>> {
        let threshold = Utc::now()
            - chrono::Duration::from_std(self.lease_timeout).unwrap_or_else(|_| chrono::Duration::seconds(0));
        Ok(self.storage.reclaim_stale_leases(threshold).await?)
    }

    pub async fn record_event(&self, job_id: JobId, event_type: JobEventType, payload: Value) -> RuntimeResult<JobEvent> {
        let event = self.storage.append_job_event(job_id, event_type, payload).await?;
        self.events.publish(event.clone());
        Ok(event)
    }

    async fn fire_webhook_if_configured(&self, job_id: JobId) {
        if let Ok(Some(job)) = self.storage.get_job(job_id).await {
            if let Some(url) = &job.notify_url {
                let payload = serde_json::json!({
                    "job_id": job.id.to_string(),
                    "status": job.status.as_str(),
                    "result": job.result,
                });
                webhook::notify(&self.http, url, &payload).await;
            }
        }
    }
}

fn lease_deadline(lease_timeout: Duration) -> chrono::DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(lease_timeout).unwrap_or_else(|_| chrono::Duration::seconds(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorageGateway;

    fn engine() -> JobEngine {
        JobEngine::new(
            Arc::new(InMemoryStorageGateway::new()),
            Arc::new(JobEventBus::new()),
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn resubmitting_a_running_job_returns_existing_job_marker() {
        let engine = engine();
        let params = serde_json::json!({"query": "rust ownership"});
        let first = engine.submit("research", params.clone(), None, false, None).await.unwrap();
        assert!(!first.existing_job);

        let second = engine.submit("research", params, None, false, None).await.unwrap();
        assert!(second.existing_job);
        assert_eq!(second.job.id, first.job.id);
    }

    #[tokio::test]
    async fn succeeded_job_within_ttl_is_returned_as_cached() {
        let engine = engine();
        let params = serde_json::json!({"query": "q"});
        let first = engine.submit("research", params.clone(), None, false, None).await.unwrap();
        engine.complete(first.job.id, serde_json::json!({"report": "done"})).await.unwrap();

        let second = engine.submit("research", params, None, false, None).await.unwrap();
        assert!(second.cached);
        assert_eq!(second.job.id, first.job.id);
    }

    #[tokio::test]
    async fn failed_job_resubmit_creates_a_new_job_with_retry_of() {
        let engine = engine();
        let params = serde_json::json!({"query": "q"});
        let first = engine.submit("research", params.clone(), None, false, None).await.unwrap();
        engine.fail(first.job.id, serde_json::json!({"error": "boom"})).await.unwrap();

        let second = engine.submit("research", params, None, false, None).await.unwrap();
        assert!(!second.existing_job);
        assert!(!second.cached);
        assert_ne!(second.job.id, first.job.id);
        assert_eq!(second.job.retry_of, Some(first.job.id));
    }

    #[tokio::test]
    async fn force_new_bypasses_idempotency_matching() {
        let engine = engine();
        let params = serde_json::json!({"query": "q"});
        let first = engine.submit("research", params.clone(), None, false, None).await.unwrap();
        let second = engine.submit("research", params, None, true, None).await.unwrap();
        assert_ne!(first.job.id, second.job.id);
    }

    #[tokio::test]
    async fn claim_then_heartbeat_then_complete_emits_monotonic_events() {
        let engine = engine();
        let submitted = engine.submit("research", serde_json::json!({}), None, false, None).await.unwrap();
        let claimed = engine.claim_next("worker-1").await.unwrap().unwrap();
        assert_eq!(claimed.id, submitted.job.id);

        assert!(engine.heartbeat(claimed.id, "worker-1").await.unwrap());
        engine.complete(claimed.id, serde_json::json!({"ok": true})).await.unwrap();

        let events = engine.storage.get_job_events(claimed.id, 0, 100).await.unwrap();
        let seqs: Vec<i64> = events.iter().map(|e| e.seq).collect();
        let mut sorted = seqs.clone();
        sorted.sort();
        assert_eq!(seqs, sorted);
        assert!(events.iter().any(|e| e.event_type == JobEventType::Completed));
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_noop_on_terminal_job() {
        let engine = engine();
        let submitted = engine.submit("research", serde_json::json!({}), None, false, None).await.unwrap();
        engine.complete(submitted.job.id, serde_json::json!({})).await.unwrap();
        assert!(!engine.cancel(submitted.job.id).await.unwrap());
    }
}
