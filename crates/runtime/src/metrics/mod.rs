//! `/metrics` exposition (§6): job-status counters, token usage totals, and
//! embedder/storage readiness gauges. JSON by default; Prometheus text
//! exposition format when the caller sends `Accept: text/plain`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::json;

use crate::storage::StorageGateway;
use crate::types::{JobStatus, UsageCounters};

/// Per-job-status counters, incremented as the job worker observes
/// transitions. Counts are cumulative across the process lifetime, not a
/// live count of jobs currently in that state (storage is the source of
/// truth for the latter, via `GetJobStatus`/`ListResearchHistory`).
#[derive(Default)]
pub struct JobStatusCounters {
    queued: AtomicU64,
    running: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    canceled: AtomicU64,
}

impl JobStatusCounters {
    pub fn record(&self, status: JobStatus) {
        let counter = match status {
            JobStatus::Queued => &self.queued,
            JobStatus::Running => &self.running,
            JobStatus::Succeeded => &self.succeeded,
            JobStatus::Failed => &self.failed,
            JobStatus::Canceled => &self.canceled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> [(&'static str, u64); 5] {
        [
            ("queued", self.queued.load(Ordering::Relaxed)),
            ("running", self.running.load(Ordering::Relaxed)),
            ("succeeded", self.succeeded.load(Ordering::Relaxed)),
            ("failed", self.failed.load(Ordering::Relaxed)),
            ("canceled", self.canceled.load(Ordering::Relaxed)),
        ]
    }
}

pub struct MetricsRegistry {
    pub job_status: JobStatusCounters,
    pub usage: Arc<UsageCounters>,
    storage: Arc<dyn StorageGateway>,
    embedder_ready: AtomicU64,
}

impl MetricsRegistry {
    pub fn new(storage: Arc<dyn StorageGateway>, usage: Arc<UsageCounters>) -> Self {
        Self {
            job_status: JobStatusCounters::default(),
            usage,
            storage,
            embedder_ready: AtomicU64::new(1),
        }
    }

    pub fn set_embedder_ready(&self, ready: bool) {
        self.embedder_ready.store(ready as u64, Ordering::Relaxed);
    }

    pub fn render_json(&self) -> serde_json::Value {
        let usage = self.usage.total();
        let status = self.job_status.snapshot();
        json!({
            "jobs": status.iter().map(|(k, v)| (*k, *v)).collect::<std::collections::HashMap<_, _>>(),
            "tokens_total": usage.total_tokens,
            "prompt_tokens_total": usage.prompt_tokens,
            "completion_tokens_total": usage.completion_tokens,
            "cost_usd_total": usage.cost_usd,
            "storage_degraded": self.storage.is_degraded(),
            "embedder_ready": self.embedder_ready.load(Ordering::Relaxed) == 1,
        })
    }

    /// Hand-rolled Prometheus text exposition format (no metrics-export
    /// crate in the dependency stack; this is a small, stable format).
    pub fn render_prometheus(&self) -> String {
        let usage = self.usage.total();
        let mut out = String::new();

        out.push_str("# HELP drmcp_jobs_total Cumulative job transitions observed, by status.\n");
        out.push_str("# TYPE drmcp_jobs_total counter\n");
        for (status, count) in self.job_status.snapshot() {
            out.push_str(&format!("drmcp_jobs_total{{status=\"{status}\"}} {count}\n"));
        }

        out.push_str("# HELP drmcp_tokens_total Cumulative LLM token usage.\n");
        out.push_str("# TYPE drmcp_tokens_total counter\n");
        out.push_str(&format!("drmcp_tokens_total {}\n", usage.total_tokens));

        out.push_str("# HELP drmcp_cost_usd_total Cumulative estimated LLM spend in USD.\n");
        out.push_str("# TYPE drmcp_cost_usd_total counter\n");
        out.push_str(&format!("drmcp_cost_usd_total {}\n", usage.cost_usd));

        out.push_str("# HELP drmcp_storage_degraded Whether the storage gateway is running in a degraded mode.\n");
        out.push_str("# TYPE drmcp_storage_degraded gauge\n");
        out.push_str(&format!("drmcp_storage_degraded {}\n", self.storage.is_degraded() as u8));

        out.push_str("# HELP drmcp_embedder_ready Whether the configured embedder is reachable.\n");
        out.push_str("# TYPE drmcp_embedder_ready gauge\n");
        out.push_str(&format!("drmcp_embedder_ready {}\n", self.embedder_ready.load(Ordering::Relaxed)));

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorageGateway;

    fn registry() -> MetricsRegistry {
        MetricsRegistry::new(Arc::new(InMemoryStorageGateway::new()), Arc::new(UsageCounters::new()))
    }

    #[test]
    fn json_reflects_recorded_job_statuses() {
        let registry = registry();
        registry.job_status.record(JobStatus::Succeeded);
        registry.job_status.record(JobStatus::Succeeded);
        registry.job_status.record(JobStatus::Failed);
        let json = registry.render_json();
        assert_eq!(json["jobs"]["succeeded"], 2);
        assert_eq!(json["jobs"]["failed"], 1);
    }

    #[test]
    fn prometheus_text_includes_type_and_help_lines() {
        let registry = registry();
        let text = registry.render_prometheus();
        assert!(text.contains("# TYPE drmcp_jobs_total counter"));
        assert!(text.contains("drmcp_tokens_total 0"));
    }

    #[test]
    fn embedder_readiness_gauge_reflects_last_set_value() {
        let registry = registry();
        registry.set_embedder_ready(false);
        assert_eq!(registry.render_json()["embedder_ready"], false);
    }
}
