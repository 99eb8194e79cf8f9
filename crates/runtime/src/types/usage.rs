//! Token/cost usage accounting (§3 Usage Counter).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub cost_usd: f64,
}

impl Usage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64, cost_usd: f64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            cost_usd,
        }
    }

    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
        self.cost_usd += other.cost_usd;
    }
}

/// Cumulative usage partitioned by model and by job/report, derived from LLM
/// responses as they arrive.
#[derive(Debug, Default)]
pub struct UsageCounters {
    by_model: dashmap::DashMap<String, Usage>,
    by_job: dashmap::DashMap<String, Usage>,
    total: parking_lot::Mutex<Usage>,
}

impl UsageCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, model: &str, job_id: &str, usage: Usage) {
        self.by_model
            .entry(model.to_string())
            .and_modify(|u| u.add(&usage))
            .or_insert(usage);
        self.by_job
            .entry(job_id.to_string())
            .and_modify(|u| u.add(&usage))
            .or_insert(usage);
        let mut total = self.total.lock();
        total.add(&usage);
    }

    pub fn total(&self) -> Usage {
        *self.total.lock()
    }

    pub fn for_job(&self, job_id: &str) -> Usage {
        self.by_job.get(job_id).map(|e| *e).unwrap_or_default()
    }

    pub fn by_model_snapshot(&self) -> Vec<(String, Usage)> {
        self.by_model
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_across_models_and_jobs() {
        let counters = UsageCounters::new();
        counters.record("gpt", "job-1", Usage::new(10, 5, 0.01));
        counters.record("gpt", "job-1", Usage::new(3, 2, 0.002));
        counters.record("claude", "job-2", Usage::new(7, 7, 0.02));

        assert_eq!(counters.for_job("job-1").total_tokens, 20);
        assert_eq!(counters.total().total_tokens, 34);
        let by_model = counters.by_model_snapshot();
        assert_eq!(by_model.len(), 2);
    }
}
