//! Job and job-event record types (§3 Job, Job Event).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::JobId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "succeeded" => Some(JobStatus::Succeeded),
            "failed" => Some(JobStatus::Failed),
            "canceled" => Some(JobStatus::Canceled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Canceled
        )
    }
}

/// Unit of asynchronous work. See invariants in the data model: exactly one
/// worker holds the lease at a time; idempotency binds a canonical parameter
/// hash to at most one active non-terminal job within TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub job_type: String,
    pub params: Value,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub idempotency_key: String,
    pub idempotency_expires_at: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub retry_of: Option<JobId>,
    pub lease_owner: Option<String>,
    pub attempt: u32,
    pub notify_url: Option<String>,
}

impl Job {
    pub fn new(job_type: impl Into<String>, params: Value, idempotency_key: String) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            job_type: job_type.into(),
            params,
            status: JobStatus::Queued,
            created_at: now,
            updated_at: now,
            heartbeat_at: None,
            idempotency_key,
            idempotency_expires_at: None,
            result: None,
            retry_of: None,
            lease_owner: None,
            attempt: 0,
            notify_url: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobEventType {
    Submitted,
    Started,
    Progress,
    PlanComplete,
    AgentStarted,
    AgentCompleted,
    AgentUsage,
    SynthesisStarted,
    SynthesisToken,
    SynthesisError,
    ReportSaved,
    Completed,
    Error,
    Canceled,
}

impl JobEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobEventType::Submitted => "submitted",
            JobEventType::Started => "started",
            JobEventType::Progress => "progress",
            JobEventType::PlanComplete => "plan_complete",
            JobEventType::AgentStarted => "agent_started",
            JobEventType::AgentCompleted => "agent_completed",
            JobEventType::AgentUsage => "agent_usage",
            JobEventType::SynthesisStarted => "synthesis_started",
            JobEventType::SynthesisToken => "synthesis_token",
            JobEventType::SynthesisError => "synthesis_error",
            JobEventType::ReportSaved => "report_saved",
            JobEventType::Completed => "completed",
            JobEventType::Error => "error",
            JobEventType::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobEventType::Completed | JobEventType::Error | JobEventType::Canceled
        )
    }
}

/// Append-only per-job event log entry. `seq` is the per-job monotonic event
/// id referenced by SSE `id:` lines and `Last-Event-ID` resumption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub seq: i64,
    pub job_id: JobId,
    pub event_type: JobEventType,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}
