//! Storage Gateway trait (C1): the only path to durable state.
//!
//! SQL is an implementation detail behind this trait; callers never see it.
//! All operations are idempotent under retry unless explicitly
//! state-transitioning (job claims, status transitions).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::types::{
    DocId, DocOrigin, IndexDocument, Job, JobEvent, JobEventType, JobId, JobStatus, Report,
    ReportId, Session, SessionId, StorageError,
};

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Clone)]
pub struct SimilarReport {
    pub report: Report,
    pub similarity: f32,
}

#[derive(Debug, Clone)]
pub struct Bm25Hit {
    pub doc_id: DocId,
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct VectorHit {
    pub doc_id: DocId,
    pub similarity: f32,
}

#[derive(Debug, Clone, Default)]
pub struct SqlQueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

#[async_trait]
pub trait StorageGateway: Send + Sync {
    async fn upsert_report(&self, report: &Report) -> StorageResult<ReportId>;
    async fn get_report(&self, id: ReportId) -> StorageResult<Option<Report>>;
    async fn list_recent_reports(&self, limit: usize) -> StorageResult<Vec<Report>>;
    async fn find_reports_by_similarity(
        &self,
        embedding: &[f32],
        top_k: usize,
        min_sim: f32,
    ) -> StorageResult<Vec<SimilarReport>>;

    async fn create_job(&self, job: &Job) -> StorageResult<()>;
    async fn get_job(&self, id: JobId) -> StorageResult<Option<Job>>;
    async fn find_active_job_by_idempotency_key(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<Option<Job>>;
    /// Most recent job with this key regardless of status or TTL. Used to
    /// set `retry_of` when the active lookup above finds nothing (i.e. the
    /// prior attempt with this key failed or was canceled).
    async fn find_latest_job_by_idempotency_key(&self, key: &str) -> StorageResult<Option<Job>>;
    /// Atomically claims the oldest `queued` job and transitions it to
    /// `running` with a lease held by `worker_id` valid until `lease_until`.
    async fn claim_next_job(
        &self,
        worker_id: &str,
        lease_until: DateTime<Utc>,
    ) -> StorageResult<Option<Job>>;
    async fn set_job_status(
        &self,
        id: JobId,
        status: JobStatus,
        result: Option<Value>,
    ) -> StorageResult<()>;
    async fn heartbeat_job(
        &self,
        id: JobId,
        worker_id: &str,
        lease_until: DateTime<Utc>,
        idempotency_expires_at: DateTime<Utc>,
    ) -> StorageResult<bool>;
    async fn cancel_job(&self, id: JobId) -> StorageResult<bool>;
    /// Returns jobs whose lease expired, reassigning them back to `queued`.
    async fn reclaim_stale_leases(&self, now: DateTime<Utc>) -> StorageResult<Vec<JobId>>;

    async fn append_job_event(
        &self,
        job_id: JobId,
        event_type: JobEventType,
        payload: Value,
    ) -> StorageResult<JobEvent>;
    async fn get_job_events(
        &self,
        job_id: JobId,
        since_event_id: i64,
        limit: usize,
    ) -> StorageResult<Vec<JobEvent>>;

    async fn index_document(&self, doc: &IndexDocument) -> StorageResult<DocId>;
    async fn get_index_document(&self, id: DocId) -> StorageResult<Option<IndexDocument>>;
    async fn list_index_documents(
        &self,
        origin: Option<DocOrigin>,
        limit: usize,
    ) -> StorageResult<Vec<IndexDocument>>;
    async fn search_bm25(&self, query_terms: &[String], limit: usize) -> StorageResult<Vec<Bm25Hit>>;
    async fn search_vector(&self, embedding: &[f32], limit: usize) -> StorageResult<Vec<VectorHit>>;
    async fn delete_from_index(&self, id: DocId) -> StorageResult<bool>;

    /// Executes a read-only statement against the guarded allowlist
    /// (`SELECT`/`WITH`/`EXPLAIN` only). Positional `params` bind as SQLite
    /// parameters.
    async fn execute_read_only_sql(&self, sql: &str, params: &[Value]) -> StorageResult<SqlQueryResult>;

    async fn upsert_session(&self, session: &Session) -> StorageResult<()>;
    async fn get_session(&self, id: SessionId) -> StorageResult<Option<Session>>;
    async fn touch_session(&self, id: SessionId, resume_cursor: i64) -> StorageResult<()>;
    async fn delete_session(&self, id: SessionId) -> StorageResult<bool>;

    /// True if this gateway is operating in a degraded (in-memory) mode.
    fn is_degraded(&self) -> bool {
        false
    }
}
