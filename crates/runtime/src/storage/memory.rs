//! In-memory `StorageGateway` fallback used when the embedded database is
//! unavailable. Reported as a degraded mode per §4.1.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::types::{
    DocId, DocOrigin, IndexDocument, Job, JobEvent, JobEventType, JobId, JobStatus, Report,
    ReportId, Session, SessionId, StorageError,
};

use super::gateway::{Bm25Hit, SimilarReport, SqlQueryResult, StorageGateway, StorageResult, VectorHit};

#[derive(Default)]
pub struct InMemoryStorageGateway {
    reports: DashMap<i64, Report>,
    next_report_id: AtomicI64,
    jobs: DashMap<JobId, Job>,
    job_events: DashMap<JobId, Mutex<Vec<JobEvent>>>,
    docs: DashMap<i64, IndexDocument>,
    next_doc_id: AtomicI64,
    sessions: DashMap<SessionId, Session>,
}

impl InMemoryStorageGateway {
    pub fn new() -> Self {
        Self::default()
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[async_trait]
impl StorageGateway for InMemoryStorageGateway {
    async fn upsert_report(&self, report: &Report) -> StorageResult<ReportId> {
        let id = if report.id.0 != 0 {
            report.id.0
        } else {
            self.next_report_id.fetch_add(1, Ordering::SeqCst) + 1
        };
        let mut stored = report.clone();
        stored.id = ReportId(id);
        self.reports.insert(id, stored);
        Ok(ReportId(id))
    }

    async fn get_report(&self, id: ReportId) -> StorageResult<Option<Report>> {
        Ok(self.reports.get(&id.0).map(|r| r.clone()))
    }

    async fn list_recent_reports(&self, limit: usize) -> StorageResult<Vec<Report>> {
        let mut all: Vec<Report> = self.reports.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all.truncate(limit);
        Ok(all)
    }

    async fn find_reports_by_similarity(
        &self,
        embedding: &[f32],
        top_k: usize,
        min_sim: f32,
    ) -> StorageResult<Vec<SimilarReport>> {
        let mut out: Vec<SimilarReport> = self
            .reports
            .iter()
            .filter_map(|e| {
                e.value().embedding.as_ref().map(|emb| SimilarReport {
                    report: e.value().clone(),
                    similarity: cosine(embedding, emb),
                })
            })
            .filter(|s| s.similarity >= min_sim)
            .collect();
        out.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap());
        out.truncate(top_k);
        Ok(out)
    }

    async fn create_job(&self, job: &Job) -> StorageResult<()> {
        self.jobs.insert(job.id, job.clone());
        self.job_events.insert(job.id, Mutex::new(Vec::new()));
        Ok(())
    }

    async fn get_job(&self, id: JobId) -> StorageResult<Option<Job>> {
        Ok(self.jobs.get(&id).map(|j| j.clone()))
    }

    async fn find_active_job_by_idempotency_key(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<Option<Job>> {
        let mut matches: Vec<Job> = self
            .jobs
            .iter()
            .filter(|e| {
                e.value().idempotency_key == key
                    && e.value()
                        .idempotency_expires_at
                        .map(|exp| exp > now)
                        .unwrap_or(true)
                    && (!e.value().status.is_terminal() || e.value().status == JobStatus::Succeeded)
            })
            .map(|e| e.value().clone())
            .collect();
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matches.into_iter().next())
    }

    async fn find_latest_job_by_idempotency_key(&self, key: &str) -> StorageResult<Option<Job>> {
        let mut matches: Vec<Job> = self
            .jobs
            .iter()
            .filter(|e| e.value().idempotency_key == key)
            .map(|e| e.value().clone())
            .collect();
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matches.into_iter().next())
    }

    async fn claim_next_job(
        &self,
        worker_id: &str,
        lease_until: DateTime<Utc>,
    ) -> StorageResult<Option<Job>> {
        let candidate = {
            let mut queued: Vec<Job> = self
                .jobs
                .iter()
                .filter(|e| e.value().status == JobStatus::Queued)
                .map(|e| e.value().clone())
                .collect();
            queued.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            queued.into_iter().next()
        };
        let Some(mut job) = candidate else {
            return Ok(None);
        };
        // Re-check under the entry lock to avoid a double-claim race.
        let claimed = self.jobs.get_mut(&job.id).map(|mut entry| {
            if entry.status == JobStatus::Queued {
                entry.status = JobStatus::Running;
                entry.updated_at = Utc::now();
                entry.heartbeat_at = Some(Utc::now());
                entry.lease_owner = Some(worker_id.to_string());
                entry.idempotency_expires_at = Some(lease_until);
                entry.attempt += 1;
                job = entry.clone();
                true
            } else {
                false
            }
        });
        if claimed == Some(true) {
            Ok(Some(job))
        } else {
            Ok(None)
        }
    }

    async fn set_job_status(
        &self,
        id: JobId,
        status: JobStatus,
        result: Option<Value>,
    ) -> StorageResult<()> {
        if let Some(mut job) = self.jobs.get_mut(&id) {
            job.status = status;
            job.updated_at = Utc::now();
            if result.is_some() {
                job.result = result;
            }
        }
        Ok(())
    }

    async fn heartbeat_job(
        &self,
        id: JobId,
        worker_id: &str,
        lease_until: DateTime<Utc>,
        idempotency_expires_at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let _ = lease_until;
        if let Some(mut job) = self.jobs.get_mut(&id) {
            if job.lease_owner.as_deref() == Some(worker_id) && job.status == JobStatus::Running {
                job.heartbeat_at = Some(Utc::now());
                job.updated_at = Utc::now();
                job.idempotency_expires_at = Some(idempotency_expires_at);
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn cancel_job(&self, id: JobId) -> StorageResult<bool> {
        if let Some(mut job) = self.jobs.get_mut(&id) {
            if !job.status.is_terminal() {
                job.status = JobStatus::Canceled;
                job.updated_at = Utc::now();
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn reclaim_stale_leases(&self, now: DateTime<Utc>) -> StorageResult<Vec<JobId>> {
        let mut reclaimed = Vec::new();
        for mut entry in self.jobs.iter_mut() {
            if entry.status == JobStatus::Running {
                if let Some(hb) = entry.heartbeat_at {
                    if hb < now {
                        entry.status = JobStatus::Queued;
                        entry.lease_owner = None;
                        entry.updated_at = now;
                        reclaimed.push(entry.id);
                    }
                }
            }
        }
        Ok(reclaimed)
    }

    async fn append_job_event(
        &self,
        job_id: JobId,
        event_type: JobEventType,
        payload: Value,
    ) -> StorageResult<JobEvent> {
        let entry = self
            .job_events
            .entry(job_id)
            .or_insert_with(|| Mutex::new(Vec::new()));
        let mut events = entry.lock();
        let seq = events.last().map(|e| e.seq + 1).unwrap_or(1);
        let event = JobEvent {
            seq,
            job_id,
            event_type,
            payload,
            created_at: Utc::now(),
        };
        events.push(event.clone());
        Ok(event)
    }

    async fn get_job_events(
        &self,
        job_id: JobId,
        since_event_id: i64,
        limit: usize,
    ) -> StorageResult<Vec<JobEvent>> {
        let Some(entry) = self.job_events.get(&job_id) else {
            return Ok(Vec::new());
        };
        let events = entry.lock();
        Ok(events
            .iter()
            .filter(|e| e.seq > since_event_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn index_document(&self, doc: &IndexDocument) -> StorageResult<DocId> {
        let id = self.next_doc_id.fetch_add(1, Ordering::SeqCst) + 1;
        let mut stored = doc.clone();
        stored.id = DocId(id);
        self.docs.insert(id, stored);
        Ok(DocId(id))
    }

    async fn get_index_document(&self, id: DocId) -> StorageResult<Option<IndexDocument>> {
        Ok(self.docs.get(&id.0).map(|d| d.clone()))
    }

    async fn list_index_documents(
        &self,
        origin: Option<DocOrigin>,
        limit: usize,
    ) -> StorageResult<Vec<IndexDocument>> {
        let mut all: Vec<IndexDocument> = self
            .docs
            .iter()
            .filter(|e| origin.map(|o| e.value().origin == o).unwrap_or(true))
            .map(|e| e.value().clone())
            .collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all.truncate(limit);
        Ok(all)
    }

    async fn search_bm25(&self, _query_terms: &[String], _limit: usize) -> StorageResult<Vec<Bm25Hit>> {
        Ok(Vec::new())
    }

    async fn search_vector(&self, embedding: &[f32], limit: usize) -> StorageResult<Vec<VectorHit>> {
        let mut hits: Vec<VectorHit> = self
            .docs
            .iter()
            .filter_map(|e| {
                e.value().embedding.as_ref().map(|emb| VectorHit {
                    doc_id: e.value().id,
                    similarity: cosine(embedding, emb),
                })
            })
            .collect();
        hits.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap());
        hits.truncate(limit);
        Ok(hits)
    }

    async fn delete_from_index(&self, id: DocId) -> StorageResult<bool> {
        Ok(self.docs.remove(&id.0).is_some())
    }

    async fn execute_read_only_sql(&self, _sql: &str, _params: &[Value]) -> StorageResult<SqlQueryResult> {
        Err(StorageError::Unavailable(
            "read-only SQL surface requires the SQLite backend".to_string(),
        ))
    }

    async fn upsert_session(&self, session: &Session) -> StorageResult<()> {
        self.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn get_session(&self, id: SessionId) -> StorageResult<Option<Session>> {
        Ok(self.sessions.get(&id).map(|s| s.clone()))
    }

    async fn touch_session(&self, id: SessionId, resume_cursor: i64) -> StorageResult<()> {
        if let Some(mut s) = self.sessions.get_mut(&id) {
            s.last_seen_at = Utc::now();
            s.sse_resume_cursor = resume_cursor;
        }
        Ok(())
    }

    async fn delete_session(&self, id: SessionId) -> StorageResult<bool> {
        Ok(self.sessions.remove(&id).is_some())
    }

    fn is_degraded(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_round_trip() {
        let gw = InMemoryStorageGateway::new();
        let mut report = Report {
            id: ReportId(0),
            query: "q".into(),
            created_at: Utc::now(),
            output_markdown: "# hi".into(),
            sources: Vec::new(),
            metadata: Default::default(),
            embedding: Some(vec![1.0, 0.0]),
        };
        let id = gw.upsert_report(&report).await.unwrap();
        report.id = id;
        let fetched = gw.get_report(id).await.unwrap().unwrap();
        assert_eq!(fetched.query, "q");
    }

    #[tokio::test]
    async fn claim_next_job_prevents_double_claim() {
        let gw = InMemoryStorageGateway::new();
        let job = Job::new("research", serde_json::json!({}), "k".into());
        gw.create_job(&job).await.unwrap();
        let lease = Utc::now() + chrono::Duration::seconds(30);
        let a = gw.claim_next_job("w1", lease).await.unwrap();
        let b = gw.claim_next_job("w2", lease).await.unwrap();
        assert!(a.is_some());
        assert!(b.is_none());
    }
}
