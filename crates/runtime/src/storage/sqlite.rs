//! Default `StorageGateway` implementation backed by SQLite.
//!
//! Grounded on the scheduler's SQLite job store idiom: a single
//! `tokio::sync::Mutex<rusqlite::Connection>`, WAL mode, schema created
//! eagerly on open. Vector similarity is brute-force cosine over BLOB-encoded
//! `Vec<f32>` columns — fine at the scale of a single-tenant research
//! archive, and keeps the embedded store pluggable behind the trait.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use std::path::Path;

use crate::types::{
    ClientInfo, DocId, DocOrigin, IndexDocument, Job, JobEvent, JobEventType, JobId, JobStatus,
    NegotiatedCapabilities, Report, ReportId, ReportMetadata, Session, SessionId, SourceRef,
    StorageError, TransportKind,
};

use super::gateway::{Bm25Hit, SimilarReport, SqlQueryResult, StorageGateway, StorageResult, VectorHit};

pub struct SqliteStorageGateway {
    conn: tokio::sync::Mutex<Connection>,
}

impl SqliteStorageGateway {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StorageError::Unavailable(format!("create dir: {e}")))?;
            }
        }
        let conn =
            Connection::open(path).map_err(|e| StorageError::Unavailable(e.to_string()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: tokio::sync::Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: tokio::sync::Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), StorageError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS reports (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                query        TEXT NOT NULL,
                created_at   TEXT NOT NULL,
                output_md    TEXT NOT NULL,
                sources_json TEXT NOT NULL,
                metadata_json TEXT NOT NULL,
                embedding    BLOB
            );

            CREATE TABLE IF NOT EXISTS jobs (
                id               TEXT PRIMARY KEY,
                job_type         TEXT NOT NULL,
                params_json      TEXT NOT NULL,
                status           TEXT NOT NULL,
                created_at       TEXT NOT NULL,
                updated_at       TEXT NOT NULL,
                heartbeat_at     TEXT,
                idempotency_key  TEXT NOT NULL,
                idempotency_expires_at TEXT,
                result_json      TEXT,
                retry_of         TEXT,
                lease_owner      TEXT,
                attempt          INTEGER NOT NULL DEFAULT 0,
                notify_url       TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_status_created ON jobs(status, created_at);
            CREATE INDEX IF NOT EXISTS idx_jobs_idempotency ON jobs(idempotency_key);

            CREATE TABLE IF NOT EXISTS job_events (
                job_id     TEXT NOT NULL,
                seq        INTEGER NOT NULL,
                event_type TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (job_id, seq)
            );

            CREATE TABLE IF NOT EXISTS index_documents (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                origin       TEXT NOT NULL,
                title        TEXT NOT NULL,
                body         TEXT NOT NULL,
                term_freqs_json TEXT NOT NULL,
                doc_length   INTEGER NOT NULL,
                embedding    BLOB,
                created_at   TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                id            TEXT PRIMARY KEY,
                transport     TEXT NOT NULL,
                protocol_version TEXT,
                created_at    TEXT NOT NULL,
                last_seen_at  TEXT NOT NULL,
                client_info_json TEXT,
                capabilities_json TEXT NOT NULL,
                initialized   INTEGER NOT NULL DEFAULT 0,
                resume_cursor INTEGER NOT NULL DEFAULT 0,
                extra_json    TEXT
            );",
        )
        .map_err(|e| StorageError::SchemaMismatch(e.to_string()))?;
        Ok(())
    }
}

fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc.timestamp_opt(0, 0).unwrap())
}

fn encode_embedding(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for x in v {
        out.extend_from_slice(&x.to_le_bytes());
    }
    out
}

fn decode_embedding(b: &[u8]) -> Vec<f32> {
    b.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
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

fn row_to_report(row: &Row) -> rusqlite::Result<Report> {
    let sources_json: String = row.get("sources_json")?;
    let metadata_json: String = row.get("metadata_json")?;
    let embedding: Option<Vec<u8>> = row.get("embedding")?;
    Ok(Report {
        id: ReportId(row.get("id")?),
        query: row.get("query")?,
        created_at: parse_ts(&row.get::<_, String>("created_at")?),
        output_markdown: row.get("output_md")?,
        sources: serde_json::from_str::<Vec<SourceRef>>(&sources_json).unwrap_or_default(),
        metadata: serde_json::from_str::<ReportMetadata>(&metadata_json).unwrap_or_default(),
        embedding: embedding.map(|b| decode_embedding(&b)),
    })
}

fn row_to_job(row: &Row) -> rusqlite::Result<Job> {
    let id: String = row.get("id")?;
    let params_json: String = row.get("params_json")?;
    let status: String = row.get("status")?;
    let result_json: Option<String> = row.get("result_json")?;
    let retry_of: Option<String> = row.get("retry_of")?;
    let heartbeat_at: Option<String> = row.get("heartbeat_at")?;
    let idem_expires: Option<String> = row.get("idempotency_expires_at")?;
    Ok(Job {
        id: id.parse().unwrap_or_default(),
        job_type: row.get("job_type")?,
        params: serde_json::from_str(&params_json).unwrap_or(Value::Null),
        status: JobStatus::parse(&status).unwrap_or(JobStatus::Failed),
        created_at: parse_ts(&row.get::<_, String>("created_at")?),
        updated_at: parse_ts(&row.get::<_, String>("updated_at")?),
        heartbeat_at: heartbeat_at.map(|s| parse_ts(&s)),
        idempotency_key: row.get("idempotency_key")?,
        idempotency_expires_at: idem_expires.map(|s| parse_ts(&s)),
        result: result_json.and_then(|s| serde_json::from_str(&s).ok()),
        retry_of: retry_of.and_then(|s| s.parse().ok()),
        lease_owner: row.get("lease_owner")?,
        attempt: row.get::<_, i64>("attempt")? as u32,
        notify_url: row.get("notify_url")?,
    })
}

fn row_to_doc(row: &Row) -> rusqlite::Result<IndexDocument> {
    let origin: String = row.get("origin")?;
    let term_freqs_json: String = row.get("term_freqs_json")?;
    let embedding: Option<Vec<u8>> = row.get("embedding")?;
    Ok(IndexDocument {
        id: DocId(row.get("id")?),
        origin: DocOrigin::parse(&origin).unwrap_or(DocOrigin::Text),
        title: row.get("title")?,
        body: row.get("body")?,
        term_frequencies: serde_json::from_str(&term_freqs_json).unwrap_or(Value::Null),
        doc_length: row.get::<_, i64>("doc_length")? as u32,
        embedding: embedding.map(|b| decode_embedding(&b)),
        created_at: parse_ts(&row.get::<_, String>("created_at")?),
    })
}

fn row_to_session(row: &Row) -> rusqlite::Result<Session> {
    let transport: String = row.get("transport")?;
    let client_info_json: Option<String> = row.get("client_info_json")?;
    let caps_json: String = row.get("capabilities_json")?;
    let extra_json: Option<String> = row.get("extra_json")?;
    let id: String = row.get("id")?;
    Ok(Session {
        id: id.parse().unwrap_or_default(),
        transport: match transport.as_str() {
            "stdio" => TransportKind::Stdio,
            "websocket" => TransportKind::WebSocket,
            "legacy_sse" => TransportKind::LegacySse,
            _ => TransportKind::StreamableHttp,
        },
        protocol_version: row.get("protocol_version")?,
        created_at: parse_ts(&row.get::<_, String>("created_at")?),
        last_seen_at: parse_ts(&row.get::<_, String>("last_seen_at")?),
        client_info: client_info_json.and_then(|s| serde_json::from_str::<ClientInfo>(&s).ok()),
        capabilities: serde_json::from_str::<NegotiatedCapabilities>(&caps_json)
            .unwrap_or_default(),
        initialized: row.get::<_, i64>("initialized")? != 0,
        sse_resume_cursor: row.get("resume_cursor")?,
        extra: extra_json
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or(Value::Null),
    })
}

#[async_trait]
impl StorageGateway for SqliteStorageGateway {
    async fn upsert_report(&self, report: &Report) -> StorageResult<ReportId> {
        let conn = self.conn.lock().await;
        let sources_json = serde_json::to_string(&report.sources)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let metadata_json = serde_json::to_string(&report.metadata)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let embedding = report.embedding.as_deref().map(encode_embedding);

        if report.id.0 != 0 {
            conn.execute(
                "UPDATE reports SET query=?2, output_md=?3, sources_json=?4, metadata_json=?5, embedding=?6 WHERE id=?1",
                params![
                    report.id.0,
                    report.query,
                    report.output_markdown,
                    sources_json,
                    metadata_json,
                    embedding,
                ],
            )
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
            Ok(report.id)
        } else {
            conn.execute(
                "INSERT INTO reports (query, created_at, output_md, sources_json, metadata_json, embedding)
                 VALUES (?1,?2,?3,?4,?5,?6)",
                params![
                    report.query,
                    ts(report.created_at),
                    report.output_markdown,
                    sources_json,
                    metadata_json,
                    embedding,
                ],
            )
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
            Ok(ReportId(conn.last_insert_rowid()))
        }
    }

    async fn get_report(&self, id: ReportId) -> StorageResult<Option<Report>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT id, query, created_at, output_md, sources_json, metadata_json, embedding FROM reports WHERE id=?1",
            params![id.0],
            row_to_report,
        )
        .optional()
        .map_err(|e| StorageError::Unavailable(e.to_string()))
    }

    async fn list_recent_reports(&self, limit: usize) -> StorageResult<Vec<Report>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT id, query, created_at, output_md, sources_json, metadata_json, embedding
                 FROM reports ORDER BY created_at DESC LIMIT ?1",
            )
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        let rows = stmt
            .query_map(params![limit as i64], row_to_report)
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::Unavailable(e.to_string()))
    }

    async fn find_reports_by_similarity(
        &self,
        embedding: &[f32],
        top_k: usize,
        min_sim: f32,
    ) -> StorageResult<Vec<SimilarReport>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT id, query, created_at, output_md, sources_json, metadata_json, embedding
                 FROM reports WHERE embedding IS NOT NULL",
            )
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        let rows = stmt
            .query_map([], row_to_report)
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        let mut scored: Vec<SimilarReport> = Vec::new();
        for r in rows {
            let report = r.map_err(|e| StorageError::Unavailable(e.to_string()))?;
            if let Some(e) = &report.embedding {
                let sim = cosine(embedding, e);
                if sim >= min_sim {
                    scored.push(SimilarReport {
                        report,
                        similarity: sim,
                    });
                }
            }
        }
        scored.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap());
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn create_job(&self, job: &Job) -> StorageResult<()> {
        let conn = self.conn.lock().await;
        let params_json = serde_json::to_string(&job.params)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        conn.execute(
            "INSERT INTO jobs (id, job_type, params_json, status, created_at, updated_at,
                heartbeat_at, idempotency_key, idempotency_expires_at, result_json, retry_of,
                lease_owner, attempt, notify_url)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)",
            params![
                job.id.to_string(),
                job.job_type,
                params_json,
                job.status.as_str(),
                ts(job.created_at),
                ts(job.updated_at),
                job.heartbeat_at.map(ts),
                job.idempotency_key,
                job.idempotency_expires_at.map(ts),
                job.result.as_ref().map(|v| v.to_string()),
                job.retry_of.map(|j| j.to_string()),
                job.lease_owner,
                job.attempt as i64,
                job.notify_url,
            ],
        )
        .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn get_job(&self, id: JobId) -> StorageResult<Option<Job>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT * FROM jobs WHERE id=?1",
            params![id.to_string()],
            row_to_job,
        )
        .optional()
        .map_err(|e| StorageError::Unavailable(e.to_string()))
    }

    async fn find_active_job_by_idempotency_key(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<Option<Job>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT * FROM jobs WHERE idempotency_key=?1
                 AND (idempotency_expires_at IS NULL OR idempotency_expires_at > ?2)
                 ORDER BY created_at DESC",
            )
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        let rows = stmt
            .query_map(params![key, ts(now)], row_to_job)
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        for r in rows {
            let job = r.map_err(|e| StorageError::Unavailable(e.to_string()))?;
            if !job.status.is_terminal() || job.status == JobStatus::Succeeded {
                return Ok(Some(job));
            }
        }
        Ok(None)
    }

    async fn find_latest_job_by_idempotency_key(&self, key: &str) -> StorageResult<Option<Job>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT * FROM jobs WHERE idempotency_key=?1 ORDER BY created_at DESC LIMIT 1",
            params![key],
            row_to_job,
        )
        .optional()
        .map_err(|e| StorageError::Unavailable(e.to_string()))
    }

    async fn claim_next_job(
        &self,
        worker_id: &str,
        lease_until: DateTime<Utc>,
    ) -> StorageResult<Option<Job>> {
        let conn = self.conn.lock().await;
        let id: Option<String> = conn
            .query_row(
                "SELECT id FROM jobs WHERE status='queued' ORDER BY created_at ASC LIMIT 1",
                [],
                |r| r.get(0),
            )
            .optional()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        let Some(id) = id else {
            return Ok(None);
        };
        let now = ts(Utc::now());
        let updated = conn
            .execute(
                "UPDATE jobs SET status='running', updated_at=?2, heartbeat_at=?2,
                    lease_owner=?3, idempotency_expires_at=?4, attempt=attempt+1
                 WHERE id=?1 AND status='queued'",
                params![id, now, worker_id, ts(lease_until)],
            )
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        if updated == 0 {
            // Lost the race to another worker.
            return Ok(None);
        }
        conn.query_row("SELECT * FROM jobs WHERE id=?1", params![id], row_to_job)
            .optional()
            .map_err(|e| StorageError::Unavailable(e.to_string()))
    }

    async fn set_job_status(
        &self,
        id: JobId,
        status: JobStatus,
        result: Option<Value>,
    ) -> StorageResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE jobs SET status=?2, updated_at=?3, result_json=?4 WHERE id=?1",
            params![
                id.to_string(),
                status.as_str(),
                ts(Utc::now()),
                result.map(|v| v.to_string()),
            ],
        )
        .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn heartbeat_job(
        &self,
        id: JobId,
        worker_id: &str,
        lease_until: DateTime<Utc>,
        idempotency_expires_at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let conn = self.conn.lock().await;
        let updated = conn
            .execute(
                "UPDATE jobs SET heartbeat_at=?2, updated_at=?2, idempotency_expires_at=?4
                 WHERE id=?1 AND lease_owner=?3 AND status='running'",
                params![id.to_string(), ts(Utc::now()), worker_id, ts(idempotency_expires_at)],
            )
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        let _ = lease_until;
        Ok(updated > 0)
    }

    async fn cancel_job(&self, id: JobId) -> StorageResult<bool> {
        let conn = self.conn.lock().await;
        let updated = conn
            .execute(
                "UPDATE jobs SET status='canceled', updated_at=?2
                 WHERE id=?1 AND status NOT IN ('succeeded','failed','canceled')",
                params![id.to_string(), ts(Utc::now())],
            )
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        Ok(updated > 0)
    }

    async fn reclaim_stale_leases(&self, now: DateTime<Utc>) -> StorageResult<Vec<JobId>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT id FROM jobs WHERE status='running' AND heartbeat_at < ?1",
            )
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        let ids: Vec<String> = stmt
            .query_map(params![ts(now)], |r| r.get(0))
            .map_err(|e| StorageError::Unavailable(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        for id in &ids {
            conn.execute(
                "UPDATE jobs SET status='queued', lease_owner=NULL, updated_at=?2 WHERE id=?1",
                params![id, ts(now)],
            )
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        }
        Ok(ids.into_iter().filter_map(|s| s.parse().ok()).collect())
    }

    async fn append_job_event(
        &self,
        job_id: JobId,
        event_type: JobEventType,
        payload: Value,
    ) -> StorageResult<JobEvent> {
        let conn = self.conn.lock().await;
        let next_seq: i64 = conn
            .query_row(
                "SELECT COALESCE(MAX(seq), 0) + 1 FROM job_events WHERE job_id=?1",
                params![job_id.to_string()],
                |r| r.get(0),
            )
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        let created_at = Utc::now();
        conn.execute(
            "INSERT INTO job_events (job_id, seq, event_type, payload_json, created_at)
             VALUES (?1,?2,?3,?4,?5)",
            params![
                job_id.to_string(),
                next_seq,
                event_type.as_str(),
                payload.to_string(),
                ts(created_at),
            ],
        )
        .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        Ok(JobEvent {
            seq: next_seq,
            job_id,
            event_type,
            payload,
            created_at,
        })
    }

    async fn get_job_events(
        &self,
        job_id: JobId,
        since_event_id: i64,
        limit: usize,
    ) -> StorageResult<Vec<JobEvent>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT seq, event_type, payload_json, created_at FROM job_events
                 WHERE job_id=?1 AND seq > ?2 ORDER BY seq ASC LIMIT ?3",
            )
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        let rows = stmt
            .query_map(params![job_id.to_string(), since_event_id, limit as i64], |row| {
                let event_type: String = row.get(1)?;
                let payload_json: String = row.get(2)?;
                let created_at: String = row.get(3)?;
                Ok((row.get::<_, i64>(0)?, event_type, payload_json, created_at))
            })
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        let mut out = Vec::new();
        for r in rows {
            let (seq, event_type, payload_json, created_at) =
                r.map_err(|e| StorageError::Unavailable(e.to_string()))?;
            out.push(JobEvent {
                seq,
                job_id,
                event_type: parse_event_type(&event_type),
                payload: serde_json::from_str(&payload_json).unwrap_or(Value::Null),
                created_at: parse_ts(&created_at),
            });
        }
        Ok(out)
    }

    async fn index_document(&self, doc: &IndexDocument) -> StorageResult<DocId> {
        let conn = self.conn.lock().await;
        let term_freqs_json = doc.term_frequencies.to_string();
        let embedding = doc.embedding.as_deref().map(encode_embedding);
        conn.execute(
            "INSERT INTO index_documents (origin, title, body, term_freqs_json, doc_length, embedding, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7)",
            params![
                doc.origin.as_str(),
                doc.title,
                doc.body,
                term_freqs_json,
                doc.doc_length,
                embedding,
                ts(doc.created_at),
            ],
        )
        .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        Ok(DocId(conn.last_insert_rowid()))
    }

    async fn get_index_document(&self, id: DocId) -> StorageResult<Option<IndexDocument>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT id, origin, title, body, term_freqs_json, doc_length, embedding, created_at
             FROM index_documents WHERE id=?1",
            params![id.0],
            row_to_doc,
        )
        .optional()
        .map_err(|e| StorageError::Unavailable(e.to_string()))
    }

    async fn list_index_documents(
        &self,
        origin: Option<DocOrigin>,
        limit: usize,
    ) -> StorageResult<Vec<IndexDocument>> {
        let conn = self.conn.lock().await;
        let (sql, has_origin) = match origin {
            Some(_) => (
                "SELECT id, origin, title, body, term_freqs_json, doc_length, embedding, created_at
                 FROM index_documents WHERE origin=?1 ORDER BY created_at DESC LIMIT ?2",
                true,
            ),
            None => (
                "SELECT id, origin, title, body, term_freqs_json, doc_length, embedding, created_at
                 FROM index_documents ORDER BY created_at DESC LIMIT ?1",
                false,
            ),
        };
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        let rows = if has_origin {
            stmt.query_map(params![origin.unwrap().as_str(), limit as i64], row_to_doc)
        } else {
            stmt.query_map(params![limit as i64], row_to_doc)
        }
        .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::Unavailable(e.to_string()))
    }

    async fn search_bm25(&self, query_terms: &[String], limit: usize) -> StorageResult<Vec<Bm25Hit>> {
        // BM25 scoring itself lives in the retrieval module, which pulls
        // documents via `list_index_documents` and scores in-process; this
        // path exists to satisfy the trait for backends that can push the
        // scoring down into SQL (e.g. FTS5). The default implementation
        // returns an empty set and lets the caller fall back.
        let _ = (query_terms, limit);
        Ok(Vec::new())
    }

    async fn search_vector(&self, embedding: &[f32], limit: usize) -> StorageResult<Vec<VectorHit>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT id, embedding FROM index_documents WHERE embedding IS NOT NULL")
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| {
                let id: i64 = row.get(0)?;
                let emb: Vec<u8> = row.get(1)?;
                Ok((id, emb))
            })
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        let mut hits = Vec::new();
        for r in rows {
            let (id, emb) = r.map_err(|e| StorageError::Unavailable(e.to_string()))?;
            let sim = cosine(embedding, &decode_embedding(&emb));
            hits.push(VectorHit {
                doc_id: DocId(id),
                similarity: sim,
            });
        }
        hits.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap());
        hits.truncate(limit);
        Ok(hits)
    }

    async fn delete_from_index(&self, id: DocId) -> StorageResult<bool> {
        let conn = self.conn.lock().await;
        let deleted = conn
            .execute("DELETE FROM index_documents WHERE id=?1", params![id.0])
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        Ok(deleted > 0)
    }

    async fn execute_read_only_sql(&self, sql: &str, sql_params: &[Value]) -> StorageResult<SqlQueryResult> {
        let trimmed = sql.trim_start();
        let leading = trimmed
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_ascii_uppercase();
        if !matches!(leading.as_str(), "SELECT" | "WITH" | "EXPLAIN") {
            return Err(StorageError::SqlRejected(format!(
                "statement must begin with SELECT/WITH/EXPLAIN, got '{leading}'"
            )));
        }

        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| StorageError::SqlRejected(e.to_string()))?;
        let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let bound: Vec<Box<dyn rusqlite::ToSql>> = sql_params
            .iter()
            .map(|v| value_to_sql(v))
            .collect();
        let bound_refs: Vec<&dyn rusqlite::ToSql> = bound.iter().map(|b| b.as_ref()).collect();

        let mut rows = stmt
            .query(bound_refs.as_slice())
            .map_err(|e| StorageError::SqlRejected(e.to_string()))?;
        let mut out_rows = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|e| StorageError::SqlRejected(e.to_string()))?
        {
            let mut out_row = Vec::with_capacity(columns.len());
            for i in 0..columns.len() {
                out_row.push(sqlite_value_to_json(row, i));
            }
            out_rows.push(out_row);
        }
        Ok(SqlQueryResult {
            columns,
            rows: out_rows,
        })
    }

    async fn upsert_session(&self, session: &Session) -> StorageResult<()> {
        let conn = self.conn.lock().await;
        let client_info_json = session
            .client_info
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let caps_json = serde_json::to_string(&session.capabilities)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        conn.execute(
            "INSERT OR REPLACE INTO sessions (id, transport, protocol_version, created_at,
                last_seen_at, client_info_json, capabilities_json, initialized, resume_cursor, extra_json)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
            params![
                session.id.to_string(),
                session.transport.as_str(),
                session.protocol_version,
                ts(session.created_at),
                ts(session.last_seen_at),
                client_info_json,
                caps_json,
                session.initialized as i64,
                session.sse_resume_cursor,
                session.extra.to_string(),
            ],
        )
        .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn get_session(&self, id: SessionId) -> StorageResult<Option<Session>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT * FROM sessions WHERE id=?1",
            params![id.to_string()],
            row_to_session,
        )
        .optional()
        .map_err(|e| StorageError::Unavailable(e.to_string()))
    }

    async fn touch_session(&self, id: SessionId, resume_cursor: i64) -> StorageResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE sessions SET last_seen_at=?2, resume_cursor=?3 WHERE id=?1",
            params![id.to_string(), ts(Utc::now()), resume_cursor],
        )
        .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn delete_session(&self, id: SessionId) -> StorageResult<bool> {
        let conn = self.conn.lock().await;
        let deleted = conn
            .execute("DELETE FROM sessions WHERE id=?1", params![id.to_string()])
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        Ok(deleted > 0)
    }
}

fn parse_event_type(s: &str) -> JobEventType {
    match s {
        "submitted" => JobEventType::Submitted,
        "started" => JobEventType::Started,
        "progress" => JobEventType::Progress,
        "plan_complete" => JobEventType::PlanComplete,
        "agent_started" => JobEventType::AgentStarted,
        "agent_completed" => JobEventType::AgentCompleted,
        "agent_usage" => JobEventType::AgentUsage,
        "synthesis_started" => JobEventType::SynthesisStarted,
        "synthesis_token" => JobEventType::SynthesisToken,
        "synthesis_error" => JobEventType::SynthesisError,
        "report_saved" => JobEventType::ReportSaved,
        "error" => JobEventType::Error,
        "canceled" => JobEventType::Canceled,
        _ => JobEventType::Completed,
    }
}

fn value_to_sql(v: &Value) -> Box<dyn rusqlite::ToSql> {
    match v {
        Value::Null => Box::new(Option::<String>::None),
        Value::Bool(b) => Box::new(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Box::new(i)
            } else {
                Box::new(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => Box::new(s.clone()),
        other => Box::new(other.to_string()),
    }
}

fn sqlite_value_to_json(row: &Row, idx: usize) -> Value {
    use rusqlite::types::ValueRef;
    match row.get_ref(idx) {
        Ok(ValueRef::Null) => Value::Null,
        Ok(ValueRef::Integer(i)) => Value::Number(i.into()),
        Ok(ValueRef::Real(f)) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Ok(ValueRef::Text(t)) => Value::String(String::from_utf8_lossy(t).to_string()),
        Ok(ValueRef::Blob(b)) => {
            use base64::Engine;
            Value::String(base64::engine::general_purpose::STANDARD.encode(b))
        }
        Err(_) => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobStatus;

    fn gateway() -> SqliteStorageGateway {
        SqliteStorageGateway::open_in_memory().unwrap()
    }

    #[tokio::test]
    async fn claim_next_job_is_fifo_and_exclusive() {
        let gw = gateway();
        let j1 = Job::new("research", serde_json::json!({"query": "a"}), "k1".into());
        let j2 = Job::new("research", serde_json::json!({"query": "b"}), "k2".into());
        gw.create_job(&j1).await.unwrap();
        gw.create_job(&j2).await.unwrap();

        let lease = Utc::now() + chrono::Duration::seconds(30);
        let claimed = gw.claim_next_job("worker-1", lease).await.unwrap().unwrap();
        assert_eq!(claimed.id, j1.id);
        assert_eq!(claimed.status, JobStatus::Running);

        // second claim should not see job 1 again.
        let claimed2 = gw.claim_next_job("worker-2", lease).await.unwrap().unwrap();
        assert_eq!(claimed2.id, j2.id);
    }

    #[tokio::test]
    async fn execute_read_only_sql_rejects_mutations() {
        let gw = gateway();
        let err = gw
            .execute_read_only_sql("DROP TABLE reports", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::SqlRejected(_)));
    }

    #[tokio::test]
    async fn append_job_event_is_monotonic_per_job() {
        let gw = gateway();
        let job = Job::new("research", serde_json::json!({}), "k3".into());
        gw.create_job(&job).await.unwrap();
        let e1 = gw
            .append_job_event(job.id, JobEventType::Submitted, serde_json::json!({}))
            .await
            .unwrap();
        let e2 = gw
            .append_job_event(job.id, JobEventType::Started, serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(e1.seq, 1);
        assert_eq!(e2.seq, 2);
    }
}
