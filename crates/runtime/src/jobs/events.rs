//! Per-job event fan-out for SSE/WS consumers (§4.5, §4.8).
//!
//! Live subscribers get a `tokio::sync::broadcast` channel; durable replay
//! (e.g. `Last-Event-ID` resumption) goes through `StorageGateway::get_job_events`
//! instead of this bus, since broadcast channels don't buffer past their
//! capacity once a receiver falls behind.

use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::types::{JobEvent, JobId};

const CHANNEL_CAPACITY: usize = 256;

pub struct JobEventBus {
    channels: DashMap<JobId, broadcast::Sender<JobEvent>>,
}

impl Default for JobEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl JobEventBus {
    pub fn new() -> Self {
        Self { channels: DashMap::new() }
    }

    pub fn subscribe(&self, job_id: JobId) -> broadcast::Receiver<JobEvent> {
        self.channels
            .entry(job_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publishes to any live subscribers. A send with no receivers is not an
    /// error: the durable log in storage is the source of truth.
    pub fn publish(&self, event: JobEvent) {
        if let Some(sender) = self.channels.get(&event.job_id) {
            let _ = sender.send(event);
        }
    }

    /// Drops the channel once a job reaches a terminal state and all
    /// subscribers have disconnected, so the map doesn't grow unboundedly.
    pub fn retire(&self, job_id: JobId) {
        if let Some(entry) = self.channels.get(&job_id) {
            if entry.receiver_count() == 0 {
                drop(entry);
                self.channels.remove(&job_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::types::JobEventType;

    fn event(job_id: JobId, seq: i64) -> JobEvent {
        JobEvent {
            seq,
            job_id,
            event_type: JobEventType::Progress,
            payload: serde_json::json!({}),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = JobEventBus::new();
        let job_id = JobId::new();
        let mut rx = bus.subscribe(job_id);
        bus.publish(event(job_id, 1));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.seq, 1);
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_error() {
        let bus = JobEventBus::new();
        bus.publish(event(JobId::new(), 1));
    }

    #[tokio::test]
    async fn retire_removes_channel_once_unsubscribed() {
        let bus = JobEventBus::new();
        let job_id = JobId::new();
        let rx = bus.subscribe(job_id);
        drop(rx);
        bus.retire(job_id);
        assert_eq!(bus.channels.len(), 0);
    }
}
