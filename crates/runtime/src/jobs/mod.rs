//! Job Engine (C5): durable async job queue with idempotency, leases, and
//! event fan-out.

pub mod engine;
pub mod events;
pub mod idempotency;
pub mod webhook;
pub mod worker;

pub use engine::{JobEngine, SubmitOutcome};
pub use events::JobEventBus;
pub use idempotency::canonical_hash;
pub use worker::JobWorker;
