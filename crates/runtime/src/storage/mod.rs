//! Storage Gateway (C1): typed façade over embedded SQL + vector storage.

pub mod gateway;
pub mod memory;
pub mod sqlite;

pub use gateway::*;
pub use memory::InMemoryStorageGateway;
pub use sqlite::SqliteStorageGateway;

use std::path::Path;
use std::sync::Arc;

/// Opens the SQLite-backed gateway at `path`, falling back to an in-memory
/// gateway (reported as degraded) if the file cannot be opened.
pub fn open_with_fallback(path: &Path) -> (Arc<dyn StorageGateway>, bool) {
    match SqliteStorageGateway::open(path) {
        Ok(gw) => (Arc::new(gw), false),
        Err(err) => {
            tracing::warn!(error = %err, path = %path.display(), "falling back to in-memory storage gateway");
            (Arc::new(InMemoryStorageGateway::new()), true)
        }
    }
}
