//! Key/value snapshot persistence.
//!
//! The transcript and the daily stats are each stored whole, as one JSON
//! document under a fixed key, and rewritten on every change.

pub mod memory;
pub mod sqlite;

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

use crate::error::{Result, TutorError};

/// Key of the transcript snapshot.
pub const HISTORY_KEY: &str = "linguist_ai_final_history";

/// Key of the daily stats snapshot.
pub const STATS_KEY: &str = "linguist_ai_final_stats";

/// Durable string storage addressed by key.
pub trait SnapshotStore: Send {
    fn load(&self, key: &str) -> Result<Option<String>>;
    fn save(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Read and decode a snapshot. Missing, unreadable, or malformed snapshots
/// all come back as `None`; the last two are logged.
pub fn load_snapshot<T: DeserializeOwned>(store: &dyn SnapshotStore, key: &str) -> Option<T> {
    let raw = match store.load(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(e) => {
            tracing::warn!(key, error = %e, "Failed to read snapshot, using defaults");
            return None;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(key, error = %e, "Discarding malformed snapshot");
            None
        }
    }
}

/// Encode and write a snapshot, logging instead of failing.
pub fn save_snapshot<T: Serialize>(store: &dyn SnapshotStore, key: &str, value: &T) -> bool {
    let result = serde_json::to_string(value)
        .map_err(|e| TutorError::Persistence(e.to_string()))
        .and_then(|json| store.save(key, &json));
    match result {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(key, error = %e, "Failed to write snapshot");
            false
        }
    }
}

/// Open the SQLite store under `data_dir`, falling back to an in-memory
/// store when the directory or database is unusable.
pub fn open_snapshot_store(data_dir: anyhow::Result<&Path>) -> Box<dyn SnapshotStore> {
    match data_dir.and_then(SqliteSnapshotStore::open) {
        Ok(store) => Box::new(store),
        Err(e) => {
            tracing::warn!(error = %format!("{e:#}"), "Snapshot store unavailable, history will not be saved");
            Box::new(MemoryStore::new())
        }
    }
}

pub use memory::MemoryStore;
pub use sqlite::SqliteSnapshotStore;
