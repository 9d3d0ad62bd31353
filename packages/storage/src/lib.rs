// ABOUTME: Persistence collaborator for Codedock runtime and session records
// ABOUTME: Opaque keyed document store with SQLite and in-memory backends

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Collection holding environment records.
pub const ENVIRONMENTS: &str = "environments";

/// Collection holding collaboration session records.
pub const SESSIONS: &str = "sessions";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Opaque record store keyed by (collection, id).
///
/// The runtime treats persistence as an external collaborator: records go in
/// and come out as JSON documents, `upsert` overwrites, `delete` is
/// idempotent. Backends only need these four operations.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert or overwrite the record stored under (collection, id).
    async fn upsert(&self, collection: &str, id: &str, record: JsonValue) -> Result<()>;

    /// Fetch a record, or `None` if the id is unknown.
    async fn get(&self, collection: &str, id: &str) -> Result<Option<JsonValue>>;

    /// Remove a record. Deleting an unknown id is not an error.
    async fn delete(&self, collection: &str, id: &str) -> Result<()>;

    /// All records in a collection, in unspecified order.
    async fn list(&self, collection: &str) -> Result<Vec<JsonValue>>;
}
