//! Durable Step Storage
//!
//! The contract the persistence worker writes through and the sync
//! coordinator reads back through, plus the two implementations that ship:
//!
//! - [`SqliteStore`] - SQLite via sqlx, the production store. Steps live in a
//!   `steps` table keyed on `(document_id, version)`, so re-inserting an
//!   already-durable version is a no-op and the worker's retries stay
//!   idempotent.
//! - [`MemoryStore`] - in-process fallback used in tests and when no
//!   `DATABASE_URL` is configured. Same idempotency contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::Mutex;
use thiserror::Error;

use crate::shared::error::SyncError;
use crate::shared::step::StepRecord;

/// Errors from the durable store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying database failure
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row could not be decoded back into a step
    #[error("corrupt stored step: {message}")]
    Corrupt { message: String },
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        SyncError::durability(err.to_string())
    }
}

/// A document's durably stored head: its version counter and content
/// snapshot.
#[derive(Debug, Clone)]
pub struct PersistedDocument {
    pub version: u64,
    pub content: Value,
}

/// Durable storage consumed by the persistence worker and, for history older
/// than the in-memory window, by the sync coordinator.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Batch-write steps. Must be idempotent: re-inserting a version that is
    /// already stored must not duplicate it.
    async fn insert_steps(&self, document_id: &str, steps: &[StepRecord]) -> Result<(), StoreError>;

    /// Record the document's current version and content snapshot.
    async fn upsert_document(
        &self,
        document_id: &str,
        version: u64,
        content: &Value,
    ) -> Result<(), StoreError>;

    /// Load a document's stored head, if it has ever been persisted.
    async fn load_document(&self, document_id: &str) -> Result<Option<PersistedDocument>, StoreError>;

    /// Load stored steps with `version > from_version`, ascending.
    async fn load_steps_since(
        &self,
        document_id: &str,
        from_version: u64,
    ) -> Result<Vec<StepRecord>, StoreError>;
}

/// SQLite-backed durable store.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to a SQLite database, creating the file and schema on first
    /// use. Uses WAL mode for concurrency, like every other store in the app.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        sqlx::query("PRAGMA journal_mode=WAL").execute(&pool).await?;
        sqlx::query("PRAGMA synchronous=NORMAL").execute(&pool).await?;
        sqlx::query("PRAGMA foreign_keys=ON").execute(&pool).await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Single-connection in-memory database, for tests.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // One connection only: each SQLite in-memory connection is its own
        // database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS steps (
                document_id TEXT NOT NULL,
                version INTEGER NOT NULL,
                payload TEXT NOT NULL,
                client_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (document_id, version)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS documents (
                document_id TEXT PRIMARY KEY,
                version INTEGER NOT NULL,
                content TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl DurableStore for SqliteStore {
    async fn insert_steps(&self, document_id: &str, steps: &[StepRecord]) -> Result<(), StoreError> {
        if steps.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for step in steps {
            let payload = serde_json::to_string(&step.payload).map_err(|e| StoreError::Corrupt {
                message: format!("unserializable payload: {e}"),
            })?;
            sqlx::query(
                "INSERT OR IGNORE INTO steps
                    (document_id, version, payload, client_id, created_at)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(document_id)
            .bind(step.version as i64)
            .bind(payload)
            .bind(&step.client_id)
            .bind(step.timestamp.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn upsert_document(
        &self,
        document_id: &str,
        version: u64,
        content: &Value,
    ) -> Result<(), StoreError> {
        let content = serde_json::to_string(content).map_err(|e| StoreError::Corrupt {
            message: format!("unserializable content: {e}"),
        })?;
        sqlx::query(
            "INSERT INTO documents (document_id, version, content, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(document_id) DO UPDATE SET
                version = excluded.version,
                content = excluded.content,
                updated_at = excluded.updated_at",
        )
        .bind(document_id)
        .bind(version as i64)
        .bind(content)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_document(&self, document_id: &str) -> Result<Option<PersistedDocument>, StoreError> {
        let row = sqlx::query("SELECT version, content FROM documents WHERE document_id = ?")
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let version: i64 = row.get("version");
        let content: String = row.get("content");
        let content = serde_json::from_str(&content).map_err(|e| StoreError::Corrupt {
            message: format!("stored content is not valid JSON: {e}"),
        })?;
        Ok(Some(PersistedDocument {
            version: version as u64,
            content,
        }))
    }

    async fn load_steps_since(
        &self,
        document_id: &str,
        from_version: u64,
    ) -> Result<Vec<StepRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT version, payload, client_id, created_at
             FROM steps
             WHERE document_id = ? AND version > ?
             ORDER BY version ASC",
        )
        .bind(document_id)
        .bind(from_version as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut steps = Vec::with_capacity(rows.len());
        for row in rows {
            let version: i64 = row.get("version");
            let payload: String = row.get("payload");
            let client_id: String = row.get("client_id");
            let created_at: String = row.get("created_at");

            let payload = serde_json::from_str(&payload).map_err(|e| StoreError::Corrupt {
                message: format!("stored payload is not valid JSON: {e}"),
            })?;
            let timestamp = DateTime::parse_from_rfc3339(&created_at)
                .map_err(|e| StoreError::Corrupt {
                    message: format!("stored timestamp is not RFC3339: {e}"),
                })?
                .with_timezone(&Utc);

            steps.push(StepRecord {
                version: version as u64,
                payload,
                client_id,
                timestamp,
                durable: true,
            });
        }
        Ok(steps)
    }
}

#[derive(Debug, Default)]
struct MemoryDocument {
    version: u64,
    content: Value,
    steps: BTreeMap<u64, StepRecord>,
}

/// In-process durable store. Used when no database is configured, and in
/// tests where the contract matters more than the medium.
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: Mutex<HashMap<String, MemoryDocument>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn insert_steps(&self, document_id: &str, steps: &[StepRecord]) -> Result<(), StoreError> {
        let mut documents = self.documents.lock().expect("memory store lock poisoned");
        let doc = documents.entry(document_id.to_string()).or_default();
        for step in steps {
            // entry() keeps the first write, matching INSERT OR IGNORE.
            doc.steps.entry(step.version).or_insert_with(|| {
                let mut stored = step.clone();
                stored.durable = true;
                stored
            });
        }
        Ok(())
    }

    async fn upsert_document(
        &self,
        document_id: &str,
        version: u64,
        content: &Value,
    ) -> Result<(), StoreError> {
        let mut documents = self.documents.lock().expect("memory store lock poisoned");
        let doc = documents.entry(document_id.to_string()).or_default();
        doc.version = version;
        doc.content = content.clone();
        Ok(())
    }

    async fn load_document(&self, document_id: &str) -> Result<Option<PersistedDocument>, StoreError> {
        let documents = self.documents.lock().expect("memory store lock poisoned");
        Ok(documents.get(document_id).map(|doc| PersistedDocument {
            version: doc.version,
            content: doc.content.clone(),
        }))
    }

    async fn load_steps_since(
        &self,
        document_id: &str,
        from_version: u64,
    ) -> Result<Vec<StepRecord>, StoreError> {
        let documents = self.documents.lock().expect("memory store lock poisoned");
        Ok(documents
            .get(document_id)
            .map(|doc| {
                doc.steps
                    .range(from_version + 1..)
                    .map(|(_, step)| step.clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(version: u64) -> StepRecord {
        StepRecord::new(version, json!({"stepType": "replace", "slice": {}}), "client-a")
    }

    #[tokio::test]
    async fn test_memory_store_insert_is_idempotent() {
        let store = MemoryStore::new();
        store.insert_steps("doc-1", &[record(1), record(2)]).await.unwrap();
        store.insert_steps("doc-1", &[record(1), record(2)]).await.unwrap();

        let steps = store.load_steps_since("doc-1", 0).await.unwrap();
        assert_eq!(steps.len(), 2);
    }

    #[tokio::test]
    async fn test_memory_store_load_since_filters() {
        let store = MemoryStore::new();
        store
            .insert_steps("doc-1", &[record(1), record(2), record(3)])
            .await
            .unwrap();

        let steps = store.load_steps_since("doc-1", 2).await.unwrap();
        assert_eq!(steps.iter().map(|s| s.version).collect::<Vec<_>>(), vec![3]);
    }

    #[tokio::test]
    async fn test_sqlite_store_round_trip() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.insert_steps("doc-1", &[record(1), record(2)]).await.unwrap();
        store
            .upsert_document("doc-1", 2, &json!({"type": "doc"}))
            .await
            .unwrap();

        let head = store.load_document("doc-1").await.unwrap().unwrap();
        assert_eq!(head.version, 2);
        assert_eq!(head.content, json!({"type": "doc"}));

        let steps = store.load_steps_since("doc-1", 0).await.unwrap();
        assert_eq!(steps.len(), 2);
        assert!(steps.iter().all(|s| s.durable));
    }

    #[tokio::test]
    async fn test_sqlite_store_reinsert_does_not_duplicate() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.insert_steps("doc-1", &[record(1)]).await.unwrap();
        store.insert_steps("doc-1", &[record(1)]).await.unwrap();

        let steps = store.load_steps_since("doc-1", 0).await.unwrap();
        assert_eq!(steps.len(), 1);
    }

    #[tokio::test]
    async fn test_sqlite_store_unknown_document_is_none() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert!(store.load_document("missing").await.unwrap().is_none());
    }
}
