//! Record storage.
//!
//! One row per converted object: filename, extracted text, engine metadata.
//! Rows are only ever appended. Redelivered events must not add a second
//! row, so the table carries a content fingerprint and a unique index on
//! `(filename, content_sha256)`; an insert that hits it resolves to the row
//! already there ([`PersistOutcome::Existing`]).

use crate::error::PersistError;
use crate::secrets::SecretStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// A row to append.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    /// Object key of the source, as received in the event.
    pub filename: String,
    pub text: String,
    pub metadata: Value,
    /// Hex SHA-256 of the source bytes.
    pub content_sha256: String,
}

/// A row as stored.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct PersistedRecord {
    pub id: i64,
    pub filename: String,
    pub text: String,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

/// What an append did.
#[derive(Debug, Clone, PartialEq)]
pub enum PersistOutcome {
    Inserted(PersistedRecord),
    /// The same filename and content were recorded earlier.
    Existing(PersistedRecord),
}

impl PersistOutcome {
    pub fn record(&self) -> &PersistedRecord {
        match self {
            PersistOutcome::Inserted(r) | PersistOutcome::Existing(r) => r,
        }
    }

    pub fn into_record(self) -> PersistedRecord {
        match self {
            PersistOutcome::Inserted(r) | PersistOutcome::Existing(r) => r,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, PersistOutcome::Inserted(_))
    }
}

/// Append-only record store.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Create the table and index if they do not exist. Idempotent.
    async fn ensure_schema(&self) -> Result<(), PersistError>;

    /// Append a row, or return the existing one for the same
    /// `(filename, content_sha256)`.
    async fn append(&self, record: &NewRecord) -> Result<PersistOutcome, PersistError>;
}

// ── PostgreSQL ───────────────────────────────────────────────────────────

/// Where the connection string comes from.
pub enum DatabaseUrl {
    Explicit(String),
    Secret {
        store: Arc<dyn SecretStore>,
        name: String,
    },
}

/// [`RecordStore`] over a lazily connected `PgPool`.
///
/// Nothing touches the network until the first call, so the service starts
/// even when the database is unreachable; the first event then fails with a
/// retryable persistence error.
pub struct PgRecordStore {
    url: DatabaseUrl,
    table: String,
    max_connections: u32,
    pool: OnceCell<PgPool>,
}

impl PgRecordStore {
    /// `table` must already be validated as a plain identifier; it is
    /// interpolated into SQL.
    pub fn new(url: DatabaseUrl, table: impl Into<String>, max_connections: u32) -> Self {
        Self {
            url,
            table: table.into(),
            max_connections,
            pool: OnceCell::new(),
        }
    }

    async fn pool(&self) -> Result<&PgPool, PersistError> {
        self.pool
            .get_or_try_init(|| async {
                let url = match &self.url {
                    DatabaseUrl::Explicit(url) => url.clone(),
                    DatabaseUrl::Secret { store, name } => store.resolve(name).await?,
                };
                let pool = PgPoolOptions::new()
                    .max_connections(self.max_connections)
                    .acquire_timeout(Duration::from_secs(10))
                    .connect(&url)
                    .await?;
                info!(
                    table = %self.table,
                    max_connections = self.max_connections,
                    "PostgreSQL pool connected"
                );
                Ok::<_, PersistError>(pool)
            })
            .await
    }

    fn schema_statements(&self) -> [String; 3] {
        let t = &self.table;
        [
            format!(
                "CREATE TABLE IF NOT EXISTS {t} (
                     id BIGSERIAL PRIMARY KEY,
                     filename TEXT NOT NULL,
                     cv_text TEXT,
                     metadata JSONB,
                     created_at TIMESTAMPTZ DEFAULT now()
                 )"
            ),
            format!("ALTER TABLE {t} ADD COLUMN IF NOT EXISTS content_sha256 TEXT"),
            format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS {t}_filename_sha256_key
                     ON {t} (filename, content_sha256)"
            ),
        ]
    }
}

const RETURNED_COLUMNS: &str = "id, filename, COALESCE(cv_text, '') AS text, \
     COALESCE(metadata, '{}'::jsonb) AS metadata, created_at";

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn ensure_schema(&self) -> Result<(), PersistError> {
        let pool = self.pool().await?;
        for statement in self.schema_statements() {
            sqlx::query(&statement).execute(pool).await?;
        }
        debug!(table = %self.table, "Schema ensured");
        Ok(())
    }

    async fn append(&self, record: &NewRecord) -> Result<PersistOutcome, PersistError> {
        let pool = self.pool().await?;
        let t = &self.table;

        let inserted = sqlx::query_as::<_, PersistedRecord>(&format!(
            "INSERT INTO {t} (filename, cv_text, metadata, content_sha256)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (filename, content_sha256) DO NOTHING
             RETURNING {RETURNED_COLUMNS}"
        ))
        .bind(&record.filename)
        .bind(&record.text)
        .bind(&record.metadata)
        .bind(&record.content_sha256)
        .fetch_optional(pool)
        .await?;

        if let Some(row) = inserted {
            return Ok(PersistOutcome::Inserted(row));
        }

        let existing = sqlx::query_as::<_, PersistedRecord>(&format!(
            "SELECT {RETURNED_COLUMNS} FROM {t}
             WHERE filename = $1 AND content_sha256 = $2
             ORDER BY id LIMIT 1"
        ))
        .bind(&record.filename)
        .bind(&record.content_sha256)
        .fetch_one(pool)
        .await?;
        Ok(PersistOutcome::Existing(existing))
    }
}

// ── In-memory ────────────────────────────────────────────────────────────

#[derive(Default)]
struct MemoryRows {
    rows: Vec<(PersistedRecord, String)>,
    next_id: i64,
}

/// [`RecordStore`] held in process memory, with the same uniqueness rule
/// as the PostgreSQL table.
#[derive(Default)]
pub struct MemoryRecordStore {
    inner: Mutex<MemoryRows>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all rows, in insertion order.
    pub fn records(&self) -> Vec<PersistedRecord> {
        self.inner
            .lock()
            .map(|inner| inner.rows.iter().map(|(r, _)| r.clone()).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn ensure_schema(&self) -> Result<(), PersistError> {
        Ok(())
    }

    async fn append(&self, record: &NewRecord) -> Result<PersistOutcome, PersistError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| PersistError::Other("record store lock poisoned".into()))?;

        let existing = inner.rows.iter().find(|(r, sha)| {
            r.filename == record.filename && *sha == record.content_sha256
        });
        if let Some((row, _)) = existing {
            return Ok(PersistOutcome::Existing(row.clone()));
        }

        inner.next_id += 1;
        let row = PersistedRecord {
            id: inner.next_id,
            filename: record.filename.clone(),
            text: record.text.clone(),
            metadata: record.metadata.clone(),
            created_at: Utc::now(),
        };
        inner.rows.push((row.clone(), record.content_sha256.clone()));
        Ok(PersistOutcome::Inserted(row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(filename: &str, sha: &str) -> NewRecord {
        NewRecord {
            filename: filename.into(),
            text: "Jane Doe".into(),
            metadata: json!({"pages": 2}),
            content_sha256: sha.into(),
        }
    }

    #[tokio::test]
    async fn memory_store_assigns_increasing_ids() {
        let store = MemoryRecordStore::new();
        let a = store.append(&record("raw/a.pdf", "aa")).await.unwrap();
        let b = store.append(&record("raw/b.pdf", "bb")).await.unwrap();
        assert!(a.is_new() && b.is_new());
        assert!(b.record().id > a.record().id);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn same_file_and_content_resolves_to_existing_row() {
        let store = MemoryRecordStore::new();
        let first = store.append(&record("raw/a.pdf", "aa")).await.unwrap();
        let again = store.append(&record("raw/a.pdf", "aa")).await.unwrap();

        assert!(!again.is_new());
        assert_eq!(again.record(), first.record());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn changed_content_under_same_name_is_a_new_row() {
        let store = MemoryRecordStore::new();
        store.append(&record("raw/a.pdf", "aa")).await.unwrap();
        let replaced = store.append(&record("raw/a.pdf", "bb")).await.unwrap();
        assert!(replaced.is_new());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn schema_uses_configured_table() {
        let store = PgRecordStore::new(
            DatabaseUrl::Explicit("postgres://localhost/unused".into()),
            "resumes",
            1,
        );
        let [create, alter, index] = store.schema_statements();
        assert!(create.contains("CREATE TABLE IF NOT EXISTS resumes"));
        assert!(create.contains("cv_text TEXT"));
        assert!(alter.contains("content_sha256"));
        assert!(index.contains("ON resumes (filename, content_sha256)"));
    }

    #[tokio::test]
    async fn unreachable_database_is_a_persist_error() {
        let store = PgRecordStore::new(
            DatabaseUrl::Explicit("postgres://nobody@127.0.0.1:9/none".into()),
            "cv_data",
            1,
        );
        let err = store.ensure_schema().await.unwrap_err();
        assert!(matches!(err, PersistError::Database(_)), "got {err:?}");
    }
}
