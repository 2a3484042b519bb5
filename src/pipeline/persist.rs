//! Result persister.
//!
//! The schema is ensured lazily, once per process. A failed ensure is only
//! logged: the table usually exists already, and if it does not the insert
//! fails with a retryable error anyway. The flag is set on success only, so
//! the next event tries again.

use crate::db::{NewRecord, PersistOutcome, RecordStore};
use crate::engine::ConversionResult;
use crate::error::IngestError;
use crate::pipeline::fetch::StagedArtifact;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

pub struct Persister {
    store: Arc<dyn RecordStore>,
    schema_ready: AtomicBool,
}

impl Persister {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            schema_ready: AtomicBool::new(false),
        }
    }

    pub fn schema_ready(&self) -> bool {
        self.schema_ready.load(Ordering::Acquire)
    }

    /// Ensure the schema (first time only), then append `record`.
    pub async fn record(&self, record: &NewRecord) -> Result<PersistOutcome, IngestError> {
        self.ensure_schema_once().await;

        let outcome = self
            .store
            .append(record)
            .await
            .map_err(|source| IngestError::Persistence {
                filename: record.filename.clone(),
                source,
            })?;

        let row = outcome.record();
        if outcome.is_new() {
            info!(id = row.id, filename = %row.filename, "Record inserted");
        } else {
            info!(id = row.id, filename = %row.filename, "Record already present");
        }
        Ok(outcome)
    }

    async fn ensure_schema_once(&self) {
        if self.schema_ready() {
            return;
        }
        match self.store.ensure_schema().await {
            Ok(()) => self.schema_ready.store(true, Ordering::Release),
            Err(e) => warn!(error = %e, "Could not ensure schema; continuing"),
        }
    }
}

/// The row recorded for a converted artifact. Keyed by the full object key.
pub fn new_record(staged: &StagedArtifact, result: ConversionResult) -> NewRecord {
    NewRecord {
        filename: staged.source_key.clone(),
        text: result.text,
        metadata: Value::Object(result.metadata),
        content_sha256: staged.content_sha256.clone(),
    }
}
