//! # pdf-ingest
//!
//! Push-triggered document ingestion: an object lands in a bucket, a push
//! delivery names it, and this service converts it to text, records the
//! result in PostgreSQL and moves the source into a `processed/` namespace.
//!
//! ## Pipeline Overview
//!
//! ```text
//! POST /
//!  │
//!  ├─ 1. Decode    raw event or push envelope (base64 payload) → {bucket, name}
//!  ├─ 2. Fetch     object bytes → scoped temp file + SHA-256
//!  ├─ 3. Convert   pdfium text layer + document metadata (spawn_blocking)
//!  ├─ 4. Persist   ensure schema once, INSERT … ON CONFLICT DO NOTHING
//!  ├─ 5. Relocate  copy to processed/, then delete the source
//!  └─ 6. Report    200 done · 400 never retry · 500 redeliver
//! ```
//!
//! ## Delivery contract
//!
//! Delivery is at-least-once. Every stage is safe to repeat: the record
//! insert is keyed by `(filename, content_sha256)`, the relocation copy
//! overwrites, and deleting a missing source succeeds. A redelivered event
//! whose source is already gone but whose processed copy exists is answered
//! as already processed.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf_ingest::{load_engine, router, AppState, MemoryRecordStore, ObjectStoreBlobs, Pipeline, ServiceConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServiceConfig::from_env()?;
//!     let blobs = Arc::new(ObjectStoreBlobs::new(config.storage.clone()));
//!     let engine = Arc::new(load_engine(&config, blobs.as_ref()).await?);
//!     let records = Arc::new(MemoryRecordStore::new());
//!
//!     let state = AppState {
//!         pipeline: Pipeline::new(blobs, engine, records, &config),
//!         ack_rejected_events: config.ack_rejected_events,
//!     };
//!     let app = router(Arc::new(state), config.request_timeout);
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature   | Default | Description |
//! |-----------|---------|-------------|
//! | `cli`     | on      | Enables the `pdf-ingest` binary (clap + anyhow + dotenvy + tracing-subscriber) |
//! | `bundled` | off     | Embeds the pdfium library named by `PDFIUM_BUNDLE_LIB` at build time |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod db;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod ingest;
pub mod outcome;
pub mod pipeline;
pub mod secrets;
pub mod server;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{SecretBackend, ServiceConfig, ServiceConfigBuilder, StorageBackend};
pub use db::{
    DatabaseUrl, MemoryRecordStore, NewRecord, PersistOutcome, PersistedRecord, PgRecordStore,
    RecordStore,
};
pub use engine::{load_engine, ConversionEngine, ConversionResult, PageSeparator, PdfiumEngine};
pub use envelope::{decode_envelope, parse_body, IngestionEvent};
pub use error::{
    BlobError, EngineError, FetchFailure, IngestError, PersistError, RelocationStep, SecretError,
};
pub use ingest::Pipeline;
pub use outcome::{Outcome, OutcomeBody};
pub use pipeline::fetch::{fetch_artifact, StagedArtifact};
pub use pipeline::persist::Persister;
pub use pipeline::relocate::{destination_key, relocate, Namespaces, RelocationOutcome};
pub use secrets::{EnvSecrets, GcpSecretManager, SecretStore};
pub use server::{router, AppState};
pub use store::{BlobStore, ObjectStoreBlobs};
