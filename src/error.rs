//! Error types for the pdf-ingest library.
//!
//! [`IngestError`] is the pipeline taxonomy. Every stage returns it, and the
//! split that matters to the outside world is [`IngestError::is_retryable`]:
//!
//! * **Non-retryable** — [`IngestError::MissingField`], [`IngestError::Decode`].
//!   The caller sent something no amount of redelivery can fix.
//! * **Retryable** — [`IngestError::Fetch`], [`IngestError::Conversion`],
//!   [`IngestError::Persistence`], [`IngestError::Relocation`]. The condition
//!   may be transient, and the source object has not been relocated yet, so
//!   redelivery safely repeats the work.
//!
//! Collaborator failures ([`BlobError`], [`SecretError`], [`EngineError`],
//! [`PersistError`]) are separate types so adapters can be tested on their
//! own; the pipeline wraps them with the bucket/key context they lack.

use std::path::PathBuf;
use thiserror::Error;

/// All errors surfaced by the event-processing pipeline.
#[derive(Debug, Error)]
pub enum IngestError {
    // ── Caller errors (never redeliver) ───────────────────────────────────
    /// The event body lacks a required field, or it is empty.
    #[error("Missing '{field}' in event body")]
    MissingField { field: &'static str },

    /// The envelope or its wrapped payload could not be decoded.
    #[error("Undecodable event envelope: {0}")]
    Decode(String),

    // ── Stage errors (redeliver) ──────────────────────────────────────────
    /// Reading the source object or staging it locally failed.
    #[error("Failed to fetch {bucket}/{key}: {source}")]
    Fetch {
        bucket: String,
        key: String,
        #[source]
        source: FetchFailure,
    },

    /// The conversion engine rejected or failed on the staged artifact.
    #[error("Conversion failed for '{key}': {source}")]
    Conversion {
        key: String,
        #[source]
        source: EngineError,
    },

    /// Recording the conversion result failed.
    #[error("Failed to persist record for '{filename}': {source}")]
    Persistence {
        filename: String,
        #[source]
        source: PersistError,
    },

    /// Moving the source object into the processed namespace failed.
    #[error("Failed to {step} while relocating {bucket}/{source_key} → {destination_key}: {reason}")]
    Relocation {
        bucket: String,
        source_key: String,
        destination_key: String,
        step: RelocationStep,
        reason: String,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder or environment validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl IngestError {
    /// Whether the delivery system should redeliver the triggering event.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            IngestError::MissingField { .. } | IngestError::Decode(_)
        )
    }

    /// Whether this is a fetch that failed because the source object is gone.
    pub fn is_source_missing(&self) -> bool {
        matches!(
            self,
            IngestError::Fetch {
                source: FetchFailure::Store(BlobError::NotFound { .. }),
                ..
            }
        )
    }

    /// Short machine-readable label used in logs and response bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::MissingField { .. } => "missing_field",
            IngestError::Decode(_) => "decode",
            IngestError::Fetch { .. } => "fetch",
            IngestError::Conversion { .. } => "conversion",
            IngestError::Persistence { .. } => "persistence",
            IngestError::Relocation { .. } => "relocation",
            IngestError::InvalidConfig(_) => "config",
        }
    }
}

/// Why the artifact fetcher failed.
#[derive(Debug, Error)]
pub enum FetchFailure {
    #[error(transparent)]
    Store(#[from] BlobError),

    #[error("could not stage artifact locally: {0}")]
    Staging(#[from] std::io::Error),
}

/// Which half of the copy-then-delete move failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocationStep {
    /// No destination key could be derived from the source key.
    Resolve,
    Copy,
    Delete,
}

impl std::fmt::Display for RelocationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            RelocationStep::Resolve => "resolve destination",
            RelocationStep::Copy => "copy",
            RelocationStep::Delete => "delete source",
        })
    }
}

/// Object-store failures.
#[derive(Debug, Clone, Error)]
pub enum BlobError {
    #[error("object {bucket}/{key} not found")]
    NotFound { bucket: String, key: String },

    #[error("object store error on {bucket}/{key}: {detail}")]
    Backend {
        bucket: String,
        key: String,
        detail: String,
    },
}

impl BlobError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BlobError::NotFound { .. })
    }
}

/// Secret-store failures.
#[derive(Debug, Error)]
pub enum SecretError {
    /// Neither the environment nor the metadata server named a project.
    #[error("Project ID not found. Set GCP_PROJECT or GOOGLE_CLOUD_PROJECT.")]
    ProjectIdUnavailable,

    #[error("secret '{name}' not found")]
    NotFound { name: String },

    #[error("request for secret '{name}' failed: {detail}")]
    Request { name: String, detail: String },

    #[error("secret '{name}' payload is not valid: {detail}")]
    Payload { name: String, detail: String },
}

/// Conversion-engine failures.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The staged file is not a PDF.
    #[error("File is not a valid PDF: '{path}' (first bytes: {magic:?})")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// The engine could not parse the document.
    #[error("Document '{path}' is corrupt: {detail}")]
    CorruptDocument { path: PathBuf, detail: String },

    /// The engine could not be loaded at startup.
    #[error("Conversion engine unavailable: {0}")]
    Unavailable(String),

    #[error("Internal engine error: {0}")]
    Internal(String),
}

/// Relational-store failures.
#[derive(Debug, Error)]
pub enum PersistError {
    /// The connection string could not be resolved.
    #[error("could not resolve database URL: {0}")]
    Secret(#[from] SecretError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Other(String),
}
