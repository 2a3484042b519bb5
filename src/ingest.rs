//! Event orchestration.
//!
//! [`Pipeline`] owns the shared collaborators and runs one event through
//! fetch → invoke → persist → relocate, stopping at the first failing stage.
//! It never retries: the delivery system redelivers whatever the returned
//! [`Outcome`] marks as failed.

use crate::config::ServiceConfig;
use crate::db::RecordStore;
use crate::engine::ConversionEngine;
use crate::envelope::{self, IngestionEvent};
use crate::error::IngestError;
use crate::outcome::Outcome;
use crate::pipeline::fetch::fetch_artifact;
use crate::pipeline::invoke::invoke;
use crate::pipeline::persist::{new_record, Persister};
use crate::pipeline::relocate::{destination_key, relocate, Namespaces};
use crate::store::BlobStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, info_span, warn, Instrument};

/// Shared, per-process pipeline state. Cheap to share behind an `Arc`.
pub struct Pipeline {
    blobs: Arc<dyn BlobStore>,
    engine: Arc<dyn ConversionEngine>,
    persister: Persister,
    namespaces: Namespaces,
    staging_dir: Option<PathBuf>,
}

impl Pipeline {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        engine: Arc<dyn ConversionEngine>,
        records: Arc<dyn RecordStore>,
        config: &ServiceConfig,
    ) -> Self {
        Self {
            blobs,
            engine,
            persister: Persister::new(records),
            namespaces: config.namespaces(),
            staging_dir: config.staging_dir.clone(),
        }
    }

    pub fn persister(&self) -> &Persister {
        &self.persister
    }

    /// Decode a raw request body and process the event it carries.
    pub async fn process_body(&self, body: &[u8]) -> Outcome {
        let envelope = match envelope::parse_body(body) {
            Ok(v) => v,
            Err(error) => {
                warn!(error = %error, "Rejected event");
                return Outcome::from_error(None, error);
            }
        };
        let message_id = envelope::message_id(&envelope).unwrap_or("-").to_string();

        match envelope::decode_envelope(&envelope) {
            Ok(event) => {
                let span = info_span!(
                    "event",
                    message_id = %message_id,
                    bucket = %event.bucket,
                    key = %event.object_key
                );
                self.process_event(event).instrument(span).await
            }
            Err(error) => {
                warn!(message_id = %message_id, kind = error.kind(), error = %error, "Rejected event");
                Outcome::from_error(None, error)
            }
        }
    }

    /// Run every stage for `event`.
    pub async fn process_event(&self, event: IngestionEvent) -> Outcome {
        let started = Instant::now();
        info!(bucket = %event.bucket, key = %event.object_key, "Received event");

        let outcome = match self.run(&event).await {
            Ok(outcome) => outcome,
            Err(error) => Outcome::from_error(Some(event), error),
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            Outcome::Failed { error, .. } => {
                error!(kind = error.kind(), error = %error, elapsed_ms, "Processing failed");
            }
            Outcome::Rejected { error } => {
                warn!(kind = error.kind(), error = %error, elapsed_ms, "Rejected event");
            }
            other => info!(outcome = other.label(), elapsed_ms, "Processing complete"),
        }
        outcome
    }

    async fn run(&self, event: &IngestionEvent) -> Result<Outcome, IngestError> {
        if self.namespaces.is_processed(&event.object_key) {
            return Ok(Outcome::Skipped {
                event: event.clone(),
                reason: "object is already in the processed namespace",
            });
        }

        let staged = match fetch_artifact(
            self.blobs.as_ref(),
            event,
            self.staging_dir.as_deref(),
        )
        .await
        {
            Ok(staged) => staged,
            Err(e) if e.is_source_missing() => {
                return match self.completed_destination(event).await {
                    Some(destination_key) => Ok(Outcome::AlreadyProcessed {
                        event: event.clone(),
                        destination_key,
                    }),
                    None => Err(e),
                };
            }
            Err(e) => return Err(e),
        };

        let result = invoke(self.engine.as_ref(), &staged).await?;
        let persisted = self.persister.record(&new_record(&staged, result)).await?;
        drop(staged);

        let relocation = relocate(
            self.blobs.as_ref(),
            &event.bucket,
            &event.object_key,
            &self.namespaces,
        )
        .await?;

        Ok(Outcome::Processed {
            event: event.clone(),
            inserted: persisted.is_new(),
            record: persisted.into_record(),
            relocation,
        })
    }

    /// The processed key for `event`, if an object already exists there.
    async fn completed_destination(&self, event: &IngestionEvent) -> Option<String> {
        let destination = destination_key(&event.object_key, &self.namespaces)?;
        match self.blobs.exists(&event.bucket, &destination).await {
            Ok(true) => Some(destination),
            Ok(false) => None,
            Err(e) => {
                warn!(error = %e, destination = %destination, "Could not check processed copy");
                None
            }
        }
    }
}
