//! Outcome reporter: terminal pipeline state → HTTP response.
//!
//! Push delivery redelivers on any non-2xx answer, so the status code is the
//! retry contract:
//!
//! | outcome            | status | redelivered |
//! |--------------------|--------|-------------|
//! | `Processed`        | 200    | no          |
//! | `AlreadyProcessed` | 200    | no          |
//! | `Skipped`          | 200    | no          |
//! | `Rejected`         | 400 (200 with `ack_rejected_events`) | no, if the system honours 4xx |
//! | `Failed`           | 500    | yes         |

use crate::db::PersistedRecord;
use crate::envelope::IngestionEvent;
use crate::error::IngestError;
use crate::pipeline::relocate::RelocationOutcome;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// How one event ended.
#[derive(Debug)]
pub enum Outcome {
    /// Every stage completed.
    Processed {
        event: IngestionEvent,
        record: PersistedRecord,
        /// `false` when the record already existed from an earlier delivery.
        inserted: bool,
        relocation: RelocationOutcome,
    },
    /// The source is gone and its processed copy exists: a redelivery of
    /// finished work.
    AlreadyProcessed {
        event: IngestionEvent,
        destination_key: String,
    },
    /// The event needs no work, e.g. it names an object in the processed
    /// namespace.
    Skipped {
        event: IngestionEvent,
        reason: &'static str,
    },
    /// The event can never succeed.
    Rejected { error: IngestError },
    /// A stage failed; redelivery may succeed.
    Failed {
        event: IngestionEvent,
        error: IngestError,
    },
}

impl Outcome {
    /// Classify a stage error. Caller errors reject, the rest fail.
    pub fn from_error(event: Option<IngestionEvent>, error: IngestError) -> Self {
        match event {
            Some(event) if error.is_retryable() => Outcome::Failed { event, error },
            _ => Outcome::Rejected { error },
        }
    }

    pub fn status_code(&self, ack_rejected: bool) -> StatusCode {
        match self {
            Outcome::Processed { .. } | Outcome::AlreadyProcessed { .. } | Outcome::Skipped { .. } => {
                StatusCode::OK
            }
            Outcome::Rejected { .. } if ack_rejected => StatusCode::OK,
            Outcome::Rejected { .. } => StatusCode::BAD_REQUEST,
            Outcome::Failed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short label, also the `status` field of the response body.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Processed { .. } => "ok",
            Outcome::AlreadyProcessed { .. } => "already_processed",
            Outcome::Skipped { .. } => "skipped",
            Outcome::Rejected { .. } => "rejected",
            Outcome::Failed { .. } => "error",
        }
    }

    pub fn body(&self) -> OutcomeBody<'_> {
        let mut body = OutcomeBody {
            status: self.label(),
            ..OutcomeBody::default()
        };
        match self {
            Outcome::Processed {
                event,
                record,
                relocation,
                ..
            } => {
                body.bucket = Some(event.bucket.as_str());
                body.name = Some(event.object_key.as_str());
                body.record_id = Some(record.id);
                body.destination = Some(relocation.destination_key.as_str());
            }
            Outcome::AlreadyProcessed {
                event,
                destination_key,
            } => {
                body.bucket = Some(event.bucket.as_str());
                body.name = Some(event.object_key.as_str());
                body.destination = Some(destination_key.as_str());
            }
            Outcome::Skipped { event, reason } => {
                body.bucket = Some(event.bucket.as_str());
                body.name = Some(event.object_key.as_str());
                body.reason = Some(*reason);
            }
            Outcome::Rejected { error } => {
                body.error = Some(error.to_string());
                body.kind = Some(error.kind());
            }
            Outcome::Failed { event, error } => {
                body.bucket = Some(event.bucket.as_str());
                body.name = Some(event.object_key.as_str());
                body.error = Some(error.to_string());
                body.kind = Some(error.kind());
            }
        }
        body
    }

    pub fn into_response(self, ack_rejected: bool) -> Response {
        let status = self.status_code(ack_rejected);
        (status, Json(self.body())).into_response()
    }
}

/// JSON body returned to the delivery system.
#[derive(Debug, Default, Serialize, PartialEq)]
pub struct OutcomeBody<'a> {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
}
