//! Envelope decoding: inbound request body → [`IngestionEvent`].
//!
//! Two shapes arrive at the push endpoint:
//!
//! ```text
//! raw event        {"bucket": "docs", "name": "raw/cv42.pdf", ...}
//! push envelope    {"message": {"data": "<base64 of the raw event>", "messageId": "..."}, ...}
//! ```
//!
//! Decoding failures split in two, and the split decides redelivery:
//! a body that cannot be parsed at all is [`IngestError::Decode`]; a body that
//! parses but lacks `bucket` or `name` is [`IngestError::MissingField`]. Neither
//! is retryable: the same bytes will fail the same way every time.

use crate::error::IngestError;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The canonical event: which object landed where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionEvent {
    pub bucket: String,
    #[serde(rename = "name")]
    pub object_key: String,
}

/// Parse raw request bytes into the envelope document.
pub fn parse_body(body: &[u8]) -> Result<Value, IngestError> {
    serde_json::from_slice(body)
        .map_err(|e| IngestError::Decode(format!("request body is not JSON: {e}")))
}

/// Decode an already-parsed envelope.
pub fn decode_envelope(envelope: &Value) -> Result<IngestionEvent, IngestError> {
    let body = event_body(envelope)?;
    Ok(IngestionEvent {
        bucket: required_field(&body, "bucket")?,
        object_key: required_field(&body, "name")?,
    })
}

/// The delivery id of a push envelope, used only to correlate logs.
pub fn message_id(envelope: &Value) -> Option<&str> {
    let message = envelope.get("message")?;
    message
        .get("messageId")
        .or_else(|| message.get("message_id"))
        .and_then(Value::as_str)
}

/// Unwrap the event body, following the push envelope if there is one.
fn event_body(envelope: &Value) -> Result<Map<String, Value>, IngestError> {
    let Value::Object(top) = envelope else {
        return Err(IngestError::Decode(format!(
            "expected a JSON object, got {}",
            type_name(envelope)
        )));
    };

    let Some(message) = top.get("message") else {
        return Ok(top.clone());
    };

    let Value::Object(message) = message else {
        return Err(IngestError::Decode(format!(
            "'message' must be an object, got {}",
            type_name(message)
        )));
    };

    let data = match message.get("data") {
        None | Some(Value::Null) => return Ok(Map::new()),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(Map::new()),
        Some(Value::String(s)) => s.trim(),
        Some(other) => {
            return Err(IngestError::Decode(format!(
                "'message.data' must be a base64 string, got {}",
                type_name(other)
            )))
        }
    };

    let bytes = STANDARD
        .decode(data)
        .or_else(|_| URL_SAFE.decode(data))
        .map_err(|e| IngestError::Decode(format!("'message.data' is not valid base64: {e}")))?;

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(inner)) => Ok(inner),
        Ok(other) => Err(IngestError::Decode(format!(
            "wrapped payload must be a JSON object, got {}",
            type_name(&other)
        ))),
        Err(e) => Err(IngestError::Decode(format!(
            "wrapped payload is not JSON: {e}"
        ))),
    }
}

/// A field is present only as a non-empty string.
fn required_field(body: &Map<String, Value>, field: &'static str) -> Result<String, IngestError> {
    match body.get(field).and_then(Value::as_str) {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        _ => Err(IngestError::MissingField { field }),
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
