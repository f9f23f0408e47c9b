//! CloudEvents envelope built for every accepted message

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::GatewayError;
use crate::extract::Attachment;

pub const SPEC_VERSION: &str = "1.0";
pub const EVENT_SOURCE: &str = "direktiv/listener/smtp";
pub const EVENT_TYPE: &str = "smtp.message";
pub const DATA_CONTENT_TYPE: &str = "application/json";

/// How event ids are chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdPolicy {
    /// A fresh random id per event
    #[default]
    Random,
    /// A digest of the payload, so redeliveries of the same message
    /// carry the same id
    ContentHash,
}

/// Everything collected from one SMTP transaction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub message: String,
    pub attachments: Vec<Attachment>,
}

/// Structured-mode CloudEvent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub specversion: String,
    pub id: String,
    pub source: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub datacontenttype: String,
    pub data: MessagePayload,
}

pub fn build_envelope(payload: MessagePayload, policy: IdPolicy) -> Result<Envelope, GatewayError> {
    let id = match policy {
        IdPolicy::Random => uuid::Uuid::new_v4().to_string(),
        IdPolicy::ContentHash => content_hash(&payload)?,
    };

    Ok(Envelope {
        specversion: SPEC_VERSION.to_string(),
        id,
        source: EVENT_SOURCE.to_string(),
        event_type: EVENT_TYPE.to_string(),
        datacontenttype: DATA_CONTENT_TYPE.to_string(),
        data: payload,
    })
}

/// SHA-256 over the canonical JSON form of the payload.
///
/// Object keys are sorted in the canonical form, list elements keep
/// their order.
pub fn content_hash(payload: &MessagePayload) -> Result<String, GatewayError> {
    let canonical = serde_json::to_value(payload).map_err(GatewayError::Hash)?;
    let bytes = serde_json::to_vec(&sort_keys(canonical)).map_err(GatewayError::Hash)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

// `Map` keeps insertion order once any crate in the build enables
// serde_json's `preserve_order`, so the canonical form sorts explicitly.
fn sort_keys(value: serde_json::Value) -> serde_json::Value {
    use serde_json::Value;

    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, sort_keys(value)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}
