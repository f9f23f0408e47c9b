//! Splits a message into its text body and attachments

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::GatewayError;
use crate::message::{Part, PartKind};

/// A file carried by a message, fully buffered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(serialize_with = "to_base64", deserialize_with = "from_base64")]
    pub data: Vec<u8>,
    #[serde(rename = "type")]
    pub content_type: String,
    pub name: String,
}

/// Body text and attachments of one message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extracted {
    pub attachments: Vec<Attachment>,
    pub message: String,
}

/// Walk the parts and collect body text and attachments.
///
/// The last non-empty plain text part wins; inline parts are never
/// concatenated. Without any plain text the last non-empty rich text
/// part (usually HTML) becomes the message. Other parts are skipped.
/// An attachment without content type or filename, or whose content
/// can not be decoded, fails the whole extraction.
pub fn extract<'m, I>(parts: I) -> Result<Extracted, GatewayError>
where
    I: IntoIterator<Item = Part<'m>>,
{
    let mut extracted = Extracted::default();
    let mut rich = String::new();

    for part in parts {
        match part.kind() {
            PartKind::Inline => {
                if let Some(text) = inline_text(&part) {
                    extracted.message = text;
                }
            }
            PartKind::InlineRich => {
                if let Some(text) = inline_text(&part) {
                    rich = text;
                }
            }
            PartKind::Attachment => {
                extracted.attachments.push(read_attachment(&part)?);
            }
            PartKind::Other => {}
        }
    }

    if extracted.message.is_empty() {
        extracted.message = rich;
    }
    Ok(extracted)
}

fn inline_text(part: &Part<'_>) -> Option<String> {
    match part.text() {
        Ok(text) if !text.is_empty() => Some(text),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!("ignoring unreadable inline part: {e}");
            None
        }
    }
}

fn read_attachment(part: &Part<'_>) -> Result<Attachment, GatewayError> {
    let content_type = part
        .content_type()
        .ok_or_else(|| GatewayError::Extraction("attachment without content type".to_string()))?;
    let name = part
        .filename()
        .ok_or_else(|| GatewayError::Extraction("attachment without filename".to_string()))?;
    let data = part
        .bytes()
        .map_err(|e| GatewayError::Extraction(format!("can not read attachment {name:?}: {e}")))?;

    tracing::debug!("attachment {name:?} ({content_type}, {} bytes)", data.len());
    Ok(Attachment {
        data,
        content_type,
        name,
    })
}

fn to_base64<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(data))
}

fn from_base64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    STANDARD.decode(encoded).map_err(serde::de::Error::custom)
}
