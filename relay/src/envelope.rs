//! Transport envelope carried on the message channel.
//!
//! The payload is base64-wrapped inside a small JSON document so that the
//! same shape can be delivered over MQTT or pushed over HTTP by an external
//! invoker.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::errors::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub message: EnvelopeMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeMessage {
    /// Base64 of the UTF-8 JSON payload.
    pub data: String,
    #[serde(default, alias = "messageId")]
    pub message_id: String,
    #[serde(default, alias = "publishTime", skip_serializing_if = "Option::is_none")]
    pub publish_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
}

impl Envelope {
    /// Wraps raw payload bytes under a fresh message id.
    pub fn wrap(payload: &[u8]) -> Self {
        Self {
            message: EnvelopeMessage {
                data: STANDARD.encode(payload),
                message_id: Uuid::new_v4().to_string(),
                publish_time: Some(Utc::now()),
                attributes: Map::new(),
            },
            subscription: None,
        }
    }

    pub fn parse(raw: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(raw)?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn message_id(&self) -> &str {
        &self.message.message_id
    }

    /// Base64 then UTF-8 decoding of the payload.
    pub fn payload(&self) -> Result<String> {
        let bytes = STANDARD.decode(self.message.data.trim())?;
        Ok(String::from_utf8(bytes)?)
    }
}
