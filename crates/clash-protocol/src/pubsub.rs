//! Message bus envelopes.
//!
//! Message payloads travel base64-encoded inside the JSON envelope.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ProtocolError;

/// A published message.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PubsubMessage {
    /// Base64-encoded payload.
    #[serde(default)]
    pub data: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_time: Option<DateTime<Utc>>,
}

impl PubsubMessage {
    /// Wrap raw bytes into a message.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            data: STANDARD.encode(bytes),
            ..Default::default()
        }
    }

    /// Decode the payload.
    pub fn decode_data(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(STANDARD.decode(self.data.as_bytes())?)
    }
}

/// A message handed out by a pull, together with the id used to acknowledge it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedMessage {
    pub ack_id: String,
    pub message: PubsubMessage,
    #[serde(default)]
    pub delivery_attempt: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_pull_response_entry() {
        let json = r#"{
            "ackId": "ack-123",
            "message": {
                "data": "eyJzdGF0dXMiOiAwfQ==",
                "messageId": "42",
                "publishTime": "2024-01-01T10:00:00.123Z"
            }
        }"#;
        let received: ReceivedMessage = serde_json::from_str(json).unwrap();
        assert_eq!(received.ack_id, "ack-123");
        assert_eq!(received.message.message_id, "42");
        assert!(received.message.publish_time.is_some());
        assert_eq!(received.message.decode_data().unwrap(), br#"{"status": 0}"#.to_vec());
    }

    #[test]
    fn test_invalid_base64() {
        let message = PubsubMessage {
            data: "not base64!".to_string(),
            ..Default::default()
        };
        assert!(matches!(message.decode_data(), Err(ProtocolError::Base64(_))));
    }
}
