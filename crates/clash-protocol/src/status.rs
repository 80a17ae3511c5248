//! Worker status message.
//!
//! The only contract between a worker and the orchestrator: a JSON object
//! with at least an integer `status` field. `0` means success.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Status code reported by a worker whose script succeeded.
pub const SUCCESS_CODE: i32 = 0;

/// Decoded status payload. Unknown fields are preserved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub status: i32,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl StatusMessage {
    pub fn new(status: i32) -> Self {
        Self {
            status,
            extra: serde_json::Map::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == SUCCESS_CODE
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_vec(&self) -> Vec<u8> {
        // A map of JSON values with string keys always serializes.
        serde_json::to_vec(self).unwrap_or_default()
    }
}
