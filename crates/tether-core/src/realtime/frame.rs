//! Realtime wire frames
//!
//! Every text message on the channel is a JSON object naming an event and
//! carrying its payload: `{"event": "notification", "data": {...}}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RealtimeError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    pub fn encode(&self) -> Result<String, RealtimeError> {
        serde_json::to_string(self).map_err(|e| RealtimeError::Encode(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, RealtimeError> {
        serde_json::from_str(text).map_err(|e| RealtimeError::Decode(e.to_string()))
    }
}
