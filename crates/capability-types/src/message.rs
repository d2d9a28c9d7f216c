//! Remote message envelope exchanged between shims through the dispatcher.
//!
//! Payload bytes are opaque here; shims encode their requests with
//! [`MessageBody::encode_payload`].

use crate::entities::{DonId, PeerId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    RegisterTrigger,
    UnregisterTrigger,
    TriggerEvent,
    Execute,
}

/// Extra routing data carried by trigger events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEventMetadata {
    pub trigger_event_id: String,
    pub workflow_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBody {
    pub message_id: String,
    pub sender: PeerId,
    pub receiver: PeerId,
    pub capability_id: String,
    pub capability_don_id: DonId,
    pub caller_don_id: DonId,
    pub method: MessageKind,
    /// Method name for multi-method capabilities, empty for single-method ones.
    #[serde(default)]
    pub capability_method: String,
    #[serde(default)]
    pub payload: Vec<u8>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub trigger_event: Option<TriggerEventMetadata>,
}

impl MessageBody {
    pub fn new(
        method: MessageKind,
        capability_id: impl Into<String>,
        capability_don_id: DonId,
        caller_don_id: DonId,
    ) -> Self {
        Self {
            message_id: String::new(),
            sender: PeerId::default(),
            receiver: PeerId::default(),
            capability_id: capability_id.into(),
            capability_don_id,
            caller_don_id,
            method,
            capability_method: String::new(),
            payload: Vec::new(),
            error: None,
            trigger_event: None,
        }
    }

    #[must_use]
    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = id.into();
        self
    }

    #[must_use]
    pub fn with_capability_method(mut self, method: impl Into<String>) -> Self {
        self.capability_method = method.into();
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    #[must_use]
    pub fn with_trigger_event(mut self, meta: TriggerEventMetadata) -> Self {
        self.trigger_event = Some(meta);
        self
    }

    pub fn encode_payload<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(value)
    }

    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}
