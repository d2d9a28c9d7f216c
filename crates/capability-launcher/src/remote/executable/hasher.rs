//! Request hashing for the executable server.
//!
//! Requests from different callers for the same message ID are grouped by
//! the hash of their payload, so attributes that legitimately differ
//! between callers (signatures, for instance) have to be excluded first.

use capability_types::{CapabilityError, CapabilityRequest, MessageBody, RequestHasherType};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;

pub trait MessageHasher: Send + Sync + std::fmt::Debug {
    fn hash(&self, message: &MessageBody) -> Result<[u8; 32], CapabilityError>;
}

/// Hashes the request payload with the listed top-level attributes removed.
#[derive(Debug, Clone, Default)]
pub struct SimpleHasher {
    excluded_attributes: Vec<String>,
}

impl SimpleHasher {
    pub fn new(excluded_attributes: Vec<String>) -> Self {
        Self {
            excluded_attributes,
        }
    }
}

impl MessageHasher for SimpleHasher {
    fn hash(&self, message: &MessageBody) -> Result<[u8; 32], CapabilityError> {
        if self.excluded_attributes.is_empty() {
            return Ok(Sha256::digest(&message.payload).into());
        }
        hash_stripped(message, |inputs| {
            for attr in &self.excluded_attributes {
                inputs.remove(attr);
            }
        })
    }
}

/// Hashes a write-report request without its signatures, both the
/// top-level list and the one nested under `report`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteReportExcludeSignaturesHasher;

impl MessageHasher for WriteReportExcludeSignaturesHasher {
    fn hash(&self, message: &MessageBody) -> Result<[u8; 32], CapabilityError> {
        hash_stripped(message, |inputs| {
            inputs.remove("signatures");
            if let Some(Value::Object(report)) = inputs.get_mut("report") {
                report.remove("signatures");
            }
        })
    }
}

pub fn hasher_for(kind: RequestHasherType, excluded: &[String]) -> Arc<dyn MessageHasher> {
    match kind {
        RequestHasherType::Simple => Arc::new(SimpleHasher::new(excluded.to_vec())),
        RequestHasherType::WriteReportExcludeSignatures => {
            Arc::new(WriteReportExcludeSignaturesHasher)
        }
    }
}

fn hash_stripped(
    message: &MessageBody,
    strip: impl FnOnce(&mut serde_json::Map<String, Value>),
) -> Result<[u8; 32], CapabilityError> {
    let mut request: CapabilityRequest = message.decode_payload()?;
    let mut inputs: Value = serde_json::from_slice(&request.payload)?;
    if let Value::Object(map) = &mut inputs {
        strip(map);
    }
    request.payload = serde_json::to_vec(&inputs)?;
    let canonical = serde_json::to_vec(&request)?;
    Ok(Sha256::digest(&canonical).into())
}
