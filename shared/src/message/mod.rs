//! Cross-context message types
//!
//! Contexts (tabs, windows, processes) that share one persisted printer
//! registry exchange these messages so their views converge without
//! prompting the user again. Delivery is best-effort, at most once.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::models::PrinterSummary;
use crate::util::now_millis;

pub mod payload;
pub use payload::*;

/// Link lifecycle message
///
/// Serialized as `{"type": "connected", "printer": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "printer", rename_all = "snake_case")]
pub enum ContextMessage {
    /// A context opened a link for the first time
    Connected(PrinterSummary),
    /// A context re-opened a link without prompting
    Reconnected(PrinterSummary),
    /// A context lost or closed its link
    Disconnected(PrinterSummary),
}

impl ContextMessage {
    pub fn printer(&self) -> &PrinterSummary {
        match self {
            Self::Connected(p) | Self::Reconnected(p) | Self::Disconnected(p) => p,
        }
    }

    /// Connected or Reconnected
    pub fn is_connect(&self) -> bool {
        matches!(self, Self::Connected(_) | Self::Reconnected(_))
    }
}

impl fmt::Display for ContextMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected(_) => write!(f, "connected"),
            Self::Reconnected(_) => write!(f, "reconnected"),
            Self::Disconnected(_) => write!(f, "disconnected"),
        }
    }
}

/// Message plus the id of the context that published it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEnvelope {
    pub origin: Uuid,
    pub sent_at: i64,
    pub message: ContextMessage,
}

impl ContextEnvelope {
    pub fn new(origin: Uuid, message: ContextMessage) -> Self {
        Self {
            origin,
            sent_at: now_millis(),
            message,
        }
    }

    /// 序列化为二进制
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// 从二进制解析
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Decode any JSON payload, used by bus adapters that carry raw bytes
pub fn parse_payload<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, serde_json::Error> {
    serde_json::from_slice(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PrinterKind, PrinterRecord};

    fn summary() -> PrinterSummary {
        PrinterRecord::new(PrinterKind::RadioLink, "AA:BB", "POS-1").summary()
    }

    #[test]
    fn test_context_message_wire_shape() {
        let msg = ContextMessage::Connected(summary());
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["type"], "connected");
        assert_eq!(value["printer"]["name"], "POS-1");
        assert_eq!(value["printer"]["kind"], "radio-link");
    }

    #[test]
    fn test_envelope_bytes() {
        let origin = Uuid::new_v4();
        let envelope = ContextEnvelope::new(origin, ContextMessage::Disconnected(summary()));

        let bytes = envelope.to_bytes().unwrap();
        let parsed = ContextEnvelope::from_bytes(&bytes).unwrap();

        assert_eq!(parsed.origin, origin);
        assert!(!parsed.message.is_connect());
        assert_eq!(parsed.message.printer().address, "AA:BB");
    }
}
