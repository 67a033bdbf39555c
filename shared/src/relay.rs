//! Print relay wire types
//!
//! Network printers that cannot be reached directly from a context are
//! printed through the backend relay. Payload bytes travel base64-encoded.

use serde::{Deserialize, Serialize};

/// Relay print route
pub const PRINT_PATH: &str = "/api/print";
/// Relay reachability route
pub const PROBE_PATH: &str = "/api/printer/test";

/// Print submission (context -> relay)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayPrintRequest {
    /// `host:port` of the printer
    pub address: String,
    /// Base64 encoded protocol bytes
    pub payload: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub printer_name: Option<String>,
}

/// Print result (relay -> context)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayPrintResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes_sent: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub printer_info: Option<String>,
}

impl RelayPrintResponse {
    pub fn sent(bytes_sent: usize, printer_info: impl Into<String>) -> Self {
        Self {
            success: true,
            error: None,
            bytes_sent: Some(bytes_sent),
            printer_info: Some(printer_info.into()),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            bytes_sent: None,
            printer_info: None,
        }
    }
}

/// Reachability probe (context -> relay)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayProbeRequest {
    pub address: String,
}

/// Reachability result (relay -> context)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayProbeResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RelayProbeResponse {
    pub fn reachable() -> Self {
        Self {
            success: true,
            message: Some("Printer is reachable".to_string()),
            error: None,
        }
    }

    pub fn unreachable(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.into()),
        }
    }
}
