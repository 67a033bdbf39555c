//! Printer Model

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::util::{now_millis, printer_id};

/// Physical connection technology of a printer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PrinterKind {
    /// Short-range radio link (BLE)
    RadioLink,
    /// Local-network socket, direct or through the backend relay
    NetworkSocket,
    /// Serial port
    Serial,
}

impl PrinterKind {
    pub const ALL: [PrinterKind; 3] = [Self::RadioLink, Self::NetworkSocket, Self::Serial];

    /// Prefix used in generated printer ids
    pub fn id_prefix(&self) -> &'static str {
        match self {
            Self::RadioLink => "radio",
            Self::NetworkSocket => "network",
            Self::Serial => "serial",
        }
    }

    /// Canonical form of an address for this kind.
    ///
    /// Radio device ids are compared upper-case, hosts lower-case,
    /// serial paths verbatim. Surrounding whitespace is always dropped.
    pub fn normalize_address(&self, address: &str) -> String {
        let trimmed = address.trim();
        match self {
            Self::RadioLink => trimmed.to_ascii_uppercase(),
            Self::NetworkSocket => trimmed.to_ascii_lowercase(),
            Self::Serial => trimmed.to_string(),
        }
    }
}

impl fmt::Display for PrinterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RadioLink => write!(f, "radio-link"),
            Self::NetworkSocket => write!(f, "network-socket"),
            Self::Serial => write!(f, "serial"),
        }
    }
}

impl std::str::FromStr for PrinterKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "radio-link" | "radio" | "ble" | "bluetooth" => Ok(Self::RadioLink),
            "network-socket" | "network" | "wifi" | "tcp" => Ok(Self::NetworkSocket),
            "serial" | "usb" => Ok(Self::Serial),
            other => Err(format!("Unknown printer kind: {}", other)),
        }
    }
}

/// Connection status of a printer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrinterStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

impl fmt::Display for PrinterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Known printer entity
///
/// `status` is informational once persisted: a reloaded record is always
/// `Disconnected` because links do not survive the process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrinterRecord {
    pub id: String,
    pub name: String,
    pub address: String,
    pub kind: PrinterKind,
    #[serde(default)]
    pub status: PrinterStatus,
    #[serde(default)]
    pub connected_at: Option<i64>,
    #[serde(default)]
    pub last_used_at: Option<i64>,
    #[serde(default)]
    pub attempt_count: u32,
    #[serde(default = "default_shared")]
    pub shared: bool,
}

fn default_shared() -> bool {
    true
}

impl PrinterRecord {
    /// Create a new record with a freshly generated id
    pub fn new(kind: PrinterKind, address: &str, name: impl Into<String>) -> Self {
        Self {
            id: printer_id(kind),
            name: name.into(),
            address: kind.normalize_address(address),
            kind,
            status: PrinterStatus::Disconnected,
            connected_at: None,
            last_used_at: None,
            attempt_count: 0,
            shared: true,
        }
    }

    /// Whether this record points at the same physical endpoint
    pub fn same_endpoint(&self, kind: PrinterKind, address: &str) -> bool {
        self.kind == kind && self.address == kind.normalize_address(address)
    }

    pub fn is_connected(&self) -> bool {
        self.status == PrinterStatus::Connected
    }

    /// Record a successful connection
    pub fn mark_connected(&mut self) {
        self.status = PrinterStatus::Connected;
        self.attempt_count = 0;
        self.connected_at = Some(now_millis());
    }

    /// Record a successful print
    pub fn touch(&mut self) {
        self.last_used_at = Some(now_millis());
    }

    /// Metadata subset carried by messages
    pub fn summary(&self) -> PrinterSummary {
        PrinterSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            address: self.address.clone(),
            kind: self.kind,
            connected_at: self.connected_at,
            last_used_at: self.last_used_at,
            shared: self.shared,
        }
    }
}

/// Metadata subset of a printer exchanged between contexts and with the UI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrinterSummary {
    pub id: String,
    pub name: String,
    pub address: String,
    pub kind: PrinterKind,
    pub connected_at: Option<i64>,
    pub last_used_at: Option<i64>,
    pub shared: bool,
}

impl PrinterSummary {
    /// Build a disconnected record from a summary received from elsewhere
    pub fn into_record(self) -> PrinterRecord {
        PrinterRecord {
            id: self.id,
            name: self.name,
            address: self.address,
            kind: self.kind,
            status: PrinterStatus::Disconnected,
            connected_at: self.connected_at,
            last_used_at: self.last_used_at,
            attempt_count: 0,
            shared: self.shared,
        }
    }
}
