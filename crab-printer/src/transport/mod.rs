//! Transport capability
//!
//! One polymorphic contract over every connection technology. A
//! [`Transport`] finds and opens devices; the [`Link`] it returns writes
//! chunks and raises a single "dropped" notification when the device goes
//! away on its own.
//!
//! Adapters:
//! - [`NetworkTransport`]: raw TCP socket (port 9100)
//! - [`ProxyTransport`]: network printers reached through the print relay
//! - `SerialTransport`: serial ports (feature `serial`)
//! - `RadioTransport`: BLE printers (feature `ble`)

use async_trait::async_trait;
use shared::models::PrinterKind;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::TransportResult;

mod network;
mod proxy;
#[cfg(feature = "ble")]
mod radio;
#[cfg(feature = "serial")]
mod serial;

pub use network::{DEFAULT_PORT, NetworkTransport, parse_socket_addr};
pub use proxy::ProxyTransport;
#[cfg(feature = "ble")]
pub use radio::RadioTransport;
#[cfg(feature = "serial")]
pub use serial::SerialTransport;

/// Largest write a BLE printer characteristic accepts reliably
pub const RADIO_CHUNK_SIZE: usize = 244;

// ==================== Channels ====================

/// How a chunk is handed to the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteMode {
    /// Fire and forget (BLE write command)
    WithoutResponse,
    /// Acknowledged write (BLE write request, stream write + flush)
    WithResponse,
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WithoutResponse => write!(f, "without-response"),
            Self::WithResponse => write!(f, "with-response"),
        }
    }
}

/// Writable endpoint on a link
///
/// BLE links expose one channel per characteristic. Stream links (TCP,
/// serial, relay) expose a single nil-UUID channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub service: Uuid,
    pub characteristic: Uuid,
    /// Supported write modes, in preference order
    pub modes: Vec<WriteMode>,
}

impl Channel {
    pub fn new(service: Uuid, characteristic: Uuid, modes: Vec<WriteMode>) -> Self {
        Self {
            service,
            characteristic,
            modes,
        }
    }

    /// The single channel of a byte stream
    pub fn stream() -> Self {
        Self::new(Uuid::nil(), Uuid::nil(), vec![WriteMode::WithResponse])
    }

    pub fn is_stream(&self) -> bool {
        self.service.is_nil() && self.characteristic.is_nil()
    }

    pub fn is_writable(&self) -> bool {
        !self.modes.is_empty()
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_stream() {
            write!(f, "stream")
        } else {
            write!(f, "{}/{}", self.service, self.characteristic)
        }
    }
}

/// Service/characteristic pairs used by common receipt printers,
/// highest priority first
pub const KNOWN_CHANNELS: [(Uuid, Uuid); 4] = [
    // Generic Chinese thermal printers
    (
        Uuid::from_u128(0x0000_18f0_0000_1000_8000_0080_5f9b_34fb),
        Uuid::from_u128(0x0000_2af1_0000_1000_8000_0080_5f9b_34fb),
    ),
    // Vendor SPP-over-GATT printers
    (
        Uuid::from_u128(0xe781_0a71_73ae_499d_8c15_faa9_aef0_c3f2),
        Uuid::from_u128(0xbef8_d6c9_9c21_4c9e_b632_bd58_c100_9f9f),
    ),
    // ISSC transparent UART
    (
        Uuid::from_u128(0x4953_5343_fe7d_4ae5_8fa9_9faf_d205_e455),
        Uuid::from_u128(0x4953_5343_8841_43f4_a8d4_ecbe_3472_9bb3),
    ),
    // Nordic UART service, RX characteristic
    (
        Uuid::from_u128(0x6e40_0001_b5a3_f393_e0a9_e50e_24dc_ca9e),
        Uuid::from_u128(0x6e40_0002_b5a3_f393_e0a9_e50e_24dc_ca9e),
    ),
];

/// Index of a channel in [`KNOWN_CHANNELS`], if it is one
pub fn known_channel_rank(channel: &Channel) -> Option<usize> {
    KNOWN_CHANNELS
        .iter()
        .position(|(svc, chr)| *svc == channel.service && *chr == channel.characteristic)
}

// ==================== Devices ====================

/// A device a transport can open
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCandidate {
    /// Transport locator (BLE address, `host:port`, serial path)
    pub address: String,
    pub name: Option<String>,
}

impl DeviceCandidate {
    pub fn new(address: impl Into<String>, name: Option<String>) -> Self {
        Self {
            address: address.into(),
            name,
        }
    }

    /// Display name, falling back to the address
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }
}

// ==================== Drop notification ====================

/// Sender side of a link's "dropped" notification
///
/// Fires at most once. Held by the link adapter.
#[derive(Debug, Clone)]
pub struct DropNotifier {
    tx: Arc<watch::Sender<bool>>,
}

impl DropNotifier {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Signal that the link went away
    pub fn notify(&self) {
        self.tx.send_if_modified(|dropped| {
            if *dropped {
                false
            } else {
                *dropped = true;
                true
            }
        });
    }

    pub fn is_dropped(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> DropSignal {
        DropSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for DropNotifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver side of a link's "dropped" notification
#[derive(Debug, Clone)]
pub struct DropSignal {
    rx: watch::Receiver<bool>,
}

impl DropSignal {
    /// Resolve once the link has dropped
    ///
    /// A link whose adapter is gone counts as dropped.
    pub async fn dropped(&mut self) {
        let _ = self.rx.wait_for(|dropped| *dropped).await;
    }
}

// ==================== Contracts ====================

/// An open connection to one printer
#[async_trait]
pub trait Link: Send + Sync {
    /// Address the link was opened on
    fn address(&self) -> &str;

    /// Channels discovered on the device
    fn channels(&self) -> Vec<Channel>;

    /// Write one chunk; chunks are never written concurrently on a link
    async fn write_chunk(&self, channel: &Channel, bytes: &[u8], mode: WriteMode)
    -> TransportResult<()>;

    /// Whether the device still answers
    async fn is_alive(&self) -> bool;

    /// Subscribe to the link's drop notification
    fn on_drop(&self) -> DropSignal;

    /// Close the link; does not fire the drop notification
    async fn close(&self) -> TransportResult<()>;
}

/// A connection technology
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> PrinterKind;

    /// Largest chunk the link accepts, `None` when unconstrained
    fn chunk_size(&self) -> Option<usize>;

    /// Whether a stored address can be opened without a prior grant
    ///
    /// True for address-based transports (network, serial). Radio links
    /// need the device to be among [`known_devices`](Self::known_devices).
    fn opens_by_address(&self) -> bool {
        true
    }

    /// Devices this context was granted earlier and may open silently
    async fn known_devices(&self) -> TransportResult<Vec<DeviceCandidate>> {
        Ok(Vec::new())
    }

    /// Candidates for a user-facing picker
    async fn discover(&self) -> TransportResult<Vec<DeviceCandidate>>;

    /// Open a link
    async fn open(&self, device: &DeviceCandidate) -> TransportResult<Box<dyn Link>>;
}
