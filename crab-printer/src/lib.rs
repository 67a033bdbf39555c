//! # crab-printer
//!
//! Receipt printer plumbing: protocol framing and the transports that carry it.
//!
//! ## Scope
//!
//! This crate handles HOW bytes reach a printer:
//! - ESC/POS command building and payload framing
//! - Code page conversion (GBK, Windows-1252, UTF-8)
//! - The [`Transport`]/[`Link`] contract and its adapters: TCP socket,
//!   print relay proxy, serial (feature `serial`), BLE (feature `ble`)
//!
//! Link lifecycle (connect, drop detection, reconnection, chunked delivery)
//! lives in `crab-link`.
//!
//! ## Example
//!
//! ```ignore
//! use crab_printer::{
//!     DeviceCandidate, Framing, NetworkTransport, PrintPayload, Transport, WriteMode,
//! };
//!
//! let transport = NetworkTransport::new();
//! let link = transport
//!     .open(&DeviceCandidate::new("192.168.1.100:9100", None))
//!     .await?;
//!
//! let bytes = PrintPayload::from("桌号: 100").encode(&Framing::default());
//! let channel = link.channels().remove(0);
//! link.write_chunk(&channel, &bytes, WriteMode::WithResponse).await?;
//! ```

mod encoding;
mod error;
mod escpos;
mod payload;
pub mod transport;

// Re-exports
pub use encoding::{
    TextEncoding, convert_to_gbk, convert_to_latin1, gbk_width, pad_gbk, truncate_gbk,
};
pub use error::{TransportError, TransportResult};
pub use escpos::EscPosBuilder;
pub use payload::{Align, Framing, PrintPayload, ReceiptDocument, ReceiptLine};
pub use transport::{
    Channel, DeviceCandidate, DropNotifier, DropSignal, KNOWN_CHANNELS, Link, NetworkTransport,
    ProxyTransport, RADIO_CHUNK_SIZE, Transport, WriteMode, known_channel_rank,
};

#[cfg(feature = "ble")]
pub use transport::RadioTransport;

#[cfg(feature = "serial")]
pub use transport::SerialTransport;
