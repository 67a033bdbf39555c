//! Shared types for the Crab printer link workspace
//!
//! Printer metadata, cross-context messages, UI status events and the
//! print-relay wire types. Everything here is plain data; no I/O.

pub mod message;
pub mod models;
pub mod relay;
pub mod util;

// Re-exports
pub use serde::{Deserialize, Serialize};

pub use message::{ContextEnvelope, ContextMessage, NoticeLevel, StatusEvent, StatusEventKind};
pub use models::{PrinterKind, PrinterRecord, PrinterStatus, PrinterSummary};
