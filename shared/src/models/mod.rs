//! Data models
//!
//! Printer metadata shared by the link manager, the CLI and the UI layer.
//! Only durable metadata lives here; live transport links never do.

pub mod printer;

// Re-exports
pub use printer::*;
