//! Print relay
//!
//! Small HTTP service that forwards base64 print jobs to network printers
//! over raw TCP, for contexts that cannot open sockets themselves.

pub mod config;
pub mod error;
pub mod logger;
pub mod routes;
pub mod sender;

pub use config::RelayConfig;
pub use error::{RelayError, RelayResult};
pub use routes::{RelayState, router};
pub use sender::{PrinterSender, THERMAL_PORTS, is_thermal_port};
