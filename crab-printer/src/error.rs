//! Error types for printer transports

use thiserror::Error;

/// Transport error types
#[derive(Debug, Error)]
pub enum TransportError {
    /// The platform or the user refused access to the device
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// No device answered at the given address
    #[error("Device not found: {0}")]
    NotFound(String),

    /// The connection technology is not available in this build or platform
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Timeout waiting for the device
    #[error("Timeout: {0}")]
    Timeout(String),

    /// A chunk could not be written
    #[error("Write failed: {0}")]
    WriteFailure(String),

    /// The link was already closed or dropped
    #[error("Link closed: {0}")]
    Closed(String),

    /// IO error on the underlying stream
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Address does not match the transport's locator format
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

impl TransportError {
    /// Whether the failure means the link itself is gone
    pub fn is_link_loss(&self) -> bool {
        match self {
            Self::Closed(_) => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_loss_classification() {
        let reset = TransportError::Io(std::io::Error::from(std::io::ErrorKind::ConnectionReset));
        assert!(reset.is_link_loss());
        assert!(TransportError::Closed("gone".into()).is_link_loss());
        assert!(!TransportError::Timeout("slow".into()).is_link_loss());
    }
}
