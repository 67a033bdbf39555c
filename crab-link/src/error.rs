//! Error types for the link manager

use crab_printer::TransportError;
use thiserror::Error;

/// Snapshot store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Link manager errors
///
/// Messages are shown to operators as-is.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Printer not found: {0}")]
    NotFound(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Printer is not connected: {0}")]
    NotConnected(String),

    #[error("No writable channel on {0}")]
    NoWritableChannel(String),

    #[error("Write failed: {0}")]
    WriteFailure(String),

    #[error("Disconnect failed: {0}")]
    DisconnectFailed(String),

    #[error("Unknown printer: {0}")]
    UnknownPrinter(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("No connected printers")]
    NoEligiblePrinters,

    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    #[error("Link manager is shut down")]
    ManagerClosed,
}

impl LinkError {
    /// Map a failure while opening a link
    ///
    /// IO errors during open mean the device did not answer.
    pub fn from_open(err: TransportError) -> Self {
        match err {
            TransportError::Io(e) => Self::NotFound(e.to_string()),
            other => other.into(),
        }
    }

    /// Whether this error came from establishing a link
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::PermissionDenied(_) | Self::NotFound(_) | Self::NotSupported(_) | Self::Timeout(_)
        )
    }
}

impl From<TransportError> for LinkError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::PermissionDenied(m) => Self::PermissionDenied(m),
            TransportError::NotFound(m) => Self::NotFound(m),
            TransportError::NotSupported(m) => Self::NotSupported(m),
            TransportError::Timeout(m) => Self::Timeout(m),
            TransportError::WriteFailure(m) => Self::WriteFailure(m),
            TransportError::Closed(m) => Self::NotConnected(m),
            TransportError::Io(e) => Self::WriteFailure(e.to_string()),
            TransportError::InvalidAddress(m) => Self::InvalidAddress(m),
        }
    }
}

pub type LinkResult<T> = Result<T, LinkError>;
