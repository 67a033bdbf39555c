//! Relay error types

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use shared::relay::RelayPrintResponse;
use std::net::SocketAddr;
use thiserror::Error;
use tracing::warn;

/// Relay errors
///
/// Display strings go back to the caller verbatim.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Invalid printer address: {0}")]
    InvalidAddress(String),

    #[error("Connection timeout to {0}. Printer may be offline or unreachable.")]
    Timeout(SocketAddr),

    #[error(
        "Connection refused by {0}. Device may not be a printer or the print service is not running."
    )]
    Refused(SocketAddr),

    #[error("Failed to print to {addr}: {source}")]
    Io {
        addr: SocketAddr,
        source: std::io::Error,
    },
}

impl RelayError {
    /// Request errors are 400; printer-side failures still answer 200
    /// with `success: false`
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::InvalidAddress(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::OK,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::OK {
            warn!(error = %self, "Print job failed");
        }
        (status, Json(RelayPrintResponse::failed(self.to_string()))).into_response()
    }
}

pub type RelayResult<T> = Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let addr: SocketAddr = "10.0.0.5:9100".parse().unwrap();
        assert_eq!(RelayError::BadRequest("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(RelayError::Refused(addr).status(), StatusCode::OK);
        assert!(RelayError::Timeout(addr).to_string().contains("10.0.0.5:9100"));
    }
}
