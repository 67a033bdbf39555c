//! Backend proxy transport
//!
//! Network printers that this context cannot reach directly are printed
//! through the print relay: every chunk becomes one `POST /api/print`.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use shared::models::PrinterKind;
use shared::relay::{
    PRINT_PATH, PROBE_PATH, RelayPrintRequest, RelayPrintResponse, RelayProbeRequest,
    RelayProbeResponse,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, instrument, warn};

use super::{Channel, DeviceCandidate, DropNotifier, DropSignal, Link, Transport, WriteMode};
use super::network::parse_socket_addr;
use crate::error::{TransportError, TransportResult};

/// Relay-backed network transport
#[derive(Debug, Clone)]
pub struct ProxyTransport {
    client: reqwest::Client,
    base_url: String,
}

impl ProxyTransport {
    /// `base_url` is the relay root, e.g. `http://127.0.0.1:5000`
    pub fn new(base_url: impl Into<String>) -> TransportResult<Self> {
        Self::with_timeout(base_url, Duration::from_secs(15))
    }

    /// Request timeout must cover the relay's own connect timeout
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> TransportResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::NotSupported(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

async fn probe(client: &reqwest::Client, base_url: &str, address: &str) -> TransportResult<()> {
    let response = client
        .post(format!("{}{}", base_url, PROBE_PATH))
        .json(&RelayProbeRequest {
            address: address.to_string(),
        })
        .send()
        .await
        .map_err(map_http_error)?;

    let body: RelayProbeResponse = response
        .json()
        .await
        .map_err(|e| TransportError::NotFound(format!("relay replied with invalid body: {}", e)))?;

    if body.success {
        Ok(())
    } else {
        Err(TransportError::NotFound(
            body.error.unwrap_or_else(|| address.to_string()),
        ))
    }
}

fn map_http_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(format!("relay: {}", e))
    } else if e.is_connect() {
        TransportError::NotFound(format!("relay unreachable: {}", e))
    } else {
        TransportError::WriteFailure(format!("relay: {}", e))
    }
}

#[async_trait]
impl Transport for ProxyTransport {
    fn kind(&self) -> PrinterKind {
        PrinterKind::NetworkSocket
    }

    fn chunk_size(&self) -> Option<usize> {
        None
    }

    async fn discover(&self) -> TransportResult<Vec<DeviceCandidate>> {
        Err(TransportError::NotSupported(
            "network printers are registered by address".to_string(),
        ))
    }

    #[instrument(skip(self), fields(addr = %device.address, relay = %self.base_url))]
    async fn open(&self, device: &DeviceCandidate) -> TransportResult<Box<dyn Link>> {
        parse_socket_addr(&device.address)?;
        probe(&self.client, &self.base_url, &device.address).await?;
        info!("Printer reachable through relay");

        Ok(Box::new(ProxyLink {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            address: device.address.clone(),
            name: device.name.clone(),
            open: AtomicBool::new(true),
            notifier: DropNotifier::new(),
        }))
    }
}

/// Logical link through the relay
///
/// The relay opens a fresh socket per request, so there is nothing to keep
/// open here; liveness is a relay probe.
pub struct ProxyLink {
    client: reqwest::Client,
    base_url: String,
    address: String,
    name: Option<String>,
    open: AtomicBool,
    notifier: DropNotifier,
}

#[async_trait]
impl Link for ProxyLink {
    fn address(&self) -> &str {
        &self.address
    }

    fn channels(&self) -> Vec<Channel> {
        vec![Channel::stream()]
    }

    #[instrument(skip(self, _channel, bytes, _mode), fields(addr = %self.address, len = bytes.len()))]
    async fn write_chunk(
        &self,
        _channel: &Channel,
        bytes: &[u8],
        _mode: WriteMode,
    ) -> TransportResult<()> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::Closed(self.address.clone()));
        }

        let request = RelayPrintRequest {
            address: self.address.clone(),
            payload: STANDARD.encode(bytes),
            printer_name: self.name.clone(),
        };

        let response = self
            .client
            .post(format!("{}{}", self.base_url, PRINT_PATH))
            .json(&request)
            .send()
            .await
            .map_err(map_http_error)?;

        let body: RelayPrintResponse = response
            .json()
            .await
            .map_err(|e| TransportError::WriteFailure(format!("invalid relay reply: {}", e)))?;

        if body.success {
            Ok(())
        } else {
            let error = body.error.unwrap_or_else(|| "relay rejected the job".to_string());
            warn!(error = %error, "Relay print failed");
            Err(TransportError::WriteFailure(error))
        }
    }

    async fn is_alive(&self) -> bool {
        if !self.open.load(Ordering::SeqCst) {
            return false;
        }
        match probe(&self.client, &self.base_url, &self.address).await {
            Ok(()) => true,
            Err(e) => {
                warn!(addr = %self.address, error = %e, "Relay probe failed");
                false
            }
        }
    }

    fn on_drop(&self) -> DropSignal {
        self.notifier.subscribe()
    }

    async fn close(&self) -> TransportResult<()> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}
