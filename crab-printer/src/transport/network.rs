//! Network socket transport
//!
//! Most thermal printers accept raw ESC/POS on TCP port 9100. The link
//! keeps the socket open; a background reader watches for the peer closing
//! it and raises the drop notification.

use async_trait::async_trait;
use shared::models::PrinterKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::{Channel, DeviceCandidate, DropNotifier, DropSignal, Link, Transport, WriteMode};
use crate::error::{TransportError, TransportResult};

/// Default raw printing port
pub const DEFAULT_PORT: u16 = 9100;

/// Parse `host:port` (or bare host, defaulting to port 9100)
pub fn parse_socket_addr(address: &str) -> TransportResult<SocketAddr> {
    let address = address.trim();
    if let Ok(addr) = address.parse::<SocketAddr>() {
        return Ok(addr);
    }
    format!("{}:{}", address, DEFAULT_PORT)
        .parse()
        .map_err(|_| TransportError::InvalidAddress(address.to_string()))
}

/// Direct TCP transport
#[derive(Debug, Clone)]
pub struct NetworkTransport {
    timeout: Duration,
}

impl NetworkTransport {
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(5),
        }
    }

    /// Set reachability timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for NetworkTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for NetworkTransport {
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

    #[instrument(skip(self), fields(addr = %device.address))]
    async fn open(&self, device: &DeviceCandidate) -> TransportResult<Box<dyn Link>> {
        let addr = parse_socket_addr(&device.address)?;
        info!("Connecting to printer");

        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::Timeout(format!("Connection timeout: {}", addr)))?
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::ConnectionRefused => {
                    TransportError::NotFound(format!("{}: connection refused", addr))
                }
                std::io::ErrorKind::PermissionDenied => {
                    TransportError::PermissionDenied(format!("{}: {}", addr, e))
                }
                _ => TransportError::Io(e),
            })?;
        let _ = stream.set_nodelay(true);

        info!("Connected");
        Ok(Box::new(NetworkLink::start(device.address.clone(), addr, stream)))
    }
}

/// Open TCP connection to one printer
pub struct NetworkLink {
    address: String,
    addr: SocketAddr,
    writer: Mutex<Option<OwnedWriteHalf>>,
    alive: Arc<AtomicBool>,
    notifier: DropNotifier,
    reader: JoinHandle<()>,
}

impl NetworkLink {
    fn start(address: String, addr: SocketAddr, stream: TcpStream) -> Self {
        let (mut read_half, write_half) = stream.into_split();
        let alive = Arc::new(AtomicBool::new(true));
        let notifier = DropNotifier::new();

        // Printers rarely talk back; the read side only tells us when the
        // peer closes the socket.
        let reader = {
            let alive = alive.clone();
            let notifier = notifier.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 256];
                loop {
                    match read_half.read(&mut buf).await {
                        Ok(0) => {
                            debug!(%addr, "Peer closed connection");
                            break;
                        }
                        Ok(n) => debug!(%addr, bytes = n, "Printer status bytes ignored"),
                        Err(e) => {
                            warn!(%addr, error = %e, "Read side failed");
                            break;
                        }
                    }
                }
                alive.store(false, Ordering::SeqCst);
                notifier.notify();
            })
        };

        Self {
            address,
            addr,
            writer: Mutex::new(Some(write_half)),
            alive,
            notifier,
            reader,
        }
    }

    fn mark_lost(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.notifier.notify();
    }
}

#[async_trait]
impl Link for NetworkLink {
    fn address(&self) -> &str {
        &self.address
    }

    fn channels(&self) -> Vec<Channel> {
        vec![Channel::stream()]
    }

    #[instrument(skip(self, _channel, bytes), fields(addr = %self.addr, len = bytes.len()))]
    async fn write_chunk(
        &self,
        _channel: &Channel,
        bytes: &[u8],
        mode: WriteMode,
    ) -> TransportResult<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| TransportError::Closed(self.addr.to_string()))?;

        let result = async {
            writer.write_all(bytes).await?;
            if mode == WriteMode::WithResponse {
                writer.flush().await?;
            }
            Ok::<(), std::io::Error>(())
        }
        .await;

        result.map_err(|e| {
            let err = TransportError::Io(e);
            if err.is_link_loss() {
                self.mark_lost();
            }
            err
        })
    }

    async fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && !self.reader.is_finished()
    }

    fn on_drop(&self) -> DropSignal {
        self.notifier.subscribe()
    }

    #[instrument(skip(self), fields(addr = %self.addr))]
    async fn close(&self) -> TransportResult<()> {
        self.alive.store(false, Ordering::SeqCst);
        self.reader.abort();
        if let Some(mut writer) = self.writer.lock().await.take() {
            writer.shutdown().await?;
        }
        info!("Connection closed");
        Ok(())
    }
}

impl Drop for NetworkLink {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
