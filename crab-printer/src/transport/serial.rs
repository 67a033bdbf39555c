//! Serial port transport
//!
//! `serialport` is blocking, so every port operation runs on the blocking
//! pool. There is no disconnect event on a serial line; a failed write or
//! a failed status query marks the link as dropped.

use async_trait::async_trait;
use serialport::SerialPort;
use shared::models::PrinterKind;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, instrument, warn};

use super::{Channel, DeviceCandidate, DropNotifier, DropSignal, Link, Transport, WriteMode};
use crate::error::{TransportError, TransportResult};

type Port = Arc<Mutex<Option<Box<dyn SerialPort>>>>;

/// Serial transport
#[derive(Debug, Clone)]
pub struct SerialTransport {
    baud_rate: u32,
    timeout: Duration,
}

impl SerialTransport {
    pub fn new(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            timeout: Duration::from_secs(2),
        }
    }

    /// Per-write timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for SerialTransport {
    fn default() -> Self {
        Self::new(9600)
    }
}

fn map_serial_error(path: &str, e: serialport::Error) -> TransportError {
    match e.kind() {
        serialport::ErrorKind::NoDevice => TransportError::NotFound(path.to_string()),
        serialport::ErrorKind::InvalidInput => TransportError::InvalidAddress(path.to_string()),
        serialport::ErrorKind::Io(kind) if kind == std::io::ErrorKind::PermissionDenied => {
            TransportError::PermissionDenied(path.to_string())
        }
        serialport::ErrorKind::Io(kind) if kind == std::io::ErrorKind::NotFound => {
            TransportError::NotFound(path.to_string())
        }
        _ => TransportError::Io(std::io::Error::other(format!("{}: {}", path, e))),
    }
}

async fn blocking<T, F>(f: F) -> TransportResult<T>
where
    F: FnOnce() -> TransportResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| TransportError::Io(std::io::Error::other(format!("task join failed: {}", e))))?
}

#[async_trait]
impl Transport for SerialTransport {
    fn kind(&self) -> PrinterKind {
        PrinterKind::Serial
    }

    fn chunk_size(&self) -> Option<usize> {
        None
    }

    async fn discover(&self) -> TransportResult<Vec<DeviceCandidate>> {
        let ports = blocking(|| {
            serialport::available_ports().map_err(|e| map_serial_error("enumerate", e))
        })
        .await?;

        Ok(ports
            .into_iter()
            .map(|p| {
                let name = match p.port_type {
                    serialport::SerialPortType::UsbPort(usb) => usb.product,
                    _ => None,
                };
                DeviceCandidate::new(p.port_name, name)
            })
            .collect())
    }

    #[instrument(skip(self), fields(path = %device.address, baud = self.baud_rate))]
    async fn open(&self, device: &DeviceCandidate) -> TransportResult<Box<dyn Link>> {
        let path = device.address.trim().to_string();
        if path.is_empty() {
            return Err(TransportError::InvalidAddress("empty serial path".to_string()));
        }

        let baud = self.baud_rate;
        let timeout = self.timeout;
        let port = {
            let path = path.clone();
            blocking(move || {
                serialport::new(&path, baud)
                    .timeout(timeout)
                    .open()
                    .map_err(|e| map_serial_error(&path, e))
            })
            .await?
        };

        info!("Serial port opened");
        Ok(Box::new(SerialLink {
            path,
            port: Arc::new(Mutex::new(Some(port))),
            alive: Arc::new(AtomicBool::new(true)),
            notifier: DropNotifier::new(),
        }))
    }
}

/// Open serial port
pub struct SerialLink {
    path: String,
    port: Port,
    alive: Arc<AtomicBool>,
    notifier: DropNotifier,
}

impl SerialLink {
    fn mark_lost(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.notifier.notify();
    }
}

#[async_trait]
impl Link for SerialLink {
    fn address(&self) -> &str {
        &self.path
    }

    fn channels(&self) -> Vec<Channel> {
        vec![Channel::stream()]
    }

    #[instrument(skip(self, _channel, bytes, _mode), fields(path = %self.path, len = bytes.len()))]
    async fn write_chunk(
        &self,
        _channel: &Channel,
        bytes: &[u8],
        _mode: WriteMode,
    ) -> TransportResult<()> {
        let port = self.port.clone();
        let data = bytes.to_vec();
        let path = self.path.clone();

        let result = blocking(move || {
            let mut guard = port
                .lock()
                .map_err(|_| TransportError::Closed(path.clone()))?;
            let port = guard
                .as_mut()
                .ok_or_else(|| TransportError::Closed(path.clone()))?;
            port.write_all(&data)?;
            port.flush()?;
            Ok(())
        })
        .await;

        if let Err(e) = &result
            && e.is_link_loss()
        {
            warn!(error = %e, "Serial link lost");
            self.mark_lost();
        }
        result
    }

    async fn is_alive(&self) -> bool {
        if !self.alive.load(Ordering::SeqCst) {
            return false;
        }
        let port = self.port.clone();
        let ok = blocking(move || {
            let guard = port
                .lock()
                .map_err(|_| TransportError::Closed("poisoned".to_string()))?;
            match guard.as_ref() {
                Some(p) => p
                    .bytes_to_write()
                    .map(|_| ())
                    .map_err(|e| TransportError::Io(std::io::Error::other(e.to_string()))),
                None => Err(TransportError::Closed("closed".to_string())),
            }
        })
        .await
        .is_ok();

        if !ok {
            self.mark_lost();
        }
        ok
    }

    fn on_drop(&self) -> DropSignal {
        self.notifier.subscribe()
    }

    async fn close(&self) -> TransportResult<()> {
        self.alive.store(false, Ordering::SeqCst);
        let port = self.port.clone();
        blocking(move || {
            if let Ok(mut guard) = port.lock() {
                guard.take();
            }
            Ok(())
        })
        .await?;
        info!(path = %self.path, "Serial port closed");
        Ok(())
    }
}
