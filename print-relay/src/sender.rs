//! Raw TCP delivery to network printers

use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{info, instrument};

use crate::config::RelayConfig;
use crate::error::{RelayError, RelayResult};

/// Ports thermal receipt printers usually listen on
pub const THERMAL_PORTS: [u16; 5] = [9100, 9101, 9102, 515, 631];

pub fn is_thermal_port(port: u16) -> bool {
    THERMAL_PORTS.contains(&port)
}

/// Sends print jobs over plain TCP
#[derive(Debug, Clone)]
pub struct PrinterSender {
    connect_timeout: Duration,
    probe_timeout: Duration,
    chunk_size: usize,
}

impl PrinterSender {
    pub fn new(connect_timeout: Duration, probe_timeout: Duration, chunk_size: usize) -> Self {
        Self {
            connect_timeout,
            probe_timeout,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(
            config.connect_timeout,
            config.probe_timeout,
            config.chunk_size,
        )
    }

    async fn open(&self, addr: SocketAddr, limit: Duration) -> RelayResult<TcpStream> {
        match timeout(limit, TcpStream::connect(addr)).await {
            Err(_) => Err(RelayError::Timeout(addr)),
            Ok(Err(e)) => Err(classify(addr, e)),
            Ok(Ok(stream)) => Ok(stream),
        }
    }

    /// Write the whole job, chunk by chunk; returns bytes sent
    #[instrument(skip(self, bytes), fields(len = bytes.len()))]
    pub async fn send(&self, addr: SocketAddr, bytes: &[u8]) -> RelayResult<usize> {
        let mut stream = self.open(addr, self.connect_timeout).await?;

        let mut sent = 0;
        for chunk in bytes.chunks(self.chunk_size) {
            match timeout(self.connect_timeout, stream.write_all(chunk)).await {
                Err(_) => return Err(RelayError::Timeout(addr)),
                Ok(Err(e)) => return Err(classify(addr, e)),
                Ok(Ok(())) => sent += chunk.len(),
            }
        }

        stream.flush().await.map_err(|e| classify(addr, e))?;
        // Printer may already have hung up; the bytes are out
        let _ = stream.shutdown().await;

        info!(%addr, bytes = sent, "Print job delivered");
        Ok(sent)
    }

    /// Open and immediately close a connection
    #[instrument(skip(self))]
    pub async fn probe(&self, addr: SocketAddr) -> RelayResult<()> {
        let mut stream = self.open(addr, self.probe_timeout).await?;
        let _ = stream.shutdown().await;
        Ok(())
    }
}

fn classify(addr: SocketAddr, e: std::io::Error) -> RelayError {
    match e.kind() {
        std::io::ErrorKind::ConnectionRefused => RelayError::Refused(addr),
        std::io::ErrorKind::TimedOut => RelayError::Timeout(addr),
        _ => RelayError::Io { addr, source: e },
    }
}
