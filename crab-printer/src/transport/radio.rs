//! Radio-link (BLE) transport
//!
//! Receipt printers expose a writable GATT characteristic. Writes are
//! limited to [`RADIO_CHUNK_SIZE`] bytes; the adapter's central event
//! stream tells us when the peripheral disconnects.

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use shared::models::PrinterKind;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::{
    Channel, DeviceCandidate, DropNotifier, DropSignal, Link, RADIO_CHUNK_SIZE, Transport,
    WriteMode,
};
use crate::error::{TransportError, TransportResult};

fn map_ble_error(e: btleplug::Error) -> TransportError {
    match e {
        btleplug::Error::PermissionDenied => {
            TransportError::PermissionDenied("bluetooth access refused".to_string())
        }
        btleplug::Error::DeviceNotFound => TransportError::NotFound("device not found".to_string()),
        btleplug::Error::NotSupported(what) => TransportError::NotSupported(what),
        btleplug::Error::TimedOut(d) => TransportError::Timeout(format!("after {:?}", d)),
        btleplug::Error::NotConnected => TransportError::Closed("not connected".to_string()),
        other => TransportError::Io(std::io::Error::other(other.to_string())),
    }
}

/// BLE transport over the first system adapter
#[derive(Clone)]
pub struct RadioTransport {
    adapter: Adapter,
    scan_window: Duration,
}

impl RadioTransport {
    /// Use the first bluetooth adapter on this machine
    pub async fn new() -> TransportResult<Self> {
        let manager = Manager::new().await.map_err(map_ble_error)?;
        let adapter = manager
            .adapters()
            .await
            .map_err(map_ble_error)?
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::NotSupported("no bluetooth adapter".to_string()))?;
        Ok(Self {
            adapter,
            scan_window: Duration::from_secs(3),
        })
    }

    /// How long discovery scans before listing peripherals
    pub fn with_scan_window(mut self, window: Duration) -> Self {
        self.scan_window = window;
        self
    }

    async fn candidates(&self) -> TransportResult<Vec<(Peripheral, DeviceCandidate)>> {
        let peripherals = self.adapter.peripherals().await.map_err(map_ble_error)?;
        let mut out = Vec::with_capacity(peripherals.len());
        for p in peripherals {
            let name = p
                .properties()
                .await
                .ok()
                .flatten()
                .and_then(|props| props.local_name);
            let address = p.address().to_string().to_ascii_uppercase();
            out.push((p, DeviceCandidate::new(address, name)));
        }
        Ok(out)
    }

    async fn find(&self, device: &DeviceCandidate) -> TransportResult<Peripheral> {
        let wanted = device.address.to_ascii_uppercase();
        self.candidates()
            .await?
            .into_iter()
            .find(|(_, c)| c.address == wanted)
            .map(|(p, _)| p)
            .ok_or_else(|| TransportError::NotFound(device.address.clone()))
    }
}

#[async_trait]
impl Transport for RadioTransport {
    fn kind(&self) -> PrinterKind {
        PrinterKind::RadioLink
    }

    fn chunk_size(&self) -> Option<usize> {
        Some(RADIO_CHUNK_SIZE)
    }

    fn opens_by_address(&self) -> bool {
        false
    }

    /// Peripherals the adapter already knows, without scanning
    async fn known_devices(&self) -> TransportResult<Vec<DeviceCandidate>> {
        Ok(self.candidates().await?.into_iter().map(|(_, c)| c).collect())
    }

    #[instrument(skip(self))]
    async fn discover(&self) -> TransportResult<Vec<DeviceCandidate>> {
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(map_ble_error)?;
        tokio::time::sleep(self.scan_window).await;
        let _ = self.adapter.stop_scan().await;

        let found: Vec<DeviceCandidate> = self
            .candidates()
            .await?
            .into_iter()
            .map(|(_, c)| c)
            .collect();
        info!(count = found.len(), "Scan finished");
        Ok(found)
    }

    #[instrument(skip(self), fields(addr = %device.address))]
    async fn open(&self, device: &DeviceCandidate) -> TransportResult<Box<dyn Link>> {
        let peripheral = self.find(device).await?;

        // Subscribe before connecting so a disconnect during setup is seen
        let alive = Arc::new(AtomicBool::new(true));
        let notifier = DropNotifier::new();
        let events = self.adapter.events().await.map_err(map_ble_error)?;
        let id = peripheral.id();
        let watcher = watch_disconnect(
            events,
            move |event: &CentralEvent| {
                matches!(event, CentralEvent::DeviceDisconnected(gone) if *gone == id)
            },
            alive.clone(),
            notifier.clone(),
        );

        let setup = async {
            if !peripheral.is_connected().await? {
                peripheral.connect().await?;
            }
            peripheral.discover_services().await
        };
        if let Err(e) = setup.await {
            watcher.abort();
            return Err(map_ble_error(e));
        }

        let characteristics: Vec<Characteristic> = peripheral.characteristics().into_iter().collect();
        info!(characteristics = characteristics.len(), "Connected, services discovered");

        Ok(Box::new(RadioLink {
            address: device.address.to_ascii_uppercase(),
            peripheral,
            characteristics,
            alive,
            notifier,
            watcher,
        }))
    }
}

/// Fire `notifier` on the first event that reports the peripheral gone
fn watch_disconnect<S, E>(
    mut events: S,
    is_gone: impl Fn(&E) -> bool + Send + 'static,
    alive: Arc<AtomicBool>,
    notifier: DropNotifier,
) -> JoinHandle<()>
where
    S: futures::Stream<Item = E> + Send + Unpin + 'static,
    E: Send + 'static,
{
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            if is_gone(&event) {
                debug!("Peripheral disconnected");
                alive.store(false, Ordering::SeqCst);
                notifier.notify();
                break;
            }
        }
    })
}

/// Connected BLE peripheral
pub struct RadioLink {
    address: String,
    peripheral: Peripheral,
    characteristics: Vec<Characteristic>,
    alive: Arc<AtomicBool>,
    notifier: DropNotifier,
    watcher: JoinHandle<()>,
}

fn channel_of(c: &Characteristic) -> Channel {
    let mut modes = Vec::new();
    if c.properties.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE) {
        modes.push(WriteMode::WithoutResponse);
    }
    if c.properties.contains(CharPropFlags::WRITE) {
        modes.push(WriteMode::WithResponse);
    }
    Channel::new(c.service_uuid, c.uuid, modes)
}

#[async_trait]
impl Link for RadioLink {
    fn address(&self) -> &str {
        &self.address
    }

    fn channels(&self) -> Vec<Channel> {
        self.characteristics.iter().map(channel_of).collect()
    }

    #[instrument(skip(self, bytes), fields(addr = %self.address, channel = %channel, len = bytes.len()))]
    async fn write_chunk(
        &self,
        channel: &Channel,
        bytes: &[u8],
        mode: WriteMode,
    ) -> TransportResult<()> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::Closed(self.address.clone()));
        }
        let characteristic = self
            .characteristics
            .iter()
            .find(|c| c.uuid == channel.characteristic && c.service_uuid == channel.service)
            .ok_or_else(|| TransportError::WriteFailure(format!("unknown channel {}", channel)))?;

        let write_type = match mode {
            WriteMode::WithoutResponse => WriteType::WithoutResponse,
            WriteMode::WithResponse => WriteType::WithResponse,
        };

        self.peripheral
            .write(characteristic, bytes, write_type)
            .await
            .map_err(|e| match e {
                btleplug::Error::NotConnected => {
                    warn!("Write on disconnected peripheral");
                    TransportError::Closed(self.address.clone())
                }
                other => TransportError::WriteFailure(other.to_string()),
            })
    }

    async fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && self.peripheral.is_connected().await.unwrap_or(false)
    }

    fn on_drop(&self) -> DropSignal {
        self.notifier.subscribe()
    }

    async fn close(&self) -> TransportResult<()> {
        self.alive.store(false, Ordering::SeqCst);
        self.watcher.abort();
        self.peripheral.disconnect().await.map_err(map_ble_error)?;
        info!(addr = %self.address, "Peripheral disconnected");
        Ok(())
    }
}

impl Drop for RadioLink {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}
