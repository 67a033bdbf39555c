//! Test doubles for the link layer
//!
//! A scripted transport whose links record every write, a store that
//! counts snapshot writes and a picker that returns a fixed answer.

#![allow(dead_code)]

use async_trait::async_trait;
use crab_link::{
    DevicePicker, LinkConfig, MemoryStore, PrinterManager, SnapshotStore, StoreResult,
};
use crab_printer::{
    Channel, DeviceCandidate, DropNotifier, DropSignal, KNOWN_CHANNELS, Link, Transport,
    TransportError, TransportResult, WriteMode,
};
use parking_lot::Mutex;
use shared::message::{StatusEvent, StatusEventKind};
use shared::models::{PrinterKind, PrinterRecord};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

// ==================== Links ====================

#[derive(Debug, Clone)]
pub struct WriteRecord {
    pub bytes: Vec<u8>,
    pub mode: WriteMode,
    pub at: Instant,
    pub ok: bool,
}

/// Shared state of one mock link, kept by the test after the link is moved
pub struct LinkState {
    pub address: String,
    pub channels: Vec<Channel>,
    pub writes: Mutex<Vec<WriteRecord>>,
    /// Fail the write with this index (0-based, counting attempts)
    pub fail_at: Mutex<Option<usize>>,
    pub rejected_modes: Mutex<Vec<WriteMode>>,
    pub alive: AtomicBool,
    pub closed: AtomicBool,
    pub notifier: DropNotifier,
}

impl LinkState {
    fn new(address: &str, channels: Vec<Channel>, rejected_modes: Vec<WriteMode>) -> Self {
        Self {
            address: address.to_string(),
            channels,
            writes: Mutex::new(Vec::new()),
            fail_at: Mutex::new(None),
            rejected_modes: Mutex::new(rejected_modes),
            alive: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            notifier: DropNotifier::new(),
        }
    }

    /// Simulate the device going away
    pub fn drop_link(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.notifier.notify();
    }

    /// Device stops answering without any notification
    pub fn go_silent(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub fn fail_write(&self, index: usize) {
        *self.fail_at.lock() = Some(index);
    }

    pub fn successful_writes(&self) -> Vec<WriteRecord> {
        self.writes.lock().iter().filter(|w| w.ok).cloned().collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct RecordingLink {
    state: Arc<LinkState>,
}

#[async_trait]
impl Link for RecordingLink {
    fn address(&self) -> &str {
        &self.state.address
    }

    fn channels(&self) -> Vec<Channel> {
        self.state.channels.clone()
    }

    async fn write_chunk(
        &self,
        _channel: &Channel,
        bytes: &[u8],
        mode: WriteMode,
    ) -> TransportResult<()> {
        let mut writes = self.state.writes.lock();
        let index = writes.len();
        let rejected = self.state.rejected_modes.lock().contains(&mode);
        let fail = rejected || *self.state.fail_at.lock() == Some(index);

        writes.push(WriteRecord {
            bytes: bytes.to_vec(),
            mode,
            at: Instant::now(),
            ok: !fail,
        });

        if rejected {
            Err(TransportError::NotSupported(format!("{} rejected", mode)))
        } else if fail {
            Err(TransportError::WriteFailure("scripted failure".to_string()))
        } else {
            Ok(())
        }
    }

    async fn is_alive(&self) -> bool {
        self.state.alive.load(Ordering::SeqCst)
    }

    fn on_drop(&self) -> DropSignal {
        self.state.notifier.subscribe()
    }

    async fn close(&self) -> TransportResult<()> {
        self.state.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ==================== Transport ====================

/// Scripted result of one `open` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenStep {
    Succeed,
    NotFound,
    PermissionDenied,
    /// Never answers
    Hang,
}

#[derive(Default)]
struct MockState {
    known: Vec<DeviceCandidate>,
    discovered: Vec<DeviceCandidate>,
    script: VecDeque<OpenStep>,
    opens: Vec<(String, Instant)>,
    links: Vec<Arc<LinkState>>,
    channels: Vec<Channel>,
    rejected_modes: Vec<WriteMode>,
}

#[derive(Clone)]
pub struct MockTransport {
    kind: PrinterKind,
    chunk_size: Option<usize>,
    by_address: bool,
    state: Arc<Mutex<MockState>>,
}

/// Highest-priority well-known channel, writable both ways
pub fn known_channel() -> Channel {
    let (service, characteristic) = KNOWN_CHANNELS[0];
    Channel::new(
        service,
        characteristic,
        vec![WriteMode::WithoutResponse, WriteMode::WithResponse],
    )
}

impl MockTransport {
    /// Radio-style transport: grant list, 244-byte chunks
    pub fn radio() -> Self {
        Self::build(PrinterKind::RadioLink, Some(244), false, vec![known_channel()])
    }

    /// Socket-style transport: opens any address, no chunk limit
    pub fn network() -> Self {
        Self::build(PrinterKind::NetworkSocket, None, true, vec![Channel::stream()])
    }

    fn build(kind: PrinterKind, chunk_size: Option<usize>, by_address: bool, channels: Vec<Channel>) -> Self {
        Self {
            kind,
            chunk_size,
            by_address,
            state: Arc::new(Mutex::new(MockState {
                channels,
                ..Default::default()
            })),
        }
    }

    pub fn grant(&self, address: &str, name: &str) -> &Self {
        self.state
            .lock()
            .known
            .push(DeviceCandidate::new(address, Some(name.to_string())));
        self
    }

    pub fn revoke_all(&self) {
        self.state.lock().known.clear();
    }

    pub fn advertise(&self, address: &str, name: &str) -> &Self {
        self.state
            .lock()
            .discovered
            .push(DeviceCandidate::new(address, Some(name.to_string())));
        self
    }

    pub fn script(&self, steps: &[OpenStep]) {
        self.state.lock().script.extend(steps.iter().copied());
    }

    pub fn set_channels(&self, channels: Vec<Channel>) {
        self.state.lock().channels = channels;
    }

    pub fn reject_mode(&self, mode: WriteMode) {
        self.state.lock().rejected_modes.push(mode);
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().opens.len()
    }

    pub fn opens(&self) -> Vec<(String, Instant)> {
        self.state.lock().opens.clone()
    }

    pub fn links(&self) -> Vec<Arc<LinkState>> {
        self.state.lock().links.clone()
    }

    pub fn last_link(&self) -> Arc<LinkState> {
        self.state
            .lock()
            .links
            .last()
            .cloned()
            .expect("no link opened")
    }

    /// Most recent link opened on an address
    pub fn link_for(&self, address: &str) -> Arc<LinkState> {
        self.state
            .lock()
            .links
            .iter()
            .rev()
            .find(|l| l.address == address)
            .cloned()
            .expect("no link for address")
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn kind(&self) -> PrinterKind {
        self.kind
    }

    fn chunk_size(&self) -> Option<usize> {
        self.chunk_size
    }

    fn opens_by_address(&self) -> bool {
        self.by_address
    }

    async fn known_devices(&self) -> TransportResult<Vec<DeviceCandidate>> {
        Ok(self.state.lock().known.clone())
    }

    async fn discover(&self) -> TransportResult<Vec<DeviceCandidate>> {
        Ok(self.state.lock().discovered.clone())
    }

    async fn open(&self, device: &DeviceCandidate) -> TransportResult<Box<dyn Link>> {
        let step = {
            let mut state = self.state.lock();
            state.opens.push((device.address.clone(), Instant::now()));
            state.script.pop_front().unwrap_or(OpenStep::Succeed)
        };

        match step {
            OpenStep::Succeed => {
                let mut state = self.state.lock();
                let link = Arc::new(LinkState::new(
                    &device.address,
                    state.channels.clone(),
                    state.rejected_modes.clone(),
                ));
                state.links.push(link.clone());
                Ok(Box::new(RecordingLink { state: link }))
            }
            OpenStep::NotFound => Err(TransportError::NotFound(device.address.clone())),
            OpenStep::PermissionDenied => {
                Err(TransportError::PermissionDenied(device.address.clone()))
            }
            OpenStep::Hang => std::future::pending().await,
        }
    }
}

// ==================== Store ====================

/// Memory store that keeps every snapshot written
#[derive(Clone, Default)]
pub struct CountingStore {
    inner: MemoryStore,
    saves: Arc<Mutex<Vec<String>>>,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_count(&self) -> usize {
        self.saves.lock().len()
    }

    /// Records in the most recent snapshot
    pub fn last_snapshot(&self) -> Vec<PrinterRecord> {
        self.saves
            .lock()
            .last()
            .map(|json| serde_json::from_str(json).expect("snapshot is valid json"))
            .unwrap_or_default()
    }
}

impl SnapshotStore for CountingStore {
    fn load(&self, key: &str) -> StoreResult<Option<String>> {
        self.inner.load(key)
    }

    fn save(&self, key: &str, value: &str) -> StoreResult<()> {
        self.saves.lock().push(value.to_string());
        self.inner.save(key, value)
    }
}

// ==================== Picker ====================

pub struct ScriptedPicker {
    answer: Option<DeviceCandidate>,
    calls: AtomicUsize,
}

impl ScriptedPicker {
    pub fn choose(address: &str, name: &str) -> Arc<Self> {
        Arc::new(Self {
            answer: Some(DeviceCandidate::new(address, Some(name.to_string()))),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn cancel() -> Arc<Self> {
        Arc::new(Self {
            answer: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DevicePicker for ScriptedPicker {
    async fn pick(
        &self,
        _kind: PrinterKind,
        _candidates: Vec<DeviceCandidate>,
    ) -> Option<DeviceCandidate> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answer.clone()
    }
}

// ==================== Helpers ====================

/// Config with no pacing, no stagger and no jitter
pub fn fast_config() -> LinkConfig {
    LinkConfig::default()
        .with_chunking(244, Duration::ZERO)
        .with_stagger(Duration::ZERO, Duration::ZERO)
}

pub fn manager_with(
    config: LinkConfig,
    store: Arc<dyn SnapshotStore>,
    transport: &MockTransport,
) -> PrinterManager {
    PrinterManager::builder(config, store)
        .transport(Arc::new(transport.clone()))
        .build()
        .expect("manager builds")
}

/// Wait for the next event of a kind, skipping others
pub async fn next_event(
    events: &mut broadcast::Receiver<StatusEvent>,
    kind: StatusEventKind,
) -> StatusEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if event.kind == kind => return event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("event channel closed: {}", e),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no {} event", kind))
}

/// Poll until `check` holds
pub async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never held");
}
