//! Printer manager
//!
//! Public face of the link layer: owns the registry, one state machine per
//! printer, the cross-context listener and the liveness monitor.
//!
//! ```text
//! PrinterManager
//!   ├── Registry ──────────── SnapshotStore
//!   ├── PrinterMachine × N ── Transport / Link
//!   ├── context listener ──── ContextBus
//!   └── liveness monitor
//! ```

use async_trait::async_trait;
use crab_printer::transport::parse_socket_addr;
use crab_printer::{PrintPayload, Transport};
use futures::future::join_all;
use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use shared::message::{ContextMessage, StatusEvent};
use shared::models::{PrinterKind, PrinterRecord, PrinterStatus};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Notify, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::LinkConfig;
use crate::error::{LinkError, LinkResult};
use crate::machine::{ConnectOutcome, MachineContext, PrinterMachine, Trigger};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::monitor::{LivenessTarget, Visibility, spawn_monitor};
use crate::notifier::{ContextBus, ContextNotifier, LocalBus};
use crate::picker::{DevicePicker, NoPicker};
use crate::pipeline::{ChannelResolver, DeliveryReport};
use crate::registry::Registry;
use crate::store::SnapshotStore;

/// Per-printer result of a fleet print
#[derive(Debug, Clone, Serialize)]
pub struct PrintOutcome {
    pub printer_id: String,
    pub name: String,
    pub success: bool,
    pub error: Option<String>,
}

/// Per-printer result of a fleet reconnect
#[derive(Debug, Clone, Serialize)]
pub struct ReconnectOutcome {
    pub printer_id: String,
    pub name: String,
    pub connected: bool,
    pub error: Option<String>,
}

/// Counts by status plus rolling metrics
#[derive(Debug, Clone, Serialize)]
pub struct StatusSummary {
    pub total: usize,
    pub connected: usize,
    pub connecting: usize,
    pub disconnected: usize,
    pub failed: usize,
    pub metrics: MetricsSnapshot,
}

/// Check a user-supplied address for a printer kind and return its canonical form
pub fn validate_address(kind: PrinterKind, address: &str) -> LinkResult<String> {
    let trimmed = address.trim();
    if trimmed.is_empty() {
        return Err(LinkError::InvalidAddress("address is empty".to_string()));
    }

    match kind {
        PrinterKind::NetworkSocket => parse_socket_addr(trimmed)
            .map(|addr| addr.to_string())
            .map_err(|e| LinkError::InvalidAddress(e.to_string())),
        PrinterKind::RadioLink if trimmed.chars().any(char::is_whitespace) => Err(
            LinkError::InvalidAddress(format!("invalid device id: {}", trimmed)),
        ),
        _ => Ok(kind.normalize_address(trimmed)),
    }
}

// ==================== Builder ====================

pub struct PrinterManagerBuilder {
    config: LinkConfig,
    store: Arc<dyn SnapshotStore>,
    transports: HashMap<PrinterKind, Arc<dyn Transport>>,
    picker: Arc<dyn DevicePicker>,
    bus: Option<Arc<dyn ContextBus>>,
    resolver: ChannelResolver,
}

impl PrinterManagerBuilder {
    /// Register a transport; a later one for the same kind replaces the earlier
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transports.insert(transport.kind(), transport);
        self
    }

    pub fn picker(mut self, picker: Arc<dyn DevicePicker>) -> Self {
        self.picker = picker;
        self
    }

    /// Bus shared with sibling contexts; defaults to a private one
    pub fn bus(mut self, bus: Arc<dyn ContextBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn channel_resolver(mut self, resolver: ChannelResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Load the snapshot and start background tasks
    ///
    /// Must be called inside a tokio runtime.
    pub fn build(self) -> LinkResult<PrinterManager> {
        let config = Arc::new(self.config);
        let registry = Arc::new(Registry::new(self.store, config.snapshot_key.clone()));
        let loaded = registry.load_snapshot()?;

        let bus = self
            .bus
            .unwrap_or_else(|| Arc::new(LocalBus::new()) as Arc<dyn ContextBus>);
        let notifier = Arc::new(ContextNotifier::new(bus, config.context_topic.clone()));
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        let ctx = MachineContext {
            registry: registry.clone(),
            transports: Arc::new(self.transports),
            picker: self.picker,
            notifier: notifier.clone(),
            events: events.clone(),
            config: config.clone(),
            metrics: Arc::new(Metrics::new(config.metrics_window)),
            resolver: Arc::new(self.resolver),
        };

        let machines = registry
            .list()
            .into_iter()
            .map(|r| (r.id.clone(), PrinterMachine::spawn(r.id, ctx.clone())))
            .collect();

        let inner = Arc::new(Inner {
            config,
            registry,
            ctx,
            machines: Mutex::new(machines),
            notifier,
            events,
            shutdown: CancellationToken::new(),
            nudge: Arc::new(Notify::new()),
            visibility: Mutex::new(Visibility::Visible),
        });

        spawn_context_listener(&inner);
        spawn_monitor(
            Arc::downgrade(&inner),
            inner.config.liveness_interval,
            inner.config.visibility_debounce,
            inner.nudge.clone(),
            inner.shutdown.clone(),
        );

        info!(
            printers = loaded,
            transports = inner.ctx.transports.len(),
            context = %inner.notifier.origin(),
            "Printer manager started"
        );
        Ok(PrinterManager { inner })
    }
}

// ==================== Manager ====================

struct Inner {
    config: Arc<LinkConfig>,
    registry: Arc<Registry>,
    ctx: MachineContext,
    machines: Mutex<HashMap<String, PrinterMachine>>,
    notifier: Arc<ContextNotifier>,
    events: broadcast::Sender<StatusEvent>,
    shutdown: CancellationToken,
    nudge: Arc<Notify>,
    visibility: Mutex<Visibility>,
}

impl Inner {
    fn ensure_machine(&self, id: &str) -> PrinterMachine {
        self.machines
            .lock()
            .entry(id.to_string())
            .or_insert_with(|| PrinterMachine::spawn(id.to_string(), self.ctx.clone()))
            .clone()
    }

    fn machine(&self, id: &str) -> LinkResult<PrinterMachine> {
        if self.registry.get(id).is_none() {
            return Err(LinkError::UnknownPrinter(id.to_string()));
        }
        Ok(self.ensure_machine(id))
    }

    /// Route a message from another context to the matching printer
    fn reconcile(&self, message: ContextMessage) {
        let remote = message.printer().clone();
        let local = self
            .registry
            .get(&remote.id)
            .or_else(|| self.registry.find_endpoint(remote.kind, &remote.address));

        match local {
            Some(record) => self.ensure_machine(&record.id).reconcile(message),
            None if message.is_connect() && remote.shared => {
                let record = self.registry.upsert(remote.into_record());
                self.ensure_machine(&record.id);
                info!(printer_id = %record.id, name = %record.name, "Printer learned from another context");
            }
            None => debug!(printer_id = %remote.id, %message, "Context message for unknown printer ignored"),
        }
    }
}

#[async_trait]
impl LivenessTarget for Inner {
    async fn check_links(&self) -> usize {
        let targets: Vec<PrinterMachine> = {
            let machines = self.machines.lock();
            self.registry
                .list_by_status(PrinterStatus::Connected)
                .iter()
                .filter_map(|r| machines.get(&r.id).cloned())
                .collect()
        };

        join_all(targets.iter().map(|m| m.check_liveness()))
            .await
            .into_iter()
            .filter(|alive| matches!(alive, Ok(false)))
            .count()
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn spawn_context_listener(inner: &Arc<Inner>) {
    // Subscribe before anything can be published
    let mut subscription = inner.notifier.subscribe();
    let weak: Weak<Inner> = Arc::downgrade(inner);
    let shutdown = inner.shutdown.clone();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                message = subscription.recv() => {
                    let Some(message) = message else { break };
                    let Some(inner) = weak.upgrade() else { break };
                    inner.reconcile(message);
                }
            }
        }
        debug!("Context listener stopped");
    });
}

/// Handle to the link layer; clones share state
#[derive(Clone)]
pub struct PrinterManager {
    inner: Arc<Inner>,
}

impl PrinterManager {
    pub fn builder(config: LinkConfig, store: Arc<dyn SnapshotStore>) -> PrinterManagerBuilder {
        PrinterManagerBuilder {
            config,
            store,
            transports: HashMap::new(),
            picker: Arc::new(NoPicker),
            bus: None,
            resolver: ChannelResolver::standard(),
        }
    }

    /// Id this context stamps on its cross-context messages
    pub fn context_id(&self) -> Uuid {
        self.inner.notifier.origin()
    }

    pub fn config(&self) -> &LinkConfig {
        &self.inner.config
    }

    // ---------- registry ----------

    /// Add a printer by address without connecting
    ///
    /// Registering an existing `(address, kind)` updates that printer.
    #[instrument(skip(self))]
    pub fn register(&self, kind: PrinterKind, address: &str, name: &str) -> LinkResult<PrinterRecord> {
        let address = validate_address(kind, address)?;
        let record = self.inner.registry.upsert(PrinterRecord::new(kind, &address, name));
        self.inner.registry.save_snapshot()?;
        self.inner.ensure_machine(&record.id);
        Ok(record)
    }

    pub fn printers(&self) -> Vec<PrinterRecord> {
        self.inner.registry.list()
    }

    pub fn printer(&self, id: &str) -> Option<PrinterRecord> {
        self.inner.registry.get(id)
    }

    pub fn connected_printers(&self) -> Vec<PrinterRecord> {
        self.inner.registry.list_by_status(PrinterStatus::Connected)
    }

    pub fn status_summary(&self) -> StatusSummary {
        let records = self.inner.registry.list();
        let count = |status: PrinterStatus| records.iter().filter(|r| r.status == status).count();
        StatusSummary {
            total: records.len(),
            connected: count(PrinterStatus::Connected),
            connecting: count(PrinterStatus::Connecting),
            disconnected: count(PrinterStatus::Disconnected),
            failed: count(PrinterStatus::Failed),
            metrics: self.inner.ctx.metrics.snapshot(),
        }
    }

    /// Status events for the UI layer
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.inner.events.subscribe()
    }

    // ---------- connection ----------

    /// Discover devices, let the user pick one, register and connect it
    ///
    /// A newly created record is removed again if the first connection fails.
    #[instrument(skip(self))]
    pub async fn pair(&self, kind: PrinterKind) -> LinkResult<ConnectOutcome> {
        let transport = self.inner.ctx.transports.get(&kind).cloned().ok_or_else(|| {
            LinkError::NotSupported(format!("no {} transport configured", kind))
        })?;

        let candidates = transport.discover().await.map_err(LinkError::from_open)?;
        debug!(candidates = candidates.len(), "Devices discovered");

        let Some(device) = self.inner.ctx.picker.pick(kind, candidates).await else {
            info!("Pairing cancelled");
            return Ok(ConnectOutcome::Cancelled);
        };

        let (id, fresh) = match self.inner.registry.find_endpoint(kind, &device.address) {
            Some(existing) => (existing.id, false),
            None => {
                let record = self
                    .inner
                    .registry
                    .upsert(PrinterRecord::new(kind, &device.address, device.label()));
                (record.id, true)
            }
        };

        let machine = self.inner.ensure_machine(&id);
        match machine.connect(false, Some(device), Trigger::User).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                if fresh {
                    self.discard(&id).await;
                }
                Err(e)
            }
        }
    }

    /// Connect one printer, prompting the user if it cannot be found silently
    pub async fn connect(&self, id: &str, allow_prompt: bool) -> LinkResult<ConnectOutcome> {
        self.inner
            .machine(id)?
            .connect(allow_prompt, None, Trigger::User)
            .await
    }

    /// Reconnect every disconnected printer without prompting
    ///
    /// Attempts are staggered by index plus random jitter and run concurrently.
    #[instrument(skip(self))]
    pub async fn reconnect_all(&self) -> Vec<ReconnectOutcome> {
        let targets = self.inner.registry.list_by_status(PrinterStatus::Disconnected);
        let step = self.inner.config.reconnect_stagger;
        let jitter_ms = self.inner.config.reconnect_jitter.as_millis() as u64;
        info!(count = targets.len(), "Reconnecting printers");

        let attempts = targets.into_iter().enumerate().map(|(index, record)| {
            let jitter = if jitter_ms == 0 {
                0
            } else {
                rand::thread_rng().gen_range(0..=jitter_ms)
            };
            let delay = step * index as u32 + Duration::from_millis(jitter);
            let machine = self.inner.machine(&record.id);

            async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let result = match machine {
                    Ok(machine) => machine.connect(false, None, Trigger::Fleet).await,
                    Err(e) => Err(e),
                };
                match result {
                    Ok(outcome) => ReconnectOutcome {
                        printer_id: record.id,
                        name: record.name,
                        connected: outcome.is_connected(),
                        error: None,
                    },
                    Err(e) => ReconnectOutcome {
                        printer_id: record.id,
                        name: record.name,
                        connected: false,
                        error: Some(e.to_string()),
                    },
                }
            }
        });

        join_all(attempts).await
    }

    /// Close the link and keep the printer
    pub async fn disconnect(&self, id: &str) -> LinkResult<()> {
        self.inner.machine(id)?.disconnect(false).await
    }

    /// Close the link and remove the printer
    pub async fn forget(&self, id: &str) -> LinkResult<()> {
        let machine = self.inner.machine(id)?;
        let result = machine.disconnect(true).await;
        if self.inner.registry.get(id).is_none() {
            self.inner.machines.lock().remove(id);
        }
        result
    }

    /// Disconnect (or forget) every printer; returns per-printer failures
    pub async fn disconnect_all(&self, forget: bool) -> Vec<(String, LinkError)> {
        let ids: Vec<String> = self.inner.registry.list().into_iter().map(|r| r.id).collect();
        let results = join_all(ids.iter().map(|id| async move {
            let result = if forget {
                self.forget(id).await
            } else {
                self.disconnect(id).await
            };
            (id.clone(), result)
        }))
        .await;

        results
            .into_iter()
            .filter_map(|(id, result)| result.err().map(|e| (id, e)))
            .collect()
    }

    async fn discard(&self, id: &str) {
        let machine = self.inner.machines.lock().remove(id);
        if let Some(machine) = machine {
            machine.shutdown().await;
        }
        if self.inner.registry.remove(id).is_some() {
            debug!(printer_id = %id, "Discarded unconfirmed printer");
            if let Err(e) = self.inner.registry.save_snapshot() {
                warn!(error = %e, "Failed to persist printer snapshot");
            }
        }
    }

    // ---------- printing ----------

    /// Print on one connected printer
    pub async fn print_one(&self, id: &str, payload: &PrintPayload) -> LinkResult<DeliveryReport> {
        let machine = self.inner.machine(id)?;
        let bytes: Arc<[u8]> = payload.encode(&self.inner.config.framing).into();
        machine.print(bytes).await
    }

    /// Print the same payload on every connected printer concurrently
    ///
    /// One printer failing does not affect the others.
    #[instrument(skip(self, payload))]
    pub async fn print_all(&self, payload: &PrintPayload) -> LinkResult<Vec<PrintOutcome>> {
        let targets = self.connected_printers();
        if targets.is_empty() {
            return Err(LinkError::NoEligiblePrinters);
        }

        let bytes: Arc<[u8]> = payload.encode(&self.inner.config.framing).into();
        let jobs = targets.into_iter().map(|record| {
            let machine = self.inner.machine(&record.id);
            let bytes = bytes.clone();
            async move {
                let result = match machine {
                    Ok(machine) => machine.print(bytes).await,
                    Err(e) => Err(e),
                };
                PrintOutcome {
                    printer_id: record.id,
                    name: record.name,
                    success: result.is_ok(),
                    error: result.err().map(|e| e.to_string()),
                }
            }
        });

        let outcomes = join_all(jobs).await;
        let failed = outcomes.iter().filter(|o| !o.success).count();
        info!(total = outcomes.len(), failed, "Fleet print finished");
        Ok(outcomes)
    }

    // ---------- liveness ----------

    /// Run a liveness check now; returns how many links were found dead
    pub async fn check_liveness(&self) -> usize {
        self.inner.check_links().await
    }

    /// Report foreground/background changes; returning to the foreground
    /// schedules a debounced liveness check
    pub fn set_visibility(&self, visibility: Visibility) {
        let previous = std::mem::replace(&mut *self.inner.visibility.lock(), visibility);
        if previous == Visibility::Hidden && visibility == Visibility::Visible {
            self.inner.nudge.notify_one();
        }
    }

    /// Stop background tasks and close every link
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let machines: Vec<PrinterMachine> = self.inner.machines.lock().drain().map(|(_, m)| m).collect();
        join_all(machines.iter().map(|m| m.shutdown())).await;
        info!(printers = machines.len(), "Printer manager stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_network_address() {
        assert_eq!(
            validate_address(PrinterKind::NetworkSocket, "192.168.1.50").unwrap(),
            "192.168.1.50:9100"
        );
        assert!(validate_address(PrinterKind::NetworkSocket, "not an ip").is_err());
    }

    #[test]
    fn test_validate_radio_address() {
        assert_eq!(
            validate_address(PrinterKind::RadioLink, " aa:bb:cc:dd:ee:ff ").unwrap(),
            "AA:BB:CC:DD:EE:FF"
        );
        assert!(validate_address(PrinterKind::RadioLink, "AA BB").is_err());
        assert!(validate_address(PrinterKind::Serial, "   ").is_err());
    }
}
