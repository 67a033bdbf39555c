//! Per-printer connection state machine
//!
//! 每台打印机一个 actor 任务：同一台打印机上的所有操作 (连接、打印、
//! 掉线处理、断开) 经由邮箱串行执行，不加锁。不同打印机之间互不阻塞。
//!
//! ```text
//! Disconnected -> Connecting -> Connected
//!                     |             |
//!                     v             | link drop
//!                   Failed -> Disconnected <-+
//! ```

use crab_printer::{DeviceCandidate, DropSignal, Link, Transport};
use shared::message::{ContextMessage, StatusEvent, StatusEventKind};
use shared::models::{PrinterKind, PrinterRecord, PrinterStatus};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::LinkConfig;
use crate::error::{LinkError, LinkResult};
use crate::metrics::Metrics;
use crate::notifier::ContextNotifier;
use crate::picker::DevicePicker;
use crate::pipeline::{ChannelResolver, ChunkPlan, DeliveryReport, deliver};
use crate::registry::Registry;

/// Result of a connect request that did not fail
#[derive(Debug, Clone)]
pub enum ConnectOutcome {
    Connected(PrinterRecord),
    /// The user dismissed the device picker
    Cancelled,
}

impl ConnectOutcome {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_))
    }
}

/// Who asked for a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Trigger {
    User,
    Fleet,
    /// Scheduled retry after a drop
    Auto,
}

/// Pick the candidate that is this printer
///
/// Exact address first, then exact name. A name match is only accepted when
/// its address is not in `claimed` (addresses owned by other printers).
/// Anything else is a different device.
pub fn match_candidate(
    record: &PrinterRecord,
    candidates: &[DeviceCandidate],
    claimed: &HashSet<String>,
) -> Option<DeviceCandidate> {
    candidates
        .iter()
        .find(|c| record.kind.normalize_address(&c.address) == record.address)
        .or_else(|| {
            candidates.iter().find(|c| {
                c.name.as_deref() == Some(record.name.as_str())
                    && !claimed.contains(&record.kind.normalize_address(&c.address))
            })
        })
        .cloned()
}

/// Collaborators shared by every machine
#[derive(Clone)]
pub(crate) struct MachineContext {
    pub registry: Arc<Registry>,
    pub transports: Arc<HashMap<PrinterKind, Arc<dyn Transport>>>,
    pub picker: Arc<dyn DevicePicker>,
    pub notifier: Arc<ContextNotifier>,
    pub events: broadcast::Sender<StatusEvent>,
    pub config: Arc<LinkConfig>,
    pub metrics: Arc<Metrics>,
    pub resolver: Arc<ChannelResolver>,
}

impl MachineContext {
    fn transport(&self, kind: PrinterKind) -> LinkResult<Arc<dyn Transport>> {
        self.transports
            .get(&kind)
            .cloned()
            .ok_or_else(|| LinkError::NotSupported(format!("no {} transport configured", kind)))
    }
}

pub(crate) enum Command {
    Connect {
        allow_prompt: bool,
        device: Option<DeviceCandidate>,
        trigger: Trigger,
        reply: Option<oneshot::Sender<LinkResult<ConnectOutcome>>>,
    },
    Print {
        bytes: Arc<[u8]>,
        reply: oneshot::Sender<LinkResult<DeliveryReport>>,
    },
    Disconnect {
        forget: bool,
        reply: oneshot::Sender<LinkResult<()>>,
    },
    CheckLiveness {
        reply: oneshot::Sender<bool>,
    },
    Reconcile {
        message: ContextMessage,
    },
    LinkDropped {
        generation: u64,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

// ==================== Handle ====================

/// Mailbox of one printer's state machine
#[derive(Clone)]
pub(crate) struct PrinterMachine {
    id: String,
    tx: mpsc::Sender<Command>,
}

impl PrinterMachine {
    pub fn spawn(id: String, ctx: MachineContext) -> Self {
        let (tx, rx) = mpsc::channel(32);
        let machine = Machine {
            id: id.clone(),
            ctx,
            rx,
            tx: tx.downgrade(),
            active: None,
            generation: 0,
            retry: None,
        };
        tokio::spawn(machine.run());
        Self { id, tx }
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> LinkResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| LinkError::ManagerClosed)?;
        rx.await.map_err(|_| LinkError::ManagerClosed)
    }

    pub async fn connect(
        &self,
        allow_prompt: bool,
        device: Option<DeviceCandidate>,
        trigger: Trigger,
    ) -> LinkResult<ConnectOutcome> {
        self.request(|reply| Command::Connect {
            allow_prompt,
            device,
            trigger,
            reply: Some(reply),
        })
        .await?
    }

    pub async fn print(&self, bytes: Arc<[u8]>) -> LinkResult<DeliveryReport> {
        self.request(|reply| Command::Print { bytes, reply }).await?
    }

    pub async fn disconnect(&self, forget: bool) -> LinkResult<()> {
        self.request(|reply| Command::Disconnect { forget, reply })
            .await?
    }

    pub async fn check_liveness(&self) -> LinkResult<bool> {
        self.request(|reply| Command::CheckLiveness { reply }).await
    }

    /// Queue a message from another context; dropped if the mailbox is full
    pub fn reconcile(&self, message: ContextMessage) {
        if let Err(e) = self.tx.try_send(Command::Reconcile { message }) {
            warn!(printer_id = %self.id, error = %e, "Context message dropped");
        }
    }

    pub async fn shutdown(&self) {
        let _ = self.request(|reply| Command::Shutdown { reply }).await;
    }
}

// ==================== Actor ====================

struct ActiveLink {
    link: Box<dyn Link>,
    /// Cancels the drop subscription
    watch: CancellationToken,
    generation: u64,
}

struct Machine {
    id: String,
    ctx: MachineContext,
    rx: mpsc::Receiver<Command>,
    /// Own mailbox, for drop watchers and retry timers
    tx: mpsc::WeakSender<Command>,
    active: Option<ActiveLink>,
    generation: u64,
    retry: Option<CancellationToken>,
}

impl Machine {
    async fn run(mut self) {
        debug!(printer_id = %self.id, "State machine started");

        while let Some(command) = self.rx.recv().await {
            match command {
                Command::Connect {
                    allow_prompt,
                    device,
                    trigger,
                    reply,
                } => {
                    let result = self.connect(allow_prompt, device, trigger).await;
                    match reply {
                        Some(reply) => {
                            let _ = reply.send(result);
                        }
                        None => {
                            if let Err(e) = result {
                                debug!(printer_id = %self.id, error = %e, "Unattended connect failed");
                            }
                        }
                    }
                }
                Command::Print { bytes, reply } => {
                    let _ = reply.send(self.print(&bytes).await);
                }
                Command::Disconnect { forget, reply } => {
                    let result = self.disconnect(forget).await;
                    let removed = forget && self.ctx.registry.get(&self.id).is_none();
                    let _ = reply.send(result);
                    if removed {
                        break;
                    }
                }
                Command::CheckLiveness { reply } => {
                    let _ = reply.send(self.check_liveness().await);
                }
                Command::Reconcile { message } => self.reconcile(message),
                Command::LinkDropped { generation } => self.handle_link_drop(generation).await,
                Command::Shutdown { reply } => {
                    self.shutdown().await;
                    let _ = reply.send(());
                    break;
                }
            }
        }

        self.cancel_retry();
        if let Some(active) = self.active.take() {
            active.watch.cancel();
        }
        debug!(printer_id = %self.id, "State machine stopped");
    }

    // ---------- helpers ----------

    fn record(&self) -> LinkResult<PrinterRecord> {
        self.ctx
            .registry
            .get(&self.id)
            .ok_or_else(|| LinkError::UnknownPrinter(self.id.clone()))
    }

    fn update(&self, f: impl FnOnce(&mut PrinterRecord)) -> LinkResult<PrinterRecord> {
        self.ctx
            .registry
            .update(&self.id, f)
            .ok_or_else(|| LinkError::UnknownPrinter(self.id.clone()))
    }

    fn persist(&self) {
        if let Err(e) = self.ctx.registry.save_snapshot() {
            warn!(printer_id = %self.id, error = %e, "Failed to persist printer snapshot");
        }
    }

    fn emit(&self, kind: StatusEventKind, record: &PrinterRecord, message: impl Into<String>) {
        let event = StatusEvent::new(kind, record.summary(), record.status, message);
        // No subscribers is fine
        let _ = self.ctx.events.send(event);
    }

    fn cancel_retry(&mut self) {
        if let Some(token) = self.retry.take() {
            token.cancel();
        }
    }

    fn watch_drop(&self, mut signal: DropSignal, token: CancellationToken, generation: u64) {
        let tx = self.tx.clone();
        let id = self.id.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = signal.dropped() => {
                    debug!(printer_id = %id, generation, "Drop notification received");
                    if let Some(tx) = tx.upgrade() {
                        let _ = tx.send(Command::LinkDropped { generation }).await;
                    }
                }
            }
        });
    }

    fn schedule_retry(&mut self, attempt: u32) {
        self.cancel_retry();
        let token = CancellationToken::new();
        self.retry = Some(token.clone());

        let tx = self.tx.clone();
        let delay = self.ctx.config.reconnect_delay;
        info!(printer_id = %self.id, attempt, delay_ms = delay.as_millis() as u64, "Reconnection scheduled");

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if let Some(tx) = tx.upgrade() {
                        let _ = tx
                            .send(Command::Connect {
                                allow_prompt: false,
                                device: None,
                                trigger: Trigger::Auto,
                                reply: None,
                            })
                            .await;
                    }
                }
            }
        });
    }

    /// Retry while the attempt count is within the configured budget
    fn maybe_retry(&mut self, record: &PrinterRecord) {
        if !self.ctx.config.auto_reconnect_enabled() {
            return;
        }
        if record.attempt_count <= self.ctx.config.auto_reconnect_attempts {
            self.schedule_retry(record.attempt_count);
        } else {
            warn!(
                printer_id = %self.id,
                attempts = record.attempt_count,
                "Reconnection budget exhausted, waiting for user action"
            );
        }
    }

    async fn close_link(&self, link: Box<dyn Link>) -> LinkResult<()> {
        match tokio::time::timeout(self.ctx.config.link_timeout, link.close()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(LinkError::DisconnectFailed(e.to_string())),
            Err(_) => Err(LinkError::DisconnectFailed("close timed out".to_string())),
        }
    }

    // ---------- connect ----------

    #[instrument(skip(self, device), fields(printer_id = %self.id))]
    async fn connect(
        &mut self,
        allow_prompt: bool,
        device: Option<DeviceCandidate>,
        trigger: Trigger,
    ) -> LinkResult<ConnectOutcome> {
        let record = self.record()?;

        if trigger == Trigger::Auto {
            self.retry = None;
        } else {
            self.cancel_retry();
        }

        if let Some(active) = self.active.take() {
            if record.is_connected() {
                self.active = Some(active);
                debug!("Already connected");
                return Ok(ConnectOutcome::Connected(record));
            }
            active.watch.cancel();
            let _ = self.close_link(active.link).await;
        }

        let connecting = self.update(|r| r.status = PrinterStatus::Connecting)?;
        self.emit(StatusEventKind::Connecting, &connecting, format!("Connecting to {}", record.name));

        let started = Instant::now();
        match self.establish(&record, allow_prompt, device).await {
            Ok(Some((link, device))) => self.on_connected(&record, link, device, started),
            Ok(None) => {
                let record = self.update(|r| r.status = PrinterStatus::Disconnected)?;
                info!("Device selection cancelled");
                self.emit(StatusEventKind::Cancelled, &record, "Printer selection cancelled");
                Ok(ConnectOutcome::Cancelled)
            }
            Err(e) => Err(self.on_connect_failed(e, trigger)),
        }
    }

    /// Find and open the device. `Ok(None)` means the user cancelled.
    async fn establish(
        &self,
        record: &PrinterRecord,
        allow_prompt: bool,
        device: Option<DeviceCandidate>,
    ) -> LinkResult<Option<(Box<dyn Link>, DeviceCandidate)>> {
        let transport = self.ctx.transport(record.kind)?;

        let candidate = match device {
            Some(device) => device,
            None => match self.reacquire(transport.as_ref(), record).await? {
                Some(device) => device,
                None if allow_prompt => match self.prompt(transport.as_ref(), record).await? {
                    Some(device) => device,
                    None => return Ok(None),
                },
                None => {
                    return Err(LinkError::NotFound(format!(
                        "{} is not among the granted devices",
                        record.name
                    )));
                }
            },
        };

        if self
            .ctx
            .registry
            .claimed_by_other(record.kind, &candidate.address, &self.id)
        {
            return Err(LinkError::NotFound(format!(
                "{} belongs to another printer",
                candidate.label()
            )));
        }

        // The budget covers opening the link, not the time spent in the picker
        let timeout = self.ctx.config.link_timeout;
        let link = tokio::time::timeout(timeout, transport.open(&candidate))
            .await
            .map_err(|_| {
                LinkError::Timeout(format!(
                    "{} did not answer within {}s",
                    record.name,
                    timeout.as_secs_f32()
                ))
            })?
            .map_err(LinkError::from_open)?;

        Ok(Some((link, candidate)))
    }

    /// Silent re-acquisition of a previously granted device
    async fn reacquire(
        &self,
        transport: &dyn Transport,
        record: &PrinterRecord,
    ) -> LinkResult<Option<DeviceCandidate>> {
        if transport.opens_by_address() {
            return Ok(Some(DeviceCandidate::new(
                record.address.clone(),
                Some(record.name.clone()),
            )));
        }

        let known = tokio::time::timeout(self.ctx.config.link_timeout, transport.known_devices())
            .await
            .map_err(|_| LinkError::Timeout("listing granted devices".to_string()))?
            .map_err(LinkError::from_open)?;

        let claimed = self.ctx.registry.claimed_addresses(record.kind, &self.id);
        let found = match_candidate(record, &known, &claimed);
        if found.is_none() {
            debug!(known = known.len(), "No granted device matches");
        }
        Ok(found)
    }

    /// User-facing picker; the chosen device must still be this printer
    async fn prompt(
        &self,
        transport: &dyn Transport,
        record: &PrinterRecord,
    ) -> LinkResult<Option<DeviceCandidate>> {
        let candidates = transport.discover().await.map_err(LinkError::from_open)?;
        let Some(picked) = self.ctx.picker.pick(record.kind, candidates).await else {
            return Ok(None);
        };

        let claimed = self.ctx.registry.claimed_addresses(record.kind, &self.id);
        match match_candidate(record, std::slice::from_ref(&picked), &claimed) {
            Some(device) => Ok(Some(device)),
            None => Err(LinkError::NotFound(format!(
                "selected device {} is not {}",
                picked.label(),
                record.name
            ))),
        }
    }

    fn on_connected(
        &mut self,
        before: &PrinterRecord,
        link: Box<dyn Link>,
        device: DeviceCandidate,
        started: Instant,
    ) -> LinkResult<ConnectOutcome> {
        let address = before.kind.normalize_address(&device.address);
        if address != before.address {
            info!(old = %before.address, new = %address, "Printer address changed, matched by name");
        }

        let record = self.update(|r| {
            r.address = address;
            r.mark_connected();
        })?;

        self.generation += 1;
        let watch = CancellationToken::new();
        self.watch_drop(link.on_drop(), watch.clone(), self.generation);
        self.active = Some(ActiveLink {
            link,
            watch,
            generation: self.generation,
        });

        self.persist();
        self.ctx.metrics.record_connect(started.elapsed());

        let first = before.connected_at.is_none();
        let (kind, message) = if first {
            (
                StatusEventKind::Connected,
                ContextMessage::Connected(record.summary()),
            )
        } else {
            (
                StatusEventKind::Reconnected,
                ContextMessage::Reconnected(record.summary()),
            )
        };
        info!(kind = %record.kind, address = %record.address, "Printer connected");
        self.emit(kind, &record, format!("{} connected", record.name));
        self.ctx.notifier.publish(message);

        Ok(ConnectOutcome::Connected(record))
    }

    fn on_connect_failed(&mut self, error: LinkError, trigger: Trigger) -> LinkError {
        warn!(printer_id = %self.id, error = %error, ?trigger, "Connection failed");
        self.ctx.metrics.record_connect_error();

        let failed = match self.update(|r| {
            r.attempt_count += 1;
            r.status = PrinterStatus::Failed;
        }) {
            Ok(record) => record,
            Err(e) => return e,
        };
        self.emit(StatusEventKind::ConnectFailed, &failed, error.to_string());

        if let Ok(record) = self.update(|r| r.status = PrinterStatus::Disconnected) {
            self.persist();
            if trigger == Trigger::Auto {
                self.maybe_retry(&record);
            }
        }
        error
    }

    // ---------- drop / liveness ----------

    async fn handle_link_drop(&mut self, generation: u64) {
        if self.active.as_ref().map(|a| a.generation) != Some(generation) {
            debug!(printer_id = %self.id, generation, "Stale drop notification ignored");
            return;
        }
        self.lose_link("Link dropped").await;
    }

    /// The link went away on its own
    #[instrument(skip(self), fields(printer_id = %self.id))]
    async fn lose_link(&mut self, reason: &str) {
        if let Some(active) = self.active.take() {
            active.watch.cancel();
            // Best effort; the device is already gone
            let _ = self.close_link(active.link).await;
        }

        let record = match self.update(|r| {
            r.status = PrinterStatus::Disconnected;
            r.attempt_count += 1;
        }) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "Dropped link for unknown printer");
                return;
            }
        };

        self.persist();
        self.ctx.metrics.record_drop();
        warn!(attempts = record.attempt_count, "{}", reason);

        self.emit(
            StatusEventKind::Disconnected,
            &record,
            format!("{}: {}", record.name, reason),
        );
        self.ctx
            .notifier
            .publish(ContextMessage::Disconnected(record.summary()));

        self.maybe_retry(&record);
    }

    async fn check_liveness(&mut self) -> bool {
        let Some(active) = &self.active else {
            if let Ok(record) = self.record()
                && record.is_connected()
                && let Ok(record) = self.update(|r| r.status = PrinterStatus::Disconnected)
            {
                // Status without a link: repair the record
                warn!(printer_id = %self.id, "Connected without a link, marked disconnected");
                self.persist();
                self.emit(
                    StatusEventKind::Disconnected,
                    &record,
                    format!("{} is no longer connected", record.name),
                );
            }
            return false;
        };

        if active.link.is_alive().await {
            true
        } else {
            self.lose_link("Link stopped answering").await;
            false
        }
    }

    // ---------- print ----------

    #[instrument(skip(self, bytes), fields(printer_id = %self.id, bytes = bytes.len()))]
    async fn print(&mut self, bytes: &[u8]) -> LinkResult<DeliveryReport> {
        let record = self.record()?;
        let Some(active) = self.active.as_ref().filter(|_| record.is_connected()) else {
            return Err(LinkError::NotConnected(record.name));
        };

        let limit = self.ctx.transport(record.kind)?.chunk_size();
        let plan = ChunkPlan::for_transport(
            limit,
            self.ctx.config.radio_chunk_size,
            self.ctx.config.chunk_pacing,
        );

        match deliver(active.link.as_ref(), &self.ctx.resolver, plan, bytes).await {
            Ok(report) => {
                let record = self.update(|r| r.touch())?;
                self.persist();
                self.ctx.metrics.record_print(report.elapsed);
                info!(chunks = report.chunks, "Print job delivered");
                self.emit(
                    StatusEventKind::PrintSucceeded,
                    &record,
                    format!("Printed on {}", record.name),
                );
                Ok(report)
            }
            Err(e) => {
                self.ctx.metrics.record_print_error();
                warn!(error = %e, "Print job failed");
                self.emit(
                    StatusEventKind::PrintFailed,
                    &record,
                    format!("{}: {}", record.name, e),
                );
                Err(e)
            }
        }
    }

    // ---------- disconnect ----------

    #[instrument(skip(self), fields(printer_id = %self.id))]
    async fn disconnect(&mut self, forget: bool) -> LinkResult<()> {
        self.cancel_retry();

        let mut close_result = Ok(());
        let had_link = match self.active.take() {
            Some(active) => {
                // Manual close: stop listening before closing
                active.watch.cancel();
                close_result = self.close_link(active.link).await;
                true
            }
            None => false,
        };

        if forget {
            let removed = self.ctx.registry.remove(&self.id);
            self.ctx.registry.save_snapshot()?;
            if let Some(mut record) = removed {
                record.status = PrinterStatus::Disconnected;
                info!("Printer forgotten");
                self.emit(
                    StatusEventKind::Forgotten,
                    &record,
                    format!("{} removed", record.name),
                );
                if had_link {
                    self.ctx
                        .notifier
                        .publish(ContextMessage::Disconnected(record.summary()));
                }
            }
        } else {
            let record = self.update(|r| {
                r.status = PrinterStatus::Disconnected;
                r.attempt_count = 0;
            })?;
            self.ctx.registry.save_snapshot()?;
            info!("Printer disconnected");
            self.emit(
                StatusEventKind::Disconnected,
                &record,
                format!("{} disconnected", record.name),
            );
            if had_link {
                self.ctx
                    .notifier
                    .publish(ContextMessage::Disconnected(record.summary()));
            }
        }

        close_result
    }

    // ---------- cross-context ----------

    /// Metadata-only reconciliation with another context's view
    fn reconcile(&mut self, message: ContextMessage) {
        let remote = message.printer().clone();

        if message.is_connect() {
            // An address owned by another local printer is never taken over
            let address_free = !self
                .ctx
                .registry
                .claimed_by_other(remote.kind, &remote.address, &self.id);

            // Another context holds the link; never claim it here
            let updated = self.ctx.registry.update(&self.id, |r| {
                if r.status != PrinterStatus::Disconnected {
                    return;
                }
                r.name = remote.name.clone();
                if address_free {
                    r.address = r.kind.normalize_address(&remote.address);
                }
                r.shared = remote.shared;
                if remote.connected_at > r.connected_at {
                    r.connected_at = remote.connected_at;
                }
                if remote.last_used_at > r.last_used_at {
                    r.last_used_at = remote.last_used_at;
                }
            });
            debug!(printer_id = %self.id, updated = updated.is_some(), "Remote connect reconciled");
            return;
        }

        self.cancel_retry();
        if let Some(active) = self.active.take() {
            active.watch.cancel();
            // Drop the reference only; the device side is not touched
            drop(active.link);
        }

        if let Ok(record) = self.update(|r| r.status = PrinterStatus::Disconnected) {
            info!(printer_id = %self.id, "Printer disconnected by another context");
            self.emit(
                StatusEventKind::Disconnected,
                &record,
                format!("{} was disconnected elsewhere", record.name),
            );
        }
    }

    async fn shutdown(&mut self) {
        self.cancel_retry();
        if let Some(active) = self.active.take() {
            active.watch.cancel();
            if let Err(e) = self.close_link(active.link).await {
                warn!(printer_id = %self.id, error = %e, "Close on shutdown failed");
            }
        }
        let _ = self.update(|r| r.status = PrinterStatus::Disconnected);
    }
}
