//! Liveness checks: manual, periodic, on returning to the foreground

mod common;

use common::*;
use crab_link::{MemoryStore, PrinterManager, Visibility};
use shared::models::{PrinterKind, PrinterStatus};
use std::sync::Arc;
use std::time::Duration;

async fn connected(transport: &MockTransport) -> (PrinterManager, String) {
    transport.grant("AA:BB", "POS-1");
    let config = fast_config().with_liveness(Duration::from_secs(30), Duration::from_secs(2));
    let manager = manager_with(config, Arc::new(MemoryStore::new()), transport);
    let id = manager
        .register(PrinterKind::RadioLink, "AA:BB", "POS-1")
        .unwrap()
        .id;
    manager.connect(&id, false).await.unwrap();
    (manager, id)
}

#[tokio::test]
async fn healthy_links_pass() {
    let transport = MockTransport::radio();
    let (manager, id) = connected(&transport).await;

    assert_eq!(manager.check_liveness().await, 0);
    assert_eq!(manager.printer(&id).unwrap().status, PrinterStatus::Connected);
}

#[tokio::test]
async fn silent_link_is_treated_as_drop() {
    let transport = MockTransport::radio();
    let (manager, id) = connected(&transport).await;
    transport.last_link().go_silent();

    assert_eq!(manager.check_liveness().await, 1);

    let record = manager.printer(&id).unwrap();
    assert_eq!(record.status, PrinterStatus::Disconnected);
    assert_eq!(record.attempt_count, 1);
}

#[tokio::test(start_paused = true)]
async fn periodic_tick_detects_silent_link() {
    let transport = MockTransport::radio();
    let (manager, id) = connected(&transport).await;
    transport.last_link().go_silent();

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(manager.printer(&id).unwrap().status, PrinterStatus::Connected);

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(manager.printer(&id).unwrap().status, PrinterStatus::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn returning_to_foreground_checks_links() {
    let transport = MockTransport::radio();
    let (manager, id) = connected(&transport).await;
    transport.last_link().go_silent();

    manager.set_visibility(Visibility::Hidden);
    manager.set_visibility(Visibility::Visible);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(manager.printer(&id).unwrap().status, PrinterStatus::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn staying_visible_does_not_check() {
    let transport = MockTransport::radio();
    let (manager, id) = connected(&transport).await;
    transport.last_link().go_silent();

    manager.set_visibility(Visibility::Visible);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(manager.printer(&id).unwrap().status, PrinterStatus::Connected);
}
