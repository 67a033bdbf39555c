//! Connection lifecycle: connect, drop, reconnect, disconnect, forget

mod common;

use common::*;
use crab_link::{ConnectOutcome, LinkError, MemoryStore, PrinterManager};
use shared::message::StatusEventKind;
use shared::models::{PrinterKind, PrinterStatus};
use std::sync::Arc;
use std::time::Duration;

fn radio_setup() -> (MockTransport, CountingStore, PrinterManager, String) {
    let transport = MockTransport::radio();
    transport.grant("AA:BB", "POS-1");
    let store = CountingStore::new();
    let manager = manager_with(fast_config(), Arc::new(store.clone()), &transport);
    let id = manager
        .register(PrinterKind::RadioLink, "AA:BB", "POS-1")
        .unwrap()
        .id;
    (transport, store, manager, id)
}

#[tokio::test]
async fn connect_marks_connected_and_persists() {
    let (transport, store, manager, id) = radio_setup();
    let mut events = manager.subscribe();

    let outcome = manager.connect(&id, false).await.unwrap();

    let ConnectOutcome::Connected(record) = outcome else {
        panic!("expected a connection");
    };
    assert_eq!(record.status, PrinterStatus::Connected);
    assert!(record.connected_at.is_some());
    assert_eq!(transport.open_count(), 1);
    assert_eq!(store.last_snapshot()[0].status, PrinterStatus::Connected);

    let event = next_event(&mut events, StatusEventKind::Connected).await;
    assert_eq!(event.printer.id, id);
}

#[tokio::test]
async fn second_connect_reuses_live_link() {
    let (transport, _store, manager, id) = radio_setup();

    let (a, b) = tokio::join!(manager.connect(&id, false), manager.connect(&id, false));
    assert!(a.unwrap().is_connected());
    assert!(b.unwrap().is_connected());
    manager.connect(&id, false).await.unwrap();

    assert_eq!(transport.open_count(), 1);
}

#[tokio::test]
async fn drop_persists_disconnected_exactly_once() {
    let (transport, store, manager, id) = radio_setup();
    manager.connect(&id, false).await.unwrap();
    let mut events = manager.subscribe();
    let saves_before = store.save_count();

    transport.last_link().drop_link();

    let event = next_event(&mut events, StatusEventKind::Disconnected).await;
    assert_eq!(event.status, PrinterStatus::Disconnected);
    assert_eq!(store.save_count(), saves_before + 1);

    let snapshot = store.last_snapshot();
    assert_eq!(snapshot[0].status, PrinterStatus::Disconnected);
    assert_eq!(snapshot[0].attempt_count, 1);

    // Auto-reconnect is off by default
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.open_count(), 1);
    assert_eq!(manager.printer(&id).unwrap().status, PrinterStatus::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn auto_reconnect_stops_at_attempt_cap() {
    let transport = MockTransport::radio();
    transport.grant("AA:BB", "POS-1");
    let config = fast_config().with_auto_reconnect(2, Duration::from_millis(100));
    let manager = manager_with(config, Arc::new(MemoryStore::new()), &transport);
    let id = manager
        .register(PrinterKind::RadioLink, "AA:BB", "POS-1")
        .unwrap()
        .id;
    manager.connect(&id, false).await.unwrap();

    transport.script(&[OpenStep::NotFound, OpenStep::NotFound, OpenStep::NotFound]);
    transport.last_link().drop_link();
    tokio::time::sleep(Duration::from_secs(5)).await;

    // Initial open plus two retries
    assert_eq!(transport.open_count(), 3);
    let record = manager.printer(&id).unwrap();
    assert_eq!(record.status, PrinterStatus::Disconnected);
    assert_eq!(record.attempt_count, 3);
}

#[tokio::test(start_paused = true)]
async fn auto_reconnect_restores_link() {
    let transport = MockTransport::radio();
    transport.grant("AA:BB", "POS-1");
    let config = fast_config().with_auto_reconnect(3, Duration::from_millis(100));
    let manager = manager_with(config, Arc::new(MemoryStore::new()), &transport);
    let id = manager
        .register(PrinterKind::RadioLink, "AA:BB", "POS-1")
        .unwrap()
        .id;
    manager.connect(&id, false).await.unwrap();
    let mut events = manager.subscribe();

    transport.last_link().drop_link();
    next_event(&mut events, StatusEventKind::Disconnected).await;
    next_event(&mut events, StatusEventKind::Reconnected).await;

    let record = manager.printer(&id).unwrap();
    assert_eq!(record.status, PrinterStatus::Connected);
    assert_eq!(record.attempt_count, 0);
    assert_eq!(transport.open_count(), 2);
}

#[tokio::test]
async fn granted_device_matched_by_name_updates_address() {
    let transport = MockTransport::radio();
    transport.grant("CC:DD", "POS-1");
    let manager = manager_with(fast_config(), Arc::new(MemoryStore::new()), &transport);
    let id = manager
        .register(PrinterKind::RadioLink, "AA:BB", "POS-1")
        .unwrap()
        .id;

    manager.connect(&id, false).await.unwrap();

    assert_eq!(manager.printer(&id).unwrap().address, "CC:DD");
    assert_eq!(transport.opens()[0].0, "CC:DD");
}

#[tokio::test]
async fn unrelated_granted_device_is_rejected() {
    let transport = MockTransport::radio();
    transport.grant("EE:FF", "Other");
    let manager = manager_with(fast_config(), Arc::new(MemoryStore::new()), &transport);
    let id = manager
        .register(PrinterKind::RadioLink, "AA:BB", "POS-1")
        .unwrap()
        .id;

    let err = manager.connect(&id, false).await.unwrap_err();

    assert!(matches!(err, LinkError::NotFound(_)));
    assert_eq!(transport.open_count(), 0);
    let record = manager.printer(&id).unwrap();
    assert_eq!(record.status, PrinterStatus::Disconnected);
    assert_eq!(record.attempt_count, 1);
}

#[tokio::test]
async fn name_match_never_takes_another_printers_address() {
    let transport = MockTransport::radio();
    transport.grant("CC:DD", "POS-1");
    let manager = manager_with(fast_config(), Arc::new(MemoryStore::new()), &transport);
    let a = manager
        .register(PrinterKind::RadioLink, "AA:BB", "POS-1")
        .unwrap()
        .id;
    let b = manager
        .register(PrinterKind::RadioLink, "CC:DD", "POS-1")
        .unwrap()
        .id;

    assert!(manager.connect(&b, false).await.unwrap().is_connected());
    let err = manager.connect(&a, false).await.unwrap_err();

    assert!(matches!(err, LinkError::NotFound(_)));
    assert_eq!(transport.open_count(), 1);

    let at_cc_dd = manager
        .printers()
        .iter()
        .filter(|p| p.kind == PrinterKind::RadioLink && p.address == "CC:DD")
        .count();
    assert_eq!(at_cc_dd, 1);
    assert_eq!(manager.connected_printers().len(), 1);

    let record = manager.printer(&a).unwrap();
    assert_eq!(record.address, "AA:BB");
    assert_eq!(record.status, PrinterStatus::Disconnected);
    assert_eq!(record.attempt_count, 1);
}

#[tokio::test]
async fn picker_cannot_hand_over_another_printers_device() {
    let transport = MockTransport::radio();
    let picker = ScriptedPicker::choose("CC:DD", "POS-1");
    let manager = PrinterManager::builder(fast_config(), Arc::new(MemoryStore::new()))
        .transport(Arc::new(transport.clone()))
        .picker(picker)
        .build()
        .unwrap();
    let a = manager
        .register(PrinterKind::RadioLink, "AA:BB", "POS-1")
        .unwrap()
        .id;
    manager
        .register(PrinterKind::RadioLink, "CC:DD", "POS-1")
        .unwrap();

    let err = manager.connect(&a, true).await.unwrap_err();

    assert!(matches!(err, LinkError::NotFound(_)));
    assert_eq!(transport.open_count(), 0);
    assert_eq!(manager.printer(&a).unwrap().address, "AA:BB");
}

#[tokio::test]
async fn cancelled_picker_is_not_a_failure() {
    let transport = MockTransport::radio();
    transport.advertise("AA:BB", "POS-1");
    let picker = ScriptedPicker::cancel();
    let manager = PrinterManager::builder(fast_config(), Arc::new(MemoryStore::new()))
        .transport(Arc::new(transport.clone()))
        .picker(picker.clone())
        .build()
        .unwrap();
    let id = manager
        .register(PrinterKind::RadioLink, "AA:BB", "POS-1")
        .unwrap()
        .id;
    let mut events = manager.subscribe();

    let outcome = manager.connect(&id, true).await.unwrap();

    assert!(matches!(outcome, ConnectOutcome::Cancelled));
    assert_eq!(picker.calls(), 1);
    let record = manager.printer(&id).unwrap();
    assert_eq!(record.status, PrinterStatus::Disconnected);
    assert_eq!(record.attempt_count, 0);
    next_event(&mut events, StatusEventKind::Cancelled).await;
}

#[tokio::test]
async fn picker_choice_must_match_record() {
    let transport = MockTransport::radio();
    let picker = ScriptedPicker::choose("99:99", "Stranger");
    let manager = PrinterManager::builder(fast_config(), Arc::new(MemoryStore::new()))
        .transport(Arc::new(transport.clone()))
        .picker(picker)
        .build()
        .unwrap();
    let id = manager
        .register(PrinterKind::RadioLink, "AA:BB", "POS-1")
        .unwrap()
        .id;

    let err = manager.connect(&id, true).await.unwrap_err();

    assert!(matches!(err, LinkError::NotFound(_)));
    assert_eq!(manager.printer(&id).unwrap().attempt_count, 1);
}

#[tokio::test]
async fn picker_used_only_when_prompt_allowed() {
    let transport = MockTransport::radio();
    let picker = ScriptedPicker::choose("AA:BB", "POS-1");
    let manager = PrinterManager::builder(fast_config(), Arc::new(MemoryStore::new()))
        .transport(Arc::new(transport.clone()))
        .picker(picker.clone())
        .build()
        .unwrap();
    let id = manager
        .register(PrinterKind::RadioLink, "AA:BB", "POS-1")
        .unwrap()
        .id;

    assert!(manager.connect(&id, false).await.is_err());
    assert_eq!(picker.calls(), 0);

    assert!(manager.connect(&id, true).await.unwrap().is_connected());
    assert_eq!(picker.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn unresponsive_device_times_out() {
    let transport = MockTransport::radio();
    transport.grant("AA:BB", "POS-1");
    transport.script(&[OpenStep::Hang]);
    let config = fast_config().with_link_timeout(Duration::from_secs(10));
    let manager = manager_with(config, Arc::new(MemoryStore::new()), &transport);
    let id = manager
        .register(PrinterKind::RadioLink, "AA:BB", "POS-1")
        .unwrap()
        .id;

    let started = tokio::time::Instant::now();
    let err = manager.connect(&id, false).await.unwrap_err();

    assert!(matches!(err, LinkError::Timeout(_)));
    assert!(started.elapsed() >= Duration::from_secs(10));
    let record = manager.printer(&id).unwrap();
    assert_eq!(record.status, PrinterStatus::Disconnected);
    assert_eq!(record.attempt_count, 1);
}

#[tokio::test]
async fn permission_denied_is_reported() {
    let (transport, _store, manager, id) = radio_setup();
    transport.script(&[OpenStep::PermissionDenied]);

    let err = manager.connect(&id, false).await.unwrap_err();
    assert!(matches!(err, LinkError::PermissionDenied(_)));
    assert!(err.is_connection_error());
}

#[tokio::test]
async fn manual_disconnect_ignores_later_drop() {
    let (transport, store, manager, id) = radio_setup();
    manager.connect(&id, false).await.unwrap();
    let link = transport.last_link();

    manager.disconnect(&id).await.unwrap();
    assert!(link.is_closed());
    let saves = store.save_count();

    link.drop_link();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let record = manager.printer(&id).unwrap();
    assert_eq!(record.status, PrinterStatus::Disconnected);
    assert_eq!(record.attempt_count, 0);
    assert_eq!(store.save_count(), saves);
}

#[tokio::test]
async fn forget_removes_printer() {
    let (transport, store, manager, id) = radio_setup();
    manager.connect(&id, false).await.unwrap();
    let mut events = manager.subscribe();

    manager.forget(&id).await.unwrap();

    assert!(manager.printer(&id).is_none());
    assert!(transport.last_link().is_closed());
    assert!(store.last_snapshot().is_empty());
    next_event(&mut events, StatusEventKind::Forgotten).await;

    let err = manager.connect(&id, false).await.unwrap_err();
    assert!(matches!(err, LinkError::UnknownPrinter(_)));
}

#[tokio::test]
async fn pair_registers_picked_device() {
    let transport = MockTransport::radio();
    transport.advertise("11:22", "MPT-II");
    let manager = PrinterManager::builder(fast_config(), Arc::new(MemoryStore::new()))
        .transport(Arc::new(transport.clone()))
        .picker(ScriptedPicker::choose("11:22", "MPT-II"))
        .build()
        .unwrap();

    let ConnectOutcome::Connected(record) = manager.pair(PrinterKind::RadioLink).await.unwrap()
    else {
        panic!("expected a connection");
    };

    assert_eq!(record.name, "MPT-II");
    assert_eq!(record.address, "11:22");
    assert_eq!(manager.printers().len(), 1);
}

#[tokio::test]
async fn failed_pair_leaves_no_record() {
    let transport = MockTransport::radio();
    transport.advertise("11:22", "MPT-II");
    transport.script(&[OpenStep::NotFound]);
    let manager = PrinterManager::builder(fast_config(), Arc::new(MemoryStore::new()))
        .transport(Arc::new(transport.clone()))
        .picker(ScriptedPicker::choose("11:22", "MPT-II"))
        .build()
        .unwrap();

    assert!(manager.pair(PrinterKind::RadioLink).await.is_err());
    assert!(manager.printers().is_empty());
}

#[tokio::test]
async fn missing_transport_is_not_supported() {
    let transport = MockTransport::network();
    let manager = manager_with(fast_config(), Arc::new(MemoryStore::new()), &transport);
    let id = manager.register(PrinterKind::Serial, "/dev/ttyUSB0", "Bar").unwrap().id;

    let err = manager.connect(&id, false).await.unwrap_err();
    assert!(matches!(err, LinkError::NotSupported(_)));
}

#[tokio::test]
async fn reload_starts_disconnected() {
    let (transport, store, manager, id) = radio_setup();
    manager.connect(&id, false).await.unwrap();
    manager.shutdown().await;

    let reloaded = manager_with(fast_config(), Arc::new(store.clone()), &transport);
    let record = reloaded.printer(&id).unwrap();

    assert_eq!(record.status, PrinterStatus::Disconnected);
    assert!(record.connected_at.is_some());
    assert!(reloaded.connected_printers().is_empty());
}
