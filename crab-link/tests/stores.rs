//! Snapshot persistence through the manager

mod common;

use common::*;
use crab_link::{JsonFileStore, LinkConfig, MemoryStore, RedbStore, SnapshotStore};
use shared::models::{PrinterKind, PrinterStatus};
use std::sync::Arc;

async fn roundtrip(store: Arc<dyn SnapshotStore>) {
    let transport = MockTransport::radio();
    transport.grant("AA:BB", "POS-1");

    let first = manager_with(fast_config(), store.clone(), &transport);
    let id = first
        .register(PrinterKind::RadioLink, "AA:BB", "POS-1")
        .unwrap()
        .id;
    first.connect(&id, false).await.unwrap();
    first.shutdown().await;

    let second = manager_with(fast_config(), store, &transport);
    let printers = second.printers();
    assert_eq!(printers.len(), 1);
    assert_eq!(printers[0].id, id);
    assert_eq!(printers[0].status, PrinterStatus::Disconnected);
    assert!(printers[0].connected_at.is_some());
}

#[tokio::test]
async fn json_file_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::open(dir.path()).unwrap();
    roundtrip(Arc::new(store)).await;
    assert!(dir.path().join("crab.printers.json").exists());
}

#[tokio::test]
async fn redb_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let store = RedbStore::open(dir.path().join("printers.redb")).unwrap();
    roundtrip(Arc::new(store)).await;
}

#[tokio::test]
async fn unreadable_snapshot_starts_empty() {
    let store = MemoryStore::new();
    store
        .save(&LinkConfig::default().snapshot_key, "not json")
        .unwrap();

    let transport = MockTransport::radio();
    let manager = manager_with(fast_config(), Arc::new(store), &transport);
    assert!(manager.printers().is_empty());
}

#[tokio::test]
async fn snapshot_key_is_configurable() {
    let store = MemoryStore::new();
    let transport = MockTransport::network();
    let config = fast_config().with_snapshot_key("site-2.printers");

    let manager = manager_with(config, Arc::new(store.clone()), &transport);
    manager
        .register(PrinterKind::NetworkSocket, "10.0.0.9", "Bar")
        .unwrap();

    assert!(store.load("site-2.printers").unwrap().is_some());
    assert!(store.load("crab.printers").unwrap().is_none());
}
