//! Printer registry
//!
//! Durable id -> metadata map. Records here never hold a live link; the
//! per-printer state machines own those. The snapshot is a JSON array of
//! records under one store key.

use parking_lot::{Mutex, RwLock};
use shared::models::{PrinterKind, PrinterRecord, PrinterStatus};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::LinkResult;
use crate::store::SnapshotStore;

pub struct Registry {
    records: RwLock<BTreeMap<String, PrinterRecord>>,
    store: Arc<dyn SnapshotStore>,
    key: String,
    /// Serializes snapshot writes so a stale view never lands last
    save_lock: Mutex<()>,
}

impl Registry {
    pub fn new(store: Arc<dyn SnapshotStore>, key: impl Into<String>) -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            store,
            key: key.into(),
            save_lock: Mutex::new(()),
        }
    }

    pub fn get(&self, id: &str) -> Option<PrinterRecord> {
        self.records.read().get(id).cloned()
    }

    pub fn list(&self) -> Vec<PrinterRecord> {
        self.records.read().values().cloned().collect()
    }

    pub fn list_by_status(&self, status: PrinterStatus) -> Vec<PrinterRecord> {
        self.records
            .read()
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect()
    }

    /// Record pointing at the same `(address, kind)`
    pub fn find_endpoint(&self, kind: PrinterKind, address: &str) -> Option<PrinterRecord> {
        self.records
            .read()
            .values()
            .find(|r| r.same_endpoint(kind, address))
            .cloned()
    }

    /// Addresses of `kind` held by records other than `except_id`
    pub fn claimed_addresses(&self, kind: PrinterKind, except_id: &str) -> HashSet<String> {
        self.records
            .read()
            .values()
            .filter(|r| r.kind == kind && r.id != except_id)
            .map(|r| r.address.clone())
            .collect()
    }

    /// Whether `address` belongs to a record other than `id`
    pub fn claimed_by_other(&self, kind: PrinterKind, address: &str, id: &str) -> bool {
        self.find_endpoint(kind, address).is_some_and(|r| r.id != id)
    }

    /// Insert or update a record
    ///
    /// A record whose `(address, kind)` matches an existing one updates
    /// that record (keeping its id) instead of creating a second one.
    /// Returns the stored record.
    pub fn upsert(&self, record: PrinterRecord) -> PrinterRecord {
        let mut records = self.records.write();

        let existing_id = if records.contains_key(&record.id) {
            Some(record.id.clone())
        } else {
            records
                .values()
                .find(|r| r.same_endpoint(record.kind, &record.address))
                .map(|r| r.id.clone())
        };

        match existing_id.and_then(|id| records.get_mut(&id)) {
            Some(current) => {
                debug!(printer_id = %current.id, "Updating existing printer record");
                current.name = record.name;
                current.address = record.kind.normalize_address(&record.address);
                current.shared = record.shared;
                if record.last_used_at > current.last_used_at {
                    current.last_used_at = record.last_used_at;
                }
                if record.connected_at > current.connected_at {
                    current.connected_at = record.connected_at;
                }
                current.clone()
            }
            None => {
                info!(printer_id = %record.id, kind = %record.kind, "Printer registered");
                records.insert(record.id.clone(), record.clone());
                record
            }
        }
    }

    /// Mutate a record in place, returning the updated copy
    pub fn update<F>(&self, id: &str, f: F) -> Option<PrinterRecord>
    where
        F: FnOnce(&mut PrinterRecord),
    {
        let mut records = self.records.write();
        let record = records.get_mut(id)?;
        f(record);
        Some(record.clone())
    }

    pub fn remove(&self, id: &str) -> Option<PrinterRecord> {
        self.records.write().remove(id)
    }

    /// Persist every record (full replace)
    pub fn save_snapshot(&self) -> LinkResult<()> {
        let _guard = self.save_lock.lock();
        let json = serde_json::to_string(&self.list())
            .map_err(crate::error::StoreError::from)?;
        self.store.save(&self.key, &json)?;
        Ok(())
    }

    /// Load the persisted snapshot, replacing in-memory records
    ///
    /// Every loaded record starts `Disconnected`: links never survive a
    /// reload. Returns the number of records loaded.
    pub fn load_snapshot(&self) -> LinkResult<usize> {
        let Some(json) = self.store.load(&self.key)? else {
            return Ok(0);
        };

        let loaded: Vec<PrinterRecord> = match serde_json::from_str(&json) {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, key = %self.key, "Ignoring unreadable printer snapshot");
                return Ok(0);
            }
        };

        let mut records = self.records.write();
        records.clear();
        for mut record in loaded {
            record.status = PrinterStatus::Disconnected;
            records.insert(record.id.clone(), record);
        }
        info!(count = records.len(), "Printer snapshot loaded");
        Ok(records.len())
    }
}
