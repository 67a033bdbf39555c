//! Snapshot stores
//!
//! The registry persists one JSON document per key. Stores only see
//! strings; every write is a full replace, last writer wins.
//!
//! - [`MemoryStore`]: in-process, cloneable (clones share data)
//! - [`JsonFileStore`]: one `<key>.json` file per key, atomic rename
//! - [`RedbStore`]: redb table, for kiosks that already ship a database

use parking_lot::RwLock;
use redb::{Database, ReadableDatabase, TableDefinition};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::StoreResult;

/// Key/value persistence for registry snapshots
pub trait SnapshotStore: Send + Sync {
    fn load(&self, key: &str) -> StoreResult<Option<String>>;
    fn save(&self, key: &str, value: &str) -> StoreResult<()>;
}

// ==================== Memory ====================

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemoryStore {
    fn load(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn save(&self, key: &str, value: &str) -> StoreResult<()> {
        self.data.write().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

// ==================== JSON files ====================

#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Open (creating if needed) a store directory
    pub fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", file))
    }
}

impl SnapshotStore for JsonFileStore {
    fn load(&self, key: &str) -> StoreResult<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, key: &str, value: &str) -> StoreResult<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

// ==================== redb ====================

const SNAPSHOTS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("snapshots");

#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open or create the database at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db = Database::create(path)?;
        Self::init(db)
    }

    /// In-memory database (tests)
    pub fn open_in_memory() -> StoreResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::init(db)
    }

    fn init(db: Database) -> StoreResult<Self> {
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(SNAPSHOTS_TABLE)?;
        }
        write_txn.commit()?;
        Ok(Self { db: Arc::new(db) })
    }
}

impl SnapshotStore for RedbStore {
    fn load(&self, key: &str) -> StoreResult<Option<String>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SNAPSHOTS_TABLE)?;
        Ok(table.get(key)?.map(|v| v.value().to_string()))
    }

    fn save(&self, key: &str, value: &str) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SNAPSHOTS_TABLE)?;
            table.insert(key, value)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &dyn SnapshotStore) {
        assert_eq!(store.load("crab.printers").unwrap(), None);

        store.save("crab.printers", "[1]").unwrap();
        store.save("crab.printers", "[1,2]").unwrap();

        assert_eq!(store.load("crab.printers").unwrap().as_deref(), Some("[1,2]"));
        assert_eq!(store.load("other").unwrap(), None);
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        exercise(&store);

        // Clones share data
        let other = store.clone();
        assert!(other.load("crab.printers").unwrap().is_some());
    }

    #[test]
    fn test_json_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("state")).unwrap();
        exercise(&store);

        assert!(dir.path().join("state/crab.printers.json").exists());
        assert!(!dir.path().join("state/crab.printers.json.tmp").exists());
    }

    #[test]
    fn test_json_file_store_sanitizes_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();
        store.save("../escape/me", "x").unwrap();

        assert!(dir.path().join(".._escape_me.json").exists());
    }

    #[test]
    fn test_redb_store() {
        let store = RedbStore::open_in_memory().unwrap();
        exercise(&store);
    }

    #[test]
    fn test_redb_store_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("links.redb");
        {
            let store = RedbStore::open(&path).unwrap();
            store.save("crab.printers", "[]").unwrap();
        }
        let store = RedbStore::open(&path).unwrap();
        assert_eq!(store.load("crab.printers").unwrap().as_deref(), Some("[]"));
    }
}
