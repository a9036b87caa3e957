//! Record stores.
//!
//! Records are keyed by service name. The redb store keeps one JSON value
//! per service in a single table; the memory store backs tests and
//! short-lived simulations.

use crate::record::NodeEnablementRecord;
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use stratum_core::CoreError;
use stratum_placement::ServiceName;
use tracing::debug;

const RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("service_records");

/// Store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding the node's state
    pub data_dir: PathBuf,
    /// Database file name inside `data_dir`
    pub file_name: String,
}

impl StoreConfig {
    /// Create a config rooted at `data_dir`
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Full path of the database file
    #[must_use]
    pub fn records_path(&self) -> PathBuf {
        self.data_dir.join(&self.file_name)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/stratum"),
            file_name: "records.redb".to_string(),
        }
    }
}

/// Store error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// IO error
    Io { reason: String },
    /// Record could not be encoded or decoded
    Serialization { reason: String },
    /// Database engine failure
    Backend { reason: String },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { reason } => write!(f, "IO error: {}", reason),
            Self::Serialization { reason } => write!(f, "Serialization error: {}", reason),
            Self::Backend { reason } => write!(f, "Record store error: {}", reason),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        CoreError::Io {
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            reason: err.to_string(),
        }
    }
}

fn backend<E: std::fmt::Display>(err: E) -> StoreError {
    StoreError::Backend {
        reason: err.to_string(),
    }
}

/// Persistent map from service to its enablement record
pub trait RecordStore: Send + Sync {
    /// Load the record for `service`
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails or the record is corrupt
    fn get(&self, service: ServiceName) -> Result<Option<NodeEnablementRecord>, StoreError>;

    /// Insert or replace the record for its service
    ///
    /// # Errors
    ///
    /// Returns error if the write is not durable
    fn put(&self, record: &NodeEnablementRecord) -> Result<(), StoreError>;

    /// Delete the record for `service`, returning whether one existed
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails
    fn remove(&self, service: ServiceName) -> Result<bool, StoreError>;

    /// All records, ordered by service
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails or a record is corrupt
    fn list(&self) -> Result<Vec<NodeEnablementRecord>, StoreError>;
}

/// Store statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Records currently held
    pub record_count: usize,
    /// Number of reads
    pub read_count: u64,
    /// Number of puts and removes
    pub write_count: u64,
}

/// In-memory record store
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: RwLock<BTreeMap<ServiceName, NodeEnablementRecord>>,
    stats: RwLock<StoreStats>,
}

impl MemoryRecordStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get store statistics
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        self.stats
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn bump(&self, write: bool, record_count: usize) {
        let mut stats = self.stats.write().unwrap_or_else(PoisonError::into_inner);
        if write {
            stats.write_count += 1;
        } else {
            stats.read_count += 1;
        }
        stats.record_count = record_count;
    }
}

impl RecordStore for MemoryRecordStore {
    fn get(&self, service: ServiceName) -> Result<Option<NodeEnablementRecord>, StoreError> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let record = records.get(&service).cloned();
        self.bump(false, records.len());
        Ok(record)
    }

    fn put(&self, record: &NodeEnablementRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records.insert(record.service(), record.clone());
        self.bump(true, records.len());
        Ok(())
    }

    fn remove(&self, service: ServiceName) -> Result<bool, StoreError> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let existed = records.remove(&service).is_some();
        self.bump(true, records.len());
        Ok(existed)
    }

    fn list(&self) -> Result<Vec<NodeEnablementRecord>, StoreError> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        self.bump(false, records.len());
        Ok(records.values().cloned().collect())
    }
}

/// File-backed record store on redb
pub struct RedbRecordStore {
    db: Database,
    path: PathBuf,
}

impl RedbRecordStore {
    /// Open (or create) the store described by `config`
    ///
    /// # Errors
    ///
    /// Returns error if the directory or database cannot be created
    pub fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        std::fs::create_dir_all(&config.data_dir).map_err(|e| StoreError::Io {
            reason: format!("{}: {}", config.data_dir.display(), e),
        })?;
        Self::open_path(config.records_path())
    }

    /// Open (or create) a database file at `path`
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be created
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let db = Database::create(&path).map_err(backend)?;

        // Create the table up front so readers never see it missing.
        let txn = db.begin_write().map_err(backend)?;
        txn.open_table(RECORDS).map_err(backend)?;
        txn.commit().map_err(backend)?;

        debug!(path = %path.display(), "opened record store");
        Ok(Self { db, path })
    }

    /// Database file path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordStore for RedbRecordStore {
    fn get(&self, service: ServiceName) -> Result<Option<NodeEnablementRecord>, StoreError> {
        let txn = self.db.begin_read().map_err(backend)?;
        let table = txn.open_table(RECORDS).map_err(backend)?;
        match table.get(service.as_str()).map_err(backend)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    fn put(&self, record: &NodeEnablementRecord) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(record)?;
        let txn = self.db.begin_write().map_err(backend)?;
        {
            let mut table = txn.open_table(RECORDS).map_err(backend)?;
            table
                .insert(record.service().as_str(), bytes.as_slice())
                .map_err(backend)?;
        }
        txn.commit().map_err(backend)?;
        Ok(())
    }

    fn remove(&self, service: ServiceName) -> Result<bool, StoreError> {
        let txn = self.db.begin_write().map_err(backend)?;
        let existed = {
            let mut table = txn.open_table(RECORDS).map_err(backend)?;
            let removed = table.remove(service.as_str()).map_err(backend)?;
            removed.is_some()
        };
        txn.commit().map_err(backend)?;
        Ok(existed)
    }

    fn list(&self) -> Result<Vec<NodeEnablementRecord>, StoreError> {
        let txn = self.db.begin_read().map_err(backend)?;
        let table = txn.open_table(RECORDS).map_err(backend)?;
        let mut records = Vec::new();
        for entry in table.iter().map_err(backend)? {
            let (_, value) = entry.map_err(backend)?;
            records.push(serde_json::from_slice::<NodeEnablementRecord>(value.value())?);
        }
        records.sort_by_key(NodeEnablementRecord::service);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_placement::{RgwPlacement, ServicePlacement};

    fn rgw_record() -> NodeEnablementRecord {
        NodeEnablementRecord::new(ServicePlacement::Rgw(RgwPlacement::default()))
    }

    #[test]
    fn test_store_config_path() {
        let config = StoreConfig::new("/tmp/stratum");
        assert_eq!(config.records_path(), PathBuf::from("/tmp/stratum/records.redb"));
    }

    #[test]
    fn test_memory_put_get() {
        let store = MemoryRecordStore::new();
        assert!(store.get(ServiceName::Rgw).unwrap().is_none());

        let record = rgw_record();
        store.put(&record).unwrap();
        assert_eq!(store.get(ServiceName::Rgw).unwrap(), Some(record));

        let stats = store.stats();
        assert_eq!(stats.record_count, 1);
        assert_eq!(stats.write_count, 1);
        assert_eq!(stats.read_count, 2);
    }

    #[test]
    fn test_memory_remove() {
        let store = MemoryRecordStore::new();
        store.put(&rgw_record()).unwrap();

        assert!(store.remove(ServiceName::Rgw).unwrap());
        assert!(!store.remove(ServiceName::Rgw).unwrap());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_redb_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbRecordStore::open(&StoreConfig::new(dir.path())).unwrap();

        let record = rgw_record().activated();
        store.put(&record).unwrap();
        assert_eq!(store.get(ServiceName::Rgw).unwrap(), Some(record));
        assert!(store.get(ServiceName::Mds).unwrap().is_none());
    }

    #[test]
    fn test_redb_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::new(dir.path().join("nested"));

        let mon = NodeEnablementRecord::new(ServicePlacement::Mon).activated();
        let rgw = rgw_record();
        {
            let store = RedbRecordStore::open(&config).unwrap();
            store.put(&rgw).unwrap();
            store.put(&mon).unwrap();
        }

        let store = RedbRecordStore::open(&config).unwrap();
        assert_eq!(store.list().unwrap(), vec![rgw, mon]);
    }

    #[test]
    fn test_redb_replace_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbRecordStore::open_path(dir.path().join("records.redb")).unwrap();

        let first = rgw_record().activated();
        let second = first.supersede(ServicePlacement::Rgw(RgwPlacement::new(8080, 8443)));
        store.put(&first).unwrap();
        store.put(&second).unwrap();

        let loaded = store.get(ServiceName::Rgw).unwrap().unwrap();
        assert_eq!(loaded.revision, 2);

        assert!(store.remove(ServiceName::Rgw).unwrap());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_store_error_display() {
        let err = StoreError::Backend {
            reason: "disk full".to_string(),
        };
        assert!(err.to_string().contains("disk full"));

        let core: CoreError = err.into();
        assert!(matches!(core, CoreError::Io { .. }));
    }
}
