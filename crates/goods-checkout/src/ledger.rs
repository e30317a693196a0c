//! Purchase Ledger
//!
//! Durable per-identity record of purchased item ids. Every update is a
//! read-modify-write guarded by a version check, so two purchases landing
//! for the same identity at once cannot overwrite each other.

use std::collections::{BTreeSet, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{CheckoutError, Result};

/// Conflicting writers retried before giving up
const MAX_CONFLICT_RETRIES: usize = 16;

/// Purchases made by one identity
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRecord {
    pub identity: String,

    /// Purchased item ids (each at most once)
    pub purchased: BTreeSet<String>,

    /// Incremented on every successful write; 0 means never stored
    pub version: u64,

    pub updated_at: DateTime<Utc>,
}

impl PurchaseRecord {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            purchased: BTreeSet::new(),
            version: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn contains(&self, item_id: &str) -> bool {
        self.purchased.contains(item_id)
    }
}

/// Identity-keyed persistent store backing the ledger
pub trait PurchaseStore: Send + Sync {
    /// Load the stored record for an identity
    fn load(&self, identity: &str) -> Result<Option<PurchaseRecord>>;

    /// Write `record` only if the stored version still equals `expected`
    /// (`None` = no record stored yet). Returns `false` on conflict.
    fn compare_and_swap(
        &self,
        identity: &str,
        expected: Option<u64>,
        record: &PurchaseRecord,
    ) -> Result<bool>;
}

fn stored_version(records: &HashMap<String, PurchaseRecord>, identity: &str) -> Option<u64> {
    records.get(identity).map(|r| r.version)
}

/// In-memory purchase store (for development and tests)
#[derive(Default)]
pub struct MemoryPurchaseStore {
    records: Mutex<HashMap<String, PurchaseRecord>>,
}

impl MemoryPurchaseStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PurchaseStore for MemoryPurchaseStore {
    fn load(&self, identity: &str) -> Result<Option<PurchaseRecord>> {
        Ok(self.records.lock().get(identity).cloned())
    }

    fn compare_and_swap(
        &self,
        identity: &str,
        expected: Option<u64>,
        record: &PurchaseRecord,
    ) -> Result<bool> {
        let mut records = self.records.lock();
        if stored_version(&records, identity) != expected {
            return Ok(false);
        }
        records.insert(identity.to_string(), record.clone());
        Ok(true)
    }
}

/// JSON file purchase store.
///
/// The whole map is rewritten through a temporary file in the same
/// directory and renamed into place, so a crash never leaves a torn file.
pub struct JsonFilePurchaseStore {
    path: PathBuf,
    records: Mutex<HashMap<String, PurchaseRecord>>,
}

impl JsonFilePurchaseStore {
    /// Open (or create) the store at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let records = match std::fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => HashMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                CheckoutError::Persistence(format!("corrupt ledger {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                return Err(CheckoutError::Persistence(format!(
                    "read {}: {e}",
                    path.display()
                )));
            }
        };

        tracing::info!(path = %path.display(), identities = records.len(), "Opened purchase ledger");

        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    fn flush(&self, records: &HashMap<String, PurchaseRecord>) -> Result<()> {
        let persist_err = |e: &dyn std::fmt::Display| {
            CheckoutError::Persistence(format!("write {}: {e}", self.path.display()))
        };

        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(|e| persist_err(&e))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| persist_err(&e))?;
        serde_json::to_writer_pretty(&mut tmp, records).map_err(|e| persist_err(&e))?;
        tmp.flush().map_err(|e| persist_err(&e))?;
        tmp.as_file().sync_all().map_err(|e| persist_err(&e))?;
        tmp.persist(&self.path).map_err(|e| persist_err(&e.error))?;
        Ok(())
    }
}

impl PurchaseStore for JsonFilePurchaseStore {
    fn load(&self, identity: &str) -> Result<Option<PurchaseRecord>> {
        Ok(self.records.lock().get(identity).cloned())
    }

    fn compare_and_swap(
        &self,
        identity: &str,
        expected: Option<u64>,
        record: &PurchaseRecord,
    ) -> Result<bool> {
        let mut records = self.records.lock();
        if stored_version(&records, identity) != expected {
            return Ok(false);
        }

        let previous = records.insert(identity.to_string(), record.clone());
        if let Err(e) = self.flush(&records) {
            // Keep memory consistent with what is on disk.
            match previous {
                Some(previous) => records.insert(identity.to_string(), previous),
                None => records.remove(identity),
            };
            return Err(e);
        }
        Ok(true)
    }
}

/// Purchase ledger
#[derive(Clone)]
pub struct PurchaseLedger {
    store: Arc<dyn PurchaseStore>,
}

impl PurchaseLedger {
    pub fn new(store: Arc<dyn PurchaseStore>) -> Self {
        Self { store }
    }

    /// Ledger over an in-memory store
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryPurchaseStore::new()))
    }

    /// Record that `identity` owns `item_id`. Recording twice is a no-op.
    pub fn record_purchase(&self, identity: &str, item_id: &str) -> Result<PurchaseRecord> {
        self.update(identity, |record| {
            record.purchased.insert(item_id.to_string())
        })
    }

    /// Create an empty record if the identity has none
    pub fn ensure_record(&self, identity: &str) -> Result<PurchaseRecord> {
        self.update(identity, |_| false)
    }

    pub fn has_purchased(&self, identity: &str, item_id: &str) -> Result<bool> {
        Ok(self.get(identity)?.contains(item_id))
    }

    /// Stored record, or an empty one if the identity never purchased
    pub fn get(&self, identity: &str) -> Result<PurchaseRecord> {
        Ok(self
            .store
            .load(identity)?
            .unwrap_or_else(|| PurchaseRecord::new(identity)))
    }

    /// Apply `mutate` under a version check, retrying on conflicts.
    ///
    /// `mutate` returns whether it changed the record; unchanged records that
    /// already exist are not rewritten.
    fn update<F>(&self, identity: &str, mut mutate: F) -> Result<PurchaseRecord>
    where
        F: FnMut(&mut PurchaseRecord) -> bool,
    {
        for _ in 0..MAX_CONFLICT_RETRIES {
            let current = self.store.load(identity)?;
            let expected = current.as_ref().map(|r| r.version);
            let mut record = current.unwrap_or_else(|| PurchaseRecord::new(identity));

            let changed = mutate(&mut record);
            if !changed && expected.is_some() {
                return Ok(record);
            }

            record.version = expected.map_or(1, |v| v + 1);
            record.updated_at = Utc::now();

            if self.store.compare_and_swap(identity, expected, &record)? {
                tracing::debug!(identity = %identity, version = record.version, "Ledger record written");
                return Ok(record);
            }
            tracing::debug!(identity = %identity, "Ledger write conflict, retrying");
        }

        Err(CheckoutError::Persistence(format!(
            "gave up after {MAX_CONFLICT_RETRIES} conflicting writes for {identity}"
        )))
    }
}
