//! Reconciliation Log
//!
//! Where a purchase goes when the gateway took the money but the ledger
//! could not record it. Entries are for an operator to credit by hand.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{CheckoutError, Result};
use crate::session::truncated;

/// A paid purchase that is not yet credited
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationEntry {
    pub identity: String,
    pub item_id: String,
    pub token: String,
    pub payer_id: String,
    pub amount: String,
    pub currency: String,
    pub transaction_id: Option<String>,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only escalation log
pub trait ReconciliationLog: Send + Sync {
    fn append(&self, entry: &ReconciliationEntry) -> Result<()>;

    fn entries(&self) -> Result<Vec<ReconciliationEntry>>;
}

fn log_entry(entry: &ReconciliationEntry) {
    tracing::error!(
        identity = %entry.identity,
        item_id = %entry.item_id,
        token = %truncated(&entry.token),
        transaction_id = ?entry.transaction_id,
        reason = %entry.reason,
        "Payment captured but not credited; manual reconciliation required"
    );
}

/// In-memory log (for tests)
#[derive(Default)]
pub struct MemoryReconciliationLog {
    entries: Mutex<Vec<ReconciliationEntry>>,
}

impl MemoryReconciliationLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReconciliationLog for MemoryReconciliationLog {
    fn append(&self, entry: &ReconciliationEntry) -> Result<()> {
        log_entry(entry);
        self.entries.lock().push(entry.clone());
        Ok(())
    }

    fn entries(&self) -> Result<Vec<ReconciliationEntry>> {
        Ok(self.entries.lock().clone())
    }
}

/// One JSON object per line, appended to a file
pub struct JsonLinesReconciliationLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonLinesReconciliationLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    fn io_err(&self, e: &dyn std::fmt::Display) -> CheckoutError {
        CheckoutError::Persistence(format!("reconciliation log {}: {e}", self.path.display()))
    }
}

impl ReconciliationLog for JsonLinesReconciliationLog {
    fn append(&self, entry: &ReconciliationEntry) -> Result<()> {
        log_entry(entry);

        let mut line = serde_json::to_string(entry).map_err(|e| self.io_err(&e))?;
        line.push('\n');

        let _guard = self.lock.lock();
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| self.io_err(&e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_err(&e))?;
        file.write_all(line.as_bytes()).map_err(|e| self.io_err(&e))?;
        file.sync_data().map_err(|e| self.io_err(&e))
    }

    fn entries(&self) -> Result<Vec<ReconciliationEntry>> {
        let _guard = self.lock.lock();
        let file = match std::fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_err(&e)),
        };

        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| self.io_err(&e))?;
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(&line).map_err(|e| self.io_err(&e))?);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(item_id: &str) -> ReconciliationEntry {
        ReconciliationEntry {
            identity: "alice".into(),
            item_id: item_id.into(),
            token: "EC-TOK-1".into(),
            payer_id: "PAYER-1".into(),
            amount: "3.00".into(),
            currency: "USD".into(),
            transaction_id: Some("9XY".into()),
            reason: "disk full".into(),
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_json_lines_append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonLinesReconciliationLog::new(dir.path().join("recon").join("log.jsonl"));
        assert!(log.entries().unwrap().is_empty());

        log.append(&entry("invoice_template1")).unwrap();
        log.append(&entry("letter_of_resignation1")).unwrap();

        let entries = log.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].item_id, "invoice_template1");
        assert_eq!(entries[1].item_id, "letter_of_resignation1");
    }

    #[test]
    fn test_memory_log() {
        let log = MemoryReconciliationLog::new();
        log.append(&entry("invoice_template1")).unwrap();
        let entries = log.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].token, "EC-TOK-1");
    }
}
