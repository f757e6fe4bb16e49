//! Persistent state under the store directory.
//!
//! The PID ledger remembers which PID each service was last started with so
//! a later run (or `fleet down`) can recognise stale instances.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Distinguishes temp files of concurrent writers within one process.
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Write `contents` to `path` via a temp file and rename, creating parents.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            Error::Filesystem(format!("Failed to create {}: {}", parent.display(), e))
        })?;
    }

    let temp_path = temp_path_for(path);
    let mut file = fs::File::create(&temp_path)
        .map_err(|e| Error::Filesystem(format!("Failed to create temp file: {}", e)))?;
    file.write_all(contents)
        .map_err(|e| Error::Filesystem(format!("Failed to write temp file: {}", e)))?;
    file.sync_all()
        .map_err(|e| Error::Filesystem(format!("Failed to sync temp file: {}", e)))?;
    drop(file);

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        Error::Filesystem(format!("Failed to rename temp file to {}: {}", path.display(), e))
    })
}

/// `.<name>.<pid>.<n>.tmp` next to `path`, unique per writer.
fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    path.with_file_name(format!(".{}.{}.{}.tmp", name, std::process::id(), n))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub pid: u32,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    #[serde(default)]
    services: BTreeMap<String, LedgerEntry>,
}

/// Service id to last recorded PID, stored as JSON.
#[derive(Debug)]
pub struct PidLedger {
    path: PathBuf,
    entries: BTreeMap<String, LedgerEntry>,
}

impl PidLedger {
    /// Load the ledger at `path`. A missing file is an empty ledger.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str::<LedgerFile>(&contents)?.services,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(Error::Filesystem(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        Ok(Self { path, entries })
    }

    /// Load, falling back to an empty ledger on any error.
    pub fn load_or_empty(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match Self::load(path.clone()) {
            Ok(ledger) => ledger,
            Err(e) => {
                tracing::warn!("Ignoring unreadable PID ledger: {}", e);
                Self {
                    path,
                    entries: BTreeMap::new(),
                }
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, id: &str) -> Option<u32> {
        self.entries.get(id).map(|e| e.pid)
    }

    pub fn record(&mut self, id: &str, pid: u32) {
        self.entries.insert(
            id.to_string(),
            LedgerEntry {
                pid,
                recorded_at: Utc::now(),
            },
        );
    }

    pub fn remove(&mut self, id: &str) -> Option<u32> {
        self.entries.remove(id).map(|e| e.pid)
    }

    pub fn entries(&self) -> &BTreeMap<String, LedgerEntry> {
        &self.entries
    }

    pub fn save(&self) -> Result<()> {
        let file = LedgerFile {
            services: self.entries.clone(),
        };
        let contents = serde_json::to_string_pretty(&file)?;
        write_atomic(&self.path, contents.as_bytes())
    }
}
