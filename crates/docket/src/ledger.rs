//! Hash Ledger - durable path -> SHA-256 mapping
//!
//! The ledger is a cache of the last digest computed for each path the
//! pipeline has touched. It is loaded once, mutated in memory and rewritten
//! wholesale (temp file + rename) after every mutation.
//!
//! # Storage Format
//!
//! ```text
//! {
//!     "/scans/FRM1/2024-01/240115FRM1JD.pdf": "9f86d081884c7d65...",
//!     ...
//! }
//! ```

use crate::error::LedgerError;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

const HASH_CHUNK_SIZE: usize = 8192;

/// Ledger shared by every pipeline worker; hold the lock across
/// read-modify-persist.
pub type SharedLedger = Arc<Mutex<HashLedger>>;

#[derive(Debug)]
pub struct HashLedger {
    file: PathBuf,
    entries: BTreeMap<String, String>,
}

impl HashLedger {
    /// Load the ledger from `file`; a missing file is an empty ledger.
    pub fn load(file: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let file = file.into();
        let entries = match fs::read_to_string(&file) {
            Ok(json) if json.trim().is_empty() => BTreeMap::new(),
            Ok(json) => serde_json::from_str(&json).map_err(|source| LedgerError::Parse {
                path: file.clone(),
                source,
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => {
                return Err(LedgerError::Read {
                    path: file.clone(),
                    source,
                })
            }
        };
        debug!(path = %file.display(), entries = entries.len(), "Loaded ledger");
        Ok(Self { file, entries })
    }

    pub fn into_shared(self) -> SharedLedger {
        Arc::new(Mutex::new(self))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &Path) -> Option<&str> {
        self.entries.get(&ledger_key(path)).map(String::as_str)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(&ledger_key(path))
    }

    /// Hash `path` and upsert it.
    ///
    /// Returns `Ok(None)` when the file cannot be read; the ledger is left
    /// untouched in that case.
    pub fn record(&mut self, path: &Path) -> Result<Option<String>, LedgerError> {
        self.record_final(None, path)
    }

    /// Hash the final resting `path` of a pipeline run and upsert it, dropping
    /// the entry for `previous` (where the run started) in the same write.
    pub fn record_final(
        &mut self,
        previous: Option<&Path>,
        path: &Path,
    ) -> Result<Option<String>, LedgerError> {
        let digest = match hash_file(path) {
            Ok(digest) => digest,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot hash file");
                return Ok(None);
            }
        };

        let key = ledger_key(path);
        if let Some(previous) = previous {
            let old = ledger_key(previous);
            if old != key {
                self.entries.remove(&old);
            }
        }
        self.entries.insert(key, digest.clone());
        self.persist()?;
        Ok(Some(digest))
    }

    /// Set the digest for `path` directly.
    pub fn upsert(&mut self, path: &Path, digest: String) -> Result<Option<String>, LedgerError> {
        let old = self.entries.insert(ledger_key(path), digest);
        self.persist()?;
        Ok(old)
    }

    /// Drop `path`; persists only if an entry existed.
    pub fn remove(&mut self, path: &Path) -> Result<Option<String>, LedgerError> {
        let removed = self.entries.remove(&ledger_key(path));
        if removed.is_some() {
            self.persist()?;
        }
        Ok(removed)
    }

    /// Move the entry for `from` to `to`, keeping its digest.
    pub fn relocate(&mut self, from: &Path, to: &Path) -> Result<Option<String>, LedgerError> {
        let Some(digest) = self.entries.remove(&ledger_key(from)) else {
            return Ok(None);
        };
        self.entries.insert(ledger_key(to), digest.clone());
        self.persist()?;
        Ok(Some(digest))
    }

    /// Rewrite the ledger file atomically.
    pub fn persist(&self) -> Result<(), LedgerError> {
        let json = serde_json::to_string_pretty(&self.entries)?;
        atomic_write(&self.file, json.as_bytes()).map_err(|source| LedgerError::Write {
            path: self.file.clone(),
            source,
        })?;
        debug!(path = %self.file.display(), entries = self.entries.len(), "Persisted ledger");
        Ok(())
    }
}

/// Streaming SHA-256 of a file, as lowercase hex.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; HASH_CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Absolute path string used as the ledger key.
pub fn ledger_key(path: &Path) -> String {
    if path.is_absolute() {
        return path.to_string_lossy().into_owned();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path).to_string_lossy().into_owned(),
        Err(_) => path.to_string_lossy().into_owned(),
    }
}

/// Atomic write via temp file + rename in the target's directory.
///
/// The temp name ends in `.tmp` so a watcher over the same tree ignores it.
fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "ledger".to_string());
    let temp_path = parent.join(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4()));

    let result = (|| {
        let mut file = File::create(&temp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&temp_path, path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}
