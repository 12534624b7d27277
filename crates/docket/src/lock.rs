//! Ledger lock shared by every docket process.
//!
//! Each process rewrites the ledger wholesale, so only one may hold it at a
//! time. The holder keeps an exclusive `fs2` lock on `<ledger>.lock`.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("ledger {0} is in use by another docket process")]
    Locked(PathBuf),

    #[error("cannot lock ledger: {0}")]
    Io(#[from] io::Error),
}

/// Releases the lock when dropped.
#[derive(Debug)]
pub struct SessionLock {
    _file: File,
}

/// Take the ledger lock without blocking.
pub fn try_lock_session(ledger_path: &Path) -> Result<SessionLock, LockError> {
    let mut name = ledger_path.as_os_str().to_owned();
    name.push(".lock");
    let lock_path = PathBuf::from(name);
    if let Some(parent) = lock_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)?;

    // Fully qualified: newer toolchains add an inherent File::try_lock_exclusive.
    match FileExt::try_lock_exclusive(&file) {
        Ok(()) => {
            debug!(path = %lock_path.display(), "Locked ledger");
            Ok(SessionLock { _file: file })
        }
        Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
            Err(LockError::Locked(ledger_path.to_path_buf()))
        }
        Err(e) => Err(e.into()),
    }
}
