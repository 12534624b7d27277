//! Rename a document after its token, never overwriting.

use crate::error::{DocketError, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

/// Serializes the rename fallback on filesystems without hard links.
static RENAME_FALLBACK: Mutex<()> = Mutex::new(());

/// Extension given to renamed documents.
pub const DOCUMENT_EXTENSION: &str = "pdf";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenameOutcome {
    Renamed { from: PathBuf, to: PathBuf },
    /// The target name is taken (possibly by this very file); nothing moved.
    NameExists { path: PathBuf, existing: PathBuf },
    /// No token was extracted; nothing moved.
    NoToken { path: PathBuf },
    /// The token cannot be used as a file name; nothing moved.
    UnsafeToken { path: PathBuf, token: String },
}

impl RenameOutcome {
    /// Where the document lives after this step.
    pub fn path(&self) -> &Path {
        match self {
            RenameOutcome::Renamed { to, .. } => to,
            RenameOutcome::NameExists { path, .. }
            | RenameOutcome::NoToken { path }
            | RenameOutcome::UnsafeToken { path, .. } => path,
        }
    }
}

/// `<token>.pdf`
pub fn canonical_name(token: &str) -> String {
    format!("{}.{}", token, DOCUMENT_EXTENSION)
}

/// A token is usable as a name if it stays inside the directory it is placed in.
pub fn is_safe_token(token: &str) -> bool {
    !token.is_empty()
        && token != "."
        && token != ".."
        && !token.contains(['/', '\\', '\0'])
}

/// Rename `path` to `dirname(path)/<token>.pdf`.
///
/// Returns the original path unchanged when there is no token, when the token
/// is not a safe file name, or when the target already exists.
pub fn rename(path: &Path, token: Option<&str>) -> Result<RenameOutcome> {
    let Some(token) = token else {
        debug!(path = %path.display(), "No token, keeping name");
        return Ok(RenameOutcome::NoToken {
            path: path.to_path_buf(),
        });
    };

    if !is_safe_token(token) {
        return Ok(RenameOutcome::UnsafeToken {
            path: path.to_path_buf(),
            token: token.to_string(),
        });
    }

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let target = dir.join(canonical_name(token));

    let placement = move_no_clobber(path, &target).map_err(|source| DocketError::Rename {
        from: path.to_path_buf(),
        to: target.clone(),
        source,
    })?;
    if placement == Placement::Occupied {
        return Ok(RenameOutcome::NameExists {
            path: path.to_path_buf(),
            existing: target,
        });
    }
    info!(from = %path.display(), to = %target.display(), "Renamed document");

    Ok(RenameOutcome::Renamed {
        from: path.to_path_buf(),
        to: target,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Placement {
    Moved,
    /// Something already holds the destination name; nothing moved.
    Occupied,
}

/// Move `from` to `to` unless `to` exists.
///
/// The new name is claimed with a hard link, which fails if the name is
/// taken, so two concurrent moves onto one name cannot both succeed.
/// `rename` alone would silently replace the loser's file.
pub(crate) fn move_no_clobber(from: &Path, to: &Path) -> io::Result<Placement> {
    match fs::hard_link(from, to) {
        Ok(()) => {
            if let Err(e) = fs::remove_file(from) {
                let _ = fs::remove_file(to);
                return Err(e);
            }
            Ok(Placement::Moved)
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(Placement::Occupied),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(e),
        Err(e) => {
            debug!(error = %e, "Hard link unavailable, using guarded rename");
            let _guard = RENAME_FALLBACK
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if to.exists() {
                return Ok(Placement::Occupied);
            }
            fs::rename(from, to)?;
            Ok(Placement::Moved)
        }
    }
}
