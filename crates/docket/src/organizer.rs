//! Move renamed documents into `<root>/<form_id>/<year>-<month>/`.

use crate::error::{DocketError, Result};
use crate::planner::{self, Plan};
use crate::renamer::{move_no_clobber, Placement};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrganizeOutcome {
    Moved { from: PathBuf, to: PathBuf },
    /// The document already sits at its planned destination.
    InPlace { path: PathBuf },
    /// A different file occupies the destination; nothing moved.
    DestinationTaken { path: PathBuf, destination: PathBuf },
    /// The name does not carry a form id and month; nothing moved.
    Unplannable { path: PathBuf },
}

impl OrganizeOutcome {
    /// The organized location, if the document is now organized.
    pub fn destination(&self) -> Option<&Path> {
        match self {
            OrganizeOutcome::Moved { to, .. } => Some(to),
            OrganizeOutcome::InPlace { path } => Some(path),
            OrganizeOutcome::DestinationTaken { .. } | OrganizeOutcome::Unplannable { .. } => None,
        }
    }

    /// Where the document lives after this step.
    pub fn path(&self) -> &Path {
        match self {
            OrganizeOutcome::Moved { to, .. } => to,
            OrganizeOutcome::InPlace { path }
            | OrganizeOutcome::DestinationTaken { path, .. }
            | OrganizeOutcome::Unplannable { path } => path,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Organizer {
    root: PathBuf,
}

impl Organizer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Planned destination for `path`, without touching the filesystem.
    pub fn destination_for(&self, path: &Path) -> Option<PathBuf> {
        let name = path.file_name()?.to_str()?;
        let plan: Plan = planner::plan(name)?;
        Some(plan.directory(&self.root).join(name))
    }

    /// Create the destination directory and move `path` into it.
    ///
    /// Directory creation and move failures are errors; an unplannable name or
    /// an occupied destination are outcomes.
    pub fn organize(&self, path: &Path) -> Result<OrganizeOutcome> {
        let Some(destination) = self.destination_for(path) else {
            warn!(path = %path.display(), "Failed to organize: name has no form id / month");
            return Ok(OrganizeOutcome::Unplannable {
                path: path.to_path_buf(),
            });
        };

        if destination == path {
            return Ok(OrganizeOutcome::InPlace {
                path: path.to_path_buf(),
            });
        }
        if destination.exists() {
            if same_file(path, &destination) {
                return Ok(OrganizeOutcome::InPlace { path: destination });
            }
            warn!(
                path = %path.display(),
                destination = %destination.display(),
                "Destination already exists, leaving document in place"
            );
            return Ok(OrganizeOutcome::DestinationTaken {
                path: path.to_path_buf(),
                destination,
            });
        }

        if let Some(dir) = destination.parent() {
            std::fs::create_dir_all(dir).map_err(|source| DocketError::CreateDir {
                dir: dir.to_path_buf(),
                source,
            })?;
        }
        let placement =
            move_no_clobber(path, &destination).map_err(|source| DocketError::Move {
                from: path.to_path_buf(),
                to: destination.clone(),
                source,
            })?;
        if placement == Placement::Occupied {
            warn!(
                path = %path.display(),
                destination = %destination.display(),
                "Destination claimed concurrently, leaving document in place"
            );
            return Ok(OrganizeOutcome::DestinationTaken {
                path: path.to_path_buf(),
                destination,
            });
        }
        info!(from = %path.display(), to = %destination.display(), "Organized document");

        Ok(OrganizeOutcome::Moved {
            from: path.to_path_buf(),
            to: destination,
        })
    }
}

/// Both paths resolve to the same file (e.g. the root was given relatively).
fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
