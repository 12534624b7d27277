//! Filesystem events, normalized from `notify` into the four kinds the
//! pipeline acts on.

use crate::error::Result;
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchEventKind {
    Created,
    Modified,
    Deleted,
    Moved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub path: PathBuf,
    /// Destination of a move.
    pub dest_path: Option<PathBuf>,
    pub is_directory: bool,
}

impl WatchEvent {
    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self::file(WatchEventKind::Created, path.into())
    }

    pub fn modified(path: impl Into<PathBuf>) -> Self {
        Self::file(WatchEventKind::Modified, path.into())
    }

    pub fn deleted(path: impl Into<PathBuf>) -> Self {
        Self::file(WatchEventKind::Deleted, path.into())
    }

    pub fn moved(from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
        Self {
            kind: WatchEventKind::Moved,
            path: from.into(),
            dest_path: Some(to.into()),
            is_directory: false,
        }
    }

    fn file(kind: WatchEventKind, path: PathBuf) -> Self {
        Self {
            kind,
            path,
            dest_path: None,
            is_directory: false,
        }
    }

    fn directory(mut self, is_directory: bool) -> Self {
        self.is_directory = is_directory;
        self
    }
}

/// Map one `notify` event onto zero or more watch events.
///
/// Half renames (only the source or only the destination known) and
/// access/metadata notifications are dropped.
pub fn normalize(event: Event) -> Vec<WatchEvent> {
    match event.kind {
        EventKind::Create(kind) => event
            .paths
            .into_iter()
            .map(|path| {
                let is_dir = match kind {
                    CreateKind::Folder => true,
                    CreateKind::File => false,
                    _ => path.is_dir(),
                };
                WatchEvent::created(path).directory(is_dir)
            })
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut paths = event.paths.into_iter();
            match (paths.next(), paths.next()) {
                (Some(from), Some(to)) => {
                    let is_dir = to.is_dir();
                    vec![WatchEvent::moved(from, to).directory(is_dir)]
                }
                _ => Vec::new(),
            }
        }
        EventKind::Modify(ModifyKind::Name(_)) | EventKind::Modify(ModifyKind::Metadata(_)) => {
            Vec::new()
        }
        EventKind::Modify(_) => event
            .paths
            .into_iter()
            .map(|path| {
                let is_dir = path.is_dir();
                WatchEvent::modified(path).directory(is_dir)
            })
            .collect(),
        EventKind::Remove(kind) => event
            .paths
            .into_iter()
            .map(|path| WatchEvent::deleted(path).directory(kind == RemoveKind::Folder))
            .collect(),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

/// A recursive watch over `root`; stops when dropped.
pub struct FsWatcher {
    root: PathBuf,
    _watcher: RecommendedWatcher,
}

impl FsWatcher {
    /// Start watching `root`, forwarding normalized events to `tx`.
    pub fn start(root: &Path, tx: Sender<WatchEvent>) -> Result<Self> {
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for watch_event in normalize(event) {
                    if tx.send(watch_event).is_err() {
                        debug!("Watch event dropped because the session channel is closed");
                        return;
                    }
                }
            }
            Err(e) => warn!(error = %e, "Watch backend emitted error"),
        })?;
        watcher.watch(root, RecursiveMode::Recursive)?;
        info!(root = %root.display(), "Watching");

        Ok(Self {
            root: root.to_path_buf(),
            _watcher: watcher,
        })
    }
}

impl Drop for FsWatcher {
    fn drop(&mut self) {
        debug!(root = %self.root.display(), "Stopped watching");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, DataChange};

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        let mut event = Event::new(kind);
        for p in paths {
            event = event.add_path(PathBuf::from(p));
        }
        event
    }

    #[test]
    fn test_create_file() {
        let events = normalize(event(
            EventKind::Create(CreateKind::File),
            &["/in/scan.pdf"],
        ));
        assert_eq!(events, vec![WatchEvent::created("/in/scan.pdf")]);
    }

    #[test]
    fn test_create_folder_is_directory() {
        let events = normalize(event(EventKind::Create(CreateKind::Folder), &["/in/FRM1"]));
        assert_eq!(events.len(), 1);
        assert!(events[0].is_directory);
    }

    #[test]
    fn test_full_rename_is_moved() {
        let events = normalize(event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/in/a.pdf", "/in/b.pdf"],
        ));
        assert_eq!(events, vec![WatchEvent::moved("/in/a.pdf", "/in/b.pdf")]);
    }

    #[test]
    fn test_half_renames_are_dropped() {
        for mode in [RenameMode::From, RenameMode::To, RenameMode::Any] {
            let events = normalize(event(
                EventKind::Modify(ModifyKind::Name(mode)),
                &["/in/a.pdf"],
            ));
            assert!(events.is_empty(), "{mode:?}");
        }
    }

    #[test]
    fn test_data_change_is_modified() {
        let events = normalize(event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &["/in/a.pdf"],
        ));
        assert_eq!(events, vec![WatchEvent::modified("/in/a.pdf")]);
    }

    #[test]
    fn test_remove_is_deleted() {
        let events = normalize(event(
            EventKind::Remove(RemoveKind::File),
            &["/in/a.pdf"],
        ));
        assert_eq!(events, vec![WatchEvent::deleted("/in/a.pdf")]);
    }

    #[test]
    fn test_access_is_dropped() {
        let events = normalize(event(
            EventKind::Access(AccessKind::Read),
            &["/in/a.pdf"],
        ));
        assert!(events.is_empty());
    }
}
