//! The watch session: Idle -> Watching -> Stopping -> Stopped.

use crate::dispatch::WorkerPool;
use crate::error::{DocketError, Result};
use crate::lock::try_lock_session;
use crate::pipeline::Pipeline;
use crate::watcher::{FsWatcher, WatchEvent};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// At most one session watches per process.
static ACTIVE_SESSION: AtomicBool = AtomicBool::new(false);

/// Cooperative stop request. Clone is cheap and shares state.
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken {
    requested: Arc<AtomicBool>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Ask the session to stop. Returns `true` if a stop was already pending.
    pub fn request(&self) -> bool {
        self.requested.swap(true, Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Watching,
    Stopping,
    Stopped,
}

/// Read-only view of a session's state from another thread.
#[derive(Debug, Clone)]
pub struct SessionObserver {
    state: Arc<Mutex<SessionState>>,
}

impl SessionObserver {
    pub fn state(&self) -> SessionState {
        match self.state.lock() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

struct ActiveGuard;

impl ActiveGuard {
    fn acquire() -> Result<Self> {
        ACTIVE_SESSION
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ActiveGuard)
            .map_err(|_| {
                DocketError::InvalidState("a watch session is already running".to_string())
            })
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        ACTIVE_SESSION.store(false, Ordering::SeqCst);
    }
}

pub struct WatchSession {
    root: PathBuf,
    pipeline: Arc<Pipeline>,
    workers: usize,
    state: Arc<Mutex<SessionState>>,
}

impl WatchSession {
    pub fn new(root: impl Into<PathBuf>, pipeline: Pipeline) -> Self {
        let workers = pipeline.config().workers;
        Self {
            root: root.into(),
            pipeline: Arc::new(pipeline),
            workers,
            state: Arc::new(Mutex::new(SessionState::Idle)),
        }
    }

    pub fn state(&self) -> SessionState {
        self.observer().state()
    }

    pub fn observer(&self) -> SessionObserver {
        SessionObserver {
            state: Arc::clone(&self.state),
        }
    }

    /// Watch the root recursively until `shutdown` is requested.
    pub fn run(&mut self, shutdown: &ShutdownToken) -> Result<()> {
        if !self.root.is_dir() {
            return Err(DocketError::InvalidState(format!(
                "watch root is not a directory: {}",
                self.root.display()
            )));
        }
        let (tx, rx) = mpsc::channel();
        self.run_inner(rx, shutdown, |root| FsWatcher::start(root, tx).map(Some))
    }

    /// Drive the session from an explicit event source instead of the
    /// filesystem. The session also stops when every sender is dropped.
    pub fn run_with_events(
        &mut self,
        events: Receiver<WatchEvent>,
        shutdown: &ShutdownToken,
    ) -> Result<()> {
        self.run_inner(events, shutdown, |_| Ok(None))
    }

    fn run_inner<F>(
        &mut self,
        events: Receiver<WatchEvent>,
        shutdown: &ShutdownToken,
        start_source: F,
    ) -> Result<()>
    where
        F: FnOnce(&Path) -> Result<Option<FsWatcher>>,
    {
        if self.state() != SessionState::Idle {
            return Err(DocketError::InvalidState(format!(
                "session cannot start from {:?}",
                self.state()
            )));
        }
        let _active = ActiveGuard::acquire()?;
        let _lock = try_lock_session(&self.pipeline.config().ledger_path)?;
        self.pipeline.reload_ledger()?;

        let pool = WorkerPool::start(self.workers, Arc::clone(&self.pipeline))?;
        let watcher = match start_source(&self.root) {
            Ok(watcher) => watcher,
            Err(e) => {
                pool.shutdown();
                self.set_state(SessionState::Stopped);
                return Err(e);
            }
        };

        self.set_state(SessionState::Watching);
        self.pipeline
            .events()
            .record(format!("Monitoring started: {}", self.root.display()));

        loop {
            if shutdown.is_requested() {
                info!("Shutdown requested");
                break;
            }
            match events.recv_timeout(POLL_INTERVAL) {
                Ok(event) => {
                    if !self.pipeline.accepts(&event) {
                        continue;
                    }
                    if let Err(e) = pool.submit(event) {
                        error!(error = %e, "Failed to queue event");
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("Event source closed");
                    break;
                }
            }
        }

        self.set_state(SessionState::Stopping);
        drop(watcher);
        let discarded = events.try_iter().count();
        if discarded > 0 {
            debug!(discarded, "Discarded events received after stop");
        }
        pool.shutdown();

        let flushed = self.pipeline.flush();
        if let Err(e) = &flushed {
            warn!(error = %e, "Final ledger flush failed");
        }
        self.pipeline
            .events()
            .record(format!("Monitoring stopped: {}", self.root.display()));
        self.set_state(SessionState::Stopped);
        flushed
    }

    fn set_state(&self, next: SessionState) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        debug!(from = ?*state, to = ?next, "Session state");
        *state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_token_shares_state() {
        let token = ShutdownToken::new();
        let clone = token.clone();
        assert!(!token.is_requested());
        assert!(!clone.request());
        assert!(token.is_requested());
    }

    #[test]
    fn test_repeated_stop_request_is_reported() {
        let token = ShutdownToken::new();
        assert!(!token.request());
        assert!(token.clone().request());
        assert!(token.request());
    }

    #[test]
    fn test_observer_reads_poisoned_state() {
        let state = Arc::new(Mutex::new(SessionState::Watching));
        let poison = Arc::clone(&state);
        let _ = std::thread::spawn(move || {
            let _guard = poison.lock().unwrap();
            panic!("poison");
        })
        .join();
        let observer = SessionObserver { state };
        assert_eq!(observer.state(), SessionState::Watching);
    }
}
