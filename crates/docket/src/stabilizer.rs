//! Wait until a newly created file is safe to read.
//!
//! A creation event can fire while the producer (scanner, copy job) is still
//! writing. Each sample opens the file and takes a non-blocking shared lock;
//! the handle is dropped before the sample returns, releasing the lock.

use crate::config::RetryPolicy;
use fs2::FileExt;
use std::fs::File;
use std::io;
use std::path::Path;
use std::thread;
use std::time::Duration;
use tracing::debug;

/// Result of a single sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sample {
    Stable,
    /// Locked, permission denied or otherwise unreadable right now.
    Busy,
    /// The file no longer exists; retrying cannot help.
    Gone,
}

/// Stabilization state carried on the per-file context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Stability {
    #[default]
    Unknown,
    Stable,
    Unstable,
}

#[derive(Debug, Clone, Copy)]
pub struct Stabilizer {
    max_attempts: u32,
    delay: Duration,
}

impl Stabilizer {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn from_policy(policy: RetryPolicy) -> Self {
        Self::new(policy.attempts, policy.delay())
    }

    pub fn wait(&self, path: &Path) -> Stability {
        if wait_stable(path, self.max_attempts, self.delay) {
            Stability::Stable
        } else {
            Stability::Unstable
        }
    }
}

/// Sample `path` up to `max_attempts` times, sleeping `delay` between samples.
///
/// Returns true on the first successful sample. A missing file ends the wait
/// immediately with false.
pub fn wait_stable(path: &Path, max_attempts: u32, delay: Duration) -> bool {
    for attempt in 1..=max_attempts {
        match sample(path) {
            Sample::Stable => return true,
            Sample::Gone => {
                debug!(path = %path.display(), "File vanished before it stabilized");
                return false;
            }
            Sample::Busy => {
                debug!(
                    path = %path.display(),
                    attempt,
                    max_attempts,
                    "File not yet stable"
                );
                if attempt < max_attempts {
                    thread::sleep(delay);
                }
            }
        }
    }
    false
}

/// One open-and-lock attempt.
pub fn sample(path: &Path) -> Sample {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Sample::Gone,
        Err(_) => return Sample::Busy,
    };
    if file.metadata().map(|m| m.is_dir()).unwrap_or(true) {
        return Sample::Busy;
    }
    // Fully qualified so std's File::try_lock_shared (Rust 1.89+) is not picked.
    match FileExt::try_lock_shared(&file) {
        Ok(()) => {
            let _ = FileExt::unlock(&file);
            Sample::Stable
        }
        Err(_) => Sample::Busy,
    }
}
