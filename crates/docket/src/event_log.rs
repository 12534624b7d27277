//! Append-only event log: one `[YYYY-MM-DD HH:MM:SS] message` line per
//! state transition, also echoed to the console through `tracing`.

use chrono::{DateTime, Local};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{error, info};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub message: String,
}

impl LogEntry {
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            message: message.into(),
        }
    }

    pub fn line(&self) -> String {
        format!("[{}] {}", self.timestamp.format(TIMESTAMP_FORMAT), self.message)
    }
}

/// Cloneable handle; lines from concurrent workers never interleave.
#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `message`. A failure to write is reported on the console and
    /// otherwise swallowed: the log must never stop the pipeline.
    pub fn record(&self, message: impl Into<String>) {
        let entry = LogEntry::now(message);
        info!(target: "docket::events", "{}", entry.message);
        if let Err(e) = self.append(&entry) {
            error!(path = %self.path.display(), error = %e, "Failed to write event log");
        }
    }

    fn append(&self, entry: &LogEntry) -> io::Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "event log lock poisoned"))?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", entry.line())
    }

    /// Messages (timestamps stripped) currently in the log file.
    pub fn messages(&self) -> io::Result<Vec<String>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        Ok(content.lines().map(|l| strip_timestamp(l).to_string()).collect())
    }
}

fn strip_timestamp(line: &str) -> &str {
    match line.find("] ") {
        Some(idx) if line.starts_with('[') => &line[idx + 2..],
        _ => line,
    }
}
