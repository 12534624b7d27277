//! Diagnostic logging for Docket binaries.
//!
//! This is the operator-facing `tracing` output (what the process is doing and
//! why it failed). The per-document audit trail lives in `docket::event_log`
//! and is written independently of the filter configured here.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "docket=info,docket_logging=info";
const MAX_LOG_FILES: usize = 5;
const MAX_LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Logging options for a binary.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    pub verbose: bool,
}

/// Install the global subscriber: a size-rotated file under `logs_dir()` and stderr.
///
/// Without `--verbose` the console only shows warnings; the file always
/// follows `RUST_LOG` (or the default filter).
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let log_dir = ensure_logs_dir().context("Failed to ensure log directory")?;
    let file_writer = RotatingWriter::open(&log_dir, config.app_name)
        .with_context(|| format!("Failed to open log file for {}", config.app_name))?;

    let file_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let console_filter = if config.verbose {
        file_filter.clone()
    } else {
        EnvFilter::new("docket=info,warn")
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_target(false)
                .with_filter(console_filter),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}

/// Docket home directory.
///
/// Priority:
/// 1) DOCKET_HOME
/// 2) home directory + `.docket`
/// 3) ./.docket
pub fn docket_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("DOCKET_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .map(|home| home.join(".docket"))
        .unwrap_or_else(|| PathBuf::from(".").join(".docket"))
}

/// Diagnostic log directory: ~/.docket/logs
pub fn logs_dir() -> PathBuf {
    docket_home().join("logs")
}

/// Create the diagnostic log directory if needed.
pub fn ensure_logs_dir() -> Result<PathBuf> {
    let logs = logs_dir();
    fs::create_dir_all(&logs)
        .with_context(|| format!("Failed to create logs directory: {}", logs.display()))?;
    Ok(logs)
}

/// Size-bounded log file that shifts `name.log` -> `name.log.1` -> ... when full.
struct RotatingFile {
    dir: PathBuf,
    stem: String,
    keep: usize,
    limit: u64,
    file: Option<File>,
    written: u64,
}

impl RotatingFile {
    fn open(dir: &Path, name: &str, keep: usize, limit: u64) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let mut rotating = Self {
            dir: dir.to_path_buf(),
            stem: file_stem(name),
            keep: keep.max(1),
            limit,
            file: None,
            written: 0,
        };
        rotating.reopen()?;
        if rotating.written > rotating.limit {
            rotating.rotate()?;
        }
        Ok(rotating)
    }

    fn active_path(&self) -> PathBuf {
        self.dir.join(format!("{}.log", self.stem))
    }

    fn archive_path(&self, generation: usize) -> PathBuf {
        self.dir.join(format!("{}.log.{}", self.stem, generation))
    }

    fn reopen(&mut self) -> io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.active_path())?;
        self.written = file.metadata()?.len();
        self.file = Some(file);
        Ok(())
    }

    fn rotate(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            let _ = file.flush();
        }

        let oldest = self.keep - 1;
        if oldest > 0 {
            let doomed = self.archive_path(oldest);
            if doomed.exists() {
                fs::remove_file(&doomed)?;
            }
            for generation in (1..oldest).rev() {
                let from = self.archive_path(generation);
                if from.exists() {
                    fs::rename(&from, self.archive_path(generation + 1))?;
                }
            }
            let active = self.active_path();
            if active.exists() {
                fs::rename(active, self.archive_path(1))?;
            }
        } else {
            // keep == 1: truncate in place.
            File::create(self.active_path())?;
        }

        self.reopen()
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.limit {
            self.rotate()?;
        }
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "log file unavailable"))?;
        let n = file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// `MakeWriter` handle shared between the subscriber's threads.
#[derive(Clone)]
struct RotatingWriter {
    inner: Arc<Mutex<RotatingFile>>,
}

impl RotatingWriter {
    fn open(dir: &Path, name: &str) -> io::Result<Self> {
        let file = RotatingFile::open(dir, name, MAX_LOG_FILES, MAX_LOG_FILE_SIZE)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(file)),
        })
    }

    fn with_file<T>(&self, f: impl FnOnce(&mut RotatingFile) -> io::Result<T>) -> io::Result<T> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        f(&mut guard)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for RotatingWriter {
    type Writer = RotatingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl Write for RotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.with_file(|file| file.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.with_file(|file| file.flush())
    }
}

fn file_stem(name: &str) -> String {
    name.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn file_stem_replaces_separators() {
        assert_eq!(file_stem("docket"), "docket");
        assert_eq!(file_stem("../evil name"), "___evil_name");
    }

    #[test]
    fn rotation_shifts_archives_and_caps_count() {
        let temp = TempDir::new().unwrap();
        let mut file = RotatingFile::open(temp.path(), "docket", 3, 8).unwrap();

        file.write_all(b"first---").unwrap();
        file.write_all(b"second--").unwrap();
        file.write_all(b"third---").unwrap();
        file.write_all(b"fourth--").unwrap();
        file.flush().unwrap();

        let active = fs::read_to_string(temp.path().join("docket.log")).unwrap();
        let one = fs::read_to_string(temp.path().join("docket.log.1")).unwrap();
        let two = fs::read_to_string(temp.path().join("docket.log.2")).unwrap();
        assert_eq!(active, "fourth--");
        assert_eq!(one, "third---");
        assert_eq!(two, "second--");
        assert!(!temp.path().join("docket.log.3").exists());
    }

    #[test]
    fn reopen_continues_existing_file() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("app.log"), b"abc").unwrap();

        let mut file = RotatingFile::open(temp.path(), "app", 2, 1024).unwrap();
        file.write_all(b"def").unwrap();
        file.flush().unwrap();

        let content = fs::read_to_string(temp.path().join("app.log")).unwrap();
        assert_eq!(content, "abcdef");
    }
}
