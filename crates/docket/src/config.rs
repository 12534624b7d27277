//! Configuration for a Docket session

use crate::error::{DocketError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration, loaded from TOML. Every field has a default so an
/// empty (or absent) file is a valid configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocketConfig {
    /// JSON file holding the path -> digest ledger
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,

    /// Append-only event log
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,

    /// Root of the `<form_id>/<year>-<month>` hierarchy. When unset the watched
    /// root is used (or the document's own directory in single-file mode).
    #[serde(default)]
    pub organize_root: Option<PathBuf>,

    /// Path suffixes discarded before stabilization (temporary-file markers)
    #[serde(default = "default_ignored_extensions")]
    pub ignored_extensions: Vec<String>,

    /// Document extensions accepted for intake, compared case-insensitively
    #[serde(default = "default_accepted_extensions")]
    pub accepted_extensions: Vec<String>,

    /// Render resolution handed to the page renderer
    #[serde(default = "default_dpi")]
    pub dpi: u32,

    /// Pipeline worker threads. Events are routed by path, so raising this
    /// never lets two runs touch the same path at once.
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "RetryPolicy::stabilizer")]
    pub stabilizer: RetryPolicy,

    #[serde(default = "RetryPolicy::open")]
    pub open_retry: RetryPolicy,

    #[serde(default)]
    pub tools: ToolPaths,
}

/// Bounded attempts with a fixed delay between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay_ms: u64,
}

impl RetryPolicy {
    pub fn stabilizer() -> Self {
        Self {
            attempts: 10,
            delay_ms: 500,
        }
    }

    pub fn open() -> Self {
        Self {
            attempts: 3,
            delay_ms: 1000,
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// External binaries used for page rendering and barcode decoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolPaths {
    #[serde(default = "default_pdfinfo")]
    pub pdfinfo: PathBuf,
    #[serde(default = "default_pdftoppm")]
    pub pdftoppm: PathBuf,
    #[serde(default = "default_zbarimg")]
    pub zbarimg: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            pdfinfo: default_pdfinfo(),
            pdftoppm: default_pdftoppm(),
            zbarimg: default_zbarimg(),
        }
    }
}

fn tool_from_env(var: &str, fallback: &str) -> PathBuf {
    std::env::var(var)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(fallback))
}

fn default_pdfinfo() -> PathBuf {
    tool_from_env("DOCKET_PDFINFO_BIN", "pdfinfo")
}

fn default_pdftoppm() -> PathBuf {
    tool_from_env("DOCKET_PDFTOPPM_BIN", "pdftoppm")
}

fn default_zbarimg() -> PathBuf {
    tool_from_env("DOCKET_ZBARIMG_BIN", "zbarimg")
}

fn default_ledger_path() -> PathBuf {
    docket_logging::docket_home().join("file_hashes.json")
}

fn default_log_path() -> PathBuf {
    docket_logging::docket_home().join("file_changes.log")
}

fn default_ignored_extensions() -> Vec<String> {
    vec![".tmp".to_string()]
}

fn default_accepted_extensions() -> Vec<String> {
    vec!["pdf".to_string()]
}

fn default_dpi() -> u32 {
    200
}

fn default_workers() -> usize {
    1
}

impl Default for DocketConfig {
    fn default() -> Self {
        Self {
            ledger_path: default_ledger_path(),
            log_path: default_log_path(),
            organize_root: None,
            ignored_extensions: default_ignored_extensions(),
            accepted_extensions: default_accepted_extensions(),
            dpi: default_dpi(),
            workers: default_workers(),
            stabilizer: RetryPolicy::stabilizer(),
            open_retry: RetryPolicy::open(),
            tools: ToolPaths::default(),
        }
    }
}

impl DocketConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DocketConfig =
            toml::from_str(&content).map_err(|e| DocketError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) if path.exists() => Self::load(path),
            Some(path) => Err(DocketError::Config(format!(
                "config file not found: {}",
                path.display()
            ))),
            None => {
                let implicit = docket_logging::docket_home().join("docket.toml");
                if implicit.exists() {
                    Self::load(&implicit)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| DocketError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(DocketError::Config("workers must be at least 1".to_string()));
        }
        if self.stabilizer.attempts == 0 || self.open_retry.attempts == 0 {
            return Err(DocketError::Config(
                "retry attempts must be at least 1".to_string(),
            ));
        }
        if self.dpi == 0 {
            return Err(DocketError::Config("dpi must be positive".to_string()));
        }
        Ok(())
    }

    /// True if the path ends in one of the ignored suffixes.
    pub fn is_ignored(&self, path: &Path) -> bool {
        let text = path.to_string_lossy();
        self.ignored_extensions
            .iter()
            .any(|suffix| !suffix.is_empty() && text.ends_with(suffix.as_str()))
    }

    /// True if the path carries an accepted document extension.
    pub fn is_document(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        self.accepted_extensions
            .iter()
            .any(|accepted| accepted.trim_start_matches('.').eq_ignore_ascii_case(ext))
    }
}
