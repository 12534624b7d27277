//! Seams for the external render and decode capabilities.
//!
//! The extractor only sees these traits. Production uses the poppler and zbar
//! command-line tools (`poppler`, `zbar` modules); tests plug in fakes.

use crate::error::{CapabilityError, OpenError};
use std::path::{Path, PathBuf};

/// A rendered page, as encoded image bytes (PNG for the poppler renderer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    pub page: usize,
    pub dpi: u32,
    pub bytes: Vec<u8>,
}

/// One decoded symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Barcode {
    pub payload: Vec<u8>,
}

impl Barcode {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
        }
    }
}

/// Opens documents and renders their pages.
pub trait PageRenderer: Send + Sync {
    /// Number of pages. `OpenError::FileData` marks a document that exists
    /// but cannot be parsed yet.
    fn page_count(&self, path: &Path) -> Result<usize, OpenError>;

    fn render(&self, path: &Path, page: usize, dpi: u32) -> Result<PageImage, CapabilityError>;
}

/// Finds barcodes in a rendered page. Order of the returned symbols is
/// whatever the implementation yields.
pub trait BarcodeDecoder: Send + Sync {
    fn decode(&self, image: &PageImage) -> Result<Vec<Barcode>, CapabilityError>;
}

/// Map a spawn failure to a helpful message when the binary is missing.
pub(crate) fn spawn_error(
    tool: &Path,
    env_var: &'static str,
    err: std::io::Error,
) -> CapabilityError {
    if err.kind() == std::io::ErrorKind::NotFound {
        CapabilityError::ToolMissing {
            tool: tool.display().to_string(),
            env_var,
        }
    } else {
        CapabilityError::Io(err)
    }
}

pub(crate) fn tool_failed(tool: &Path, output: &std::process::Output) -> CapabilityError {
    CapabilityError::ToolFailed {
        tool: tool.display().to_string(),
        status: output.status.to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}

/// Staging directory for tool inputs/outputs, removed on drop.
pub(crate) fn scratch_dir() -> Result<tempfile::TempDir, CapabilityError> {
    Ok(tempfile::Builder::new().prefix("docket-").tempdir()?)
}

pub(crate) fn scratch_file(dir: &tempfile::TempDir, name: &str) -> PathBuf {
    dir.path().join(name)
}
