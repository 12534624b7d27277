//! Token extraction: scan pages in order until a barcode decodes.

use crate::capability::{BarcodeDecoder, PageRenderer};
use crate::config::RetryPolicy;
use crate::error::{CapabilityError, ExtractError, OpenError};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Identifying token decoded from a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub value: String,
    /// Zero-based page the token was found on.
    pub page: usize,
}

/// A page that failed to render or decode and was skipped.
#[derive(Debug)]
pub struct PageError {
    pub page: usize,
    pub error: CapabilityError,
}

/// Outcome of scanning a document: the token (if any) and every page that
/// had to be skipped along the way.
#[derive(Debug, Default)]
pub struct Extraction {
    pub token: Option<Token>,
    pub page_errors: Vec<PageError>,
    pub pages_scanned: usize,
}

pub struct TokenExtractor {
    renderer: Arc<dyn PageRenderer>,
    decoder: Arc<dyn BarcodeDecoder>,
    dpi: u32,
    open_attempts: u32,
    open_delay: Duration,
}

impl TokenExtractor {
    pub fn new(
        renderer: Arc<dyn PageRenderer>,
        decoder: Arc<dyn BarcodeDecoder>,
        dpi: u32,
        open_retry: RetryPolicy,
    ) -> Self {
        Self {
            renderer,
            decoder,
            dpi,
            open_attempts: open_retry.attempts.max(1),
            open_delay: open_retry.delay(),
        }
    }

    /// First token in page order, or `None` once every page is exhausted.
    pub fn extract(&self, path: &Path) -> Result<Option<Token>, ExtractError> {
        Ok(self.scan(path)?.token)
    }

    /// Like [`extract`](Self::extract), also reporting skipped pages.
    pub fn scan(&self, path: &Path) -> Result<Extraction, ExtractError> {
        let pages = self.open_with_retry(path)?;
        let mut extraction = Extraction::default();

        for page in 0..pages {
            extraction.pages_scanned += 1;
            match self.scan_page(path, page) {
                Ok(Some(value)) => {
                    info!(path = %path.display(), page, token = %value, "Found barcode");
                    extraction.token = Some(Token { value, page });
                    return Ok(extraction);
                }
                Ok(None) => {
                    debug!(path = %path.display(), page, "No barcode on page");
                }
                Err(error) => {
                    warn!(path = %path.display(), page, error = %error, "Skipping page");
                    extraction.page_errors.push(PageError { page, error });
                }
            }
        }

        Ok(extraction)
    }

    fn scan_page(&self, path: &Path, page: usize) -> Result<Option<String>, CapabilityError> {
        let image = self.renderer.render(path, page, self.dpi)?;
        let barcodes = self.decoder.decode(&image)?;
        for barcode in barcodes {
            match String::from_utf8(barcode.payload) {
                Ok(value) if !value.is_empty() => return Ok(Some(value)),
                Ok(_) => continue,
                Err(e) => {
                    warn!(path = %path.display(), page, error = %e, "Ignoring non UTF-8 barcode");
                }
            }
        }
        Ok(None)
    }

    /// Page count, retrying transient file data errors with a fixed delay.
    fn open_with_retry(&self, path: &Path) -> Result<usize, ExtractError> {
        let mut attempt = 1;
        loop {
            match self.renderer.page_count(path) {
                Ok(pages) => return Ok(pages),
                Err(OpenError::FileData(reason)) if attempt < self.open_attempts => {
                    warn!(
                        path = %path.display(),
                        attempt,
                        max_attempts = self.open_attempts,
                        reason = %reason,
                        "Document not readable yet, retrying"
                    );
                    attempt += 1;
                    thread::sleep(self.open_delay);
                }
                Err(last @ OpenError::FileData(_)) => {
                    return Err(ExtractError::OpenExhausted {
                        path: path.to_path_buf(),
                        attempts: attempt,
                        last,
                    });
                }
                Err(source) => {
                    return Err(ExtractError::Open {
                        path: path.to_path_buf(),
                        source,
                    });
                }
            }
        }
    }
}
