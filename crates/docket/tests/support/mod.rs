//! Shared fixtures for the integration tests.
//!
//! Documents are plain text files: each line is one page, and a page whose
//! text is `BARCODE:<value>` decodes to `<value>`. A page reading `FAIL`
//! makes the decoder error. An empty file has no pages.

#![allow(dead_code)]

use docket::error::{CapabilityError, OpenError};
use docket::{
    Barcode, BarcodeDecoder, DocketConfig, HashLedger, PageImage, PageRenderer, Pipeline,
    RetryPolicy,
};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const EMPTY_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Renders pages straight from the lines of the file.
#[derive(Debug, Default)]
pub struct ScriptedRenderer;

impl ScriptedRenderer {
    fn pages(path: &Path) -> io::Result<Vec<String>> {
        let content = fs::read_to_string(path)?;
        Ok(content.lines().map(str::to_string).collect())
    }
}

impl PageRenderer for ScriptedRenderer {
    fn page_count(&self, path: &Path) -> Result<usize, OpenError> {
        match Self::pages(path) {
            Ok(pages) => Ok(pages.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(OpenError::NotFound(path.to_path_buf()))
            }
            Err(e) => Err(OpenError::Other(e.to_string())),
        }
    }

    fn render(&self, path: &Path, page: usize, dpi: u32) -> Result<PageImage, CapabilityError> {
        let pages = Self::pages(path)?;
        let text = pages
            .get(page)
            .ok_or_else(|| CapabilityError::Other(format!("no page {page}")))?;
        Ok(PageImage {
            page,
            dpi,
            bytes: text.as_bytes().to_vec(),
        })
    }
}

/// Reports the document as still being written for the first `failures`
/// page-count calls.
pub struct FlakyRenderer {
    remaining: Mutex<u32>,
}

impl FlakyRenderer {
    pub fn new(failures: u32) -> Self {
        Self {
            remaining: Mutex::new(failures),
        }
    }
}

impl PageRenderer for FlakyRenderer {
    fn page_count(&self, path: &Path) -> Result<usize, OpenError> {
        let mut remaining = self.remaining.lock().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
            return Err(OpenError::FileData("truncated document".to_string()));
        }
        ScriptedRenderer.page_count(path)
    }

    fn render(&self, path: &Path, page: usize, dpi: u32) -> Result<PageImage, CapabilityError> {
        ScriptedRenderer.render(path, page, dpi)
    }
}

#[derive(Debug, Default)]
pub struct ScriptedDecoder;

impl BarcodeDecoder for ScriptedDecoder {
    fn decode(&self, image: &PageImage) -> Result<Vec<Barcode>, CapabilityError> {
        let text = String::from_utf8_lossy(&image.bytes);
        if text == "FAIL" {
            return Err(CapabilityError::Other("unreadable page".to_string()));
        }
        Ok(text
            .strip_prefix("BARCODE:")
            .map(|value| vec![Barcode::new(value)])
            .unwrap_or_default())
    }
}

pub struct TestEnv {
    pub temp: TempDir,
    /// Watched folder; also the organize root.
    pub inbox: PathBuf,
    pub config: DocketConfig,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let inbox = temp.path().join("inbox");
        fs::create_dir_all(&inbox).unwrap();

        let config = DocketConfig {
            ledger_path: temp.path().join("state").join("file_hashes.json"),
            log_path: temp.path().join("state").join("file_changes.log"),
            stabilizer: RetryPolicy {
                attempts: 3,
                delay_ms: 10,
            },
            open_retry: RetryPolicy {
                attempts: 2,
                delay_ms: 10,
            },
            ..DocketConfig::default()
        };

        Self {
            temp,
            inbox,
            config,
        }
    }

    pub fn pipeline(&self) -> Pipeline {
        self.pipeline_with(Arc::new(ScriptedRenderer))
    }

    pub fn pipeline_with(&self, renderer: Arc<dyn PageRenderer>) -> Pipeline {
        Pipeline::new(&self.config, &self.inbox, renderer, Arc::new(ScriptedDecoder)).unwrap()
    }

    /// Write a document into the inbox, one line per page.
    pub fn write_doc(&self, name: &str, pages: &[&str]) -> PathBuf {
        let path = self.inbox.join(name);
        fs::write(&path, pages.join("\n")).unwrap();
        path
    }

    /// Same as `write_doc`, outside the watched tree.
    pub fn stage_doc(&self, name: &str, pages: &[&str]) -> PathBuf {
        let dir = self.temp.path().join("staging");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, pages.join("\n")).unwrap();
        path
    }

    pub fn organized(&self, form_id: &str, year_month: &str, name: &str) -> PathBuf {
        self.inbox.join(form_id).join(year_month).join(name)
    }

    /// The ledger as persisted on disk.
    pub fn ledger(&self) -> HashLedger {
        HashLedger::load(&self.config.ledger_path).unwrap()
    }

    pub fn messages(&self) -> Vec<String> {
        let content = fs::read_to_string(&self.config.log_path).unwrap_or_default();
        content
            .lines()
            .map(|line| match line.find("] ") {
                Some(idx) => line[idx + 2..].to_string(),
                None => line.to_string(),
            })
            .collect()
    }

    pub fn logged(&self, needle: &str) -> bool {
        self.messages().iter().any(|m| m.contains(needle))
    }

    /// Contents of every file under the inbox, sorted.
    pub fn inbox_contents(&self) -> Vec<String> {
        fn walk(dir: &Path, out: &mut Vec<String>) {
            for entry in fs::read_dir(dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    walk(&path, out);
                } else {
                    out.push(fs::read_to_string(&path).unwrap());
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.inbox, &mut out);
        out.sort();
        out
    }
}
