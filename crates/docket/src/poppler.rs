//! Page access through the poppler command-line tools (`pdfinfo`, `pdftoppm`).

use crate::capability::{
    scratch_dir, scratch_file, spawn_error, tool_failed, PageImage, PageRenderer,
};
use crate::config::ToolPaths;
use crate::error::{CapabilityError, OpenError};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

/// Poppler exit status for "error opening a PDF file".
const EXIT_OPEN_FAILED: i32 = 1;

#[derive(Debug, Clone)]
pub struct PopplerRenderer {
    pdfinfo: PathBuf,
    pdftoppm: PathBuf,
}

impl PopplerRenderer {
    pub fn new(pdfinfo: PathBuf, pdftoppm: PathBuf) -> Self {
        Self { pdfinfo, pdftoppm }
    }

    pub fn from_tools(tools: &ToolPaths) -> Self {
        Self::new(tools.pdfinfo.clone(), tools.pdftoppm.clone())
    }
}

impl PageRenderer for PopplerRenderer {
    fn page_count(&self, path: &Path) -> Result<usize, OpenError> {
        let metadata = std::fs::metadata(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                OpenError::NotFound(path.to_path_buf())
            } else {
                OpenError::Other(e.to_string())
            }
        })?;
        if metadata.len() == 0 {
            return Ok(0);
        }

        let output = Command::new(&self.pdfinfo)
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| {
                OpenError::Other(spawn_error(&self.pdfinfo, "DOCKET_PDFINFO_BIN", e).to_string())
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(match output.status.code() {
                Some(EXIT_OPEN_FAILED) => OpenError::FileData(stderr),
                _ => OpenError::Other(format!("pdfinfo exited with {}: {}", output.status, stderr)),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_page_count(&stdout)
            .ok_or_else(|| OpenError::FileData("pdfinfo reported no page count".to_string()))
    }

    fn render(&self, path: &Path, page: usize, dpi: u32) -> Result<PageImage, CapabilityError> {
        let scratch = scratch_dir()?;
        let root = scratch_file(&scratch, "page");
        // pdftoppm pages are 1-based.
        let number = (page + 1).to_string();

        let output = Command::new(&self.pdftoppm)
            .arg("-png")
            .arg("-singlefile")
            .arg("-r")
            .arg(dpi.to_string())
            .arg("-f")
            .arg(&number)
            .arg("-l")
            .arg(&number)
            .arg(path)
            .arg(&root)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| spawn_error(&self.pdftoppm, "DOCKET_PDFTOPPM_BIN", e))?;
        if !output.status.success() {
            return Err(tool_failed(&self.pdftoppm, &output));
        }

        let png = root.with_extension("png");
        let bytes = std::fs::read(&png)?;
        debug!(path = %path.display(), page, bytes = bytes.len(), "Rendered page");
        Ok(PageImage { page, dpi, bytes })
    }
}

/// Extract the `Pages:` value from `pdfinfo` output.
fn parse_page_count(stdout: &str) -> Option<usize> {
    stdout.lines().find_map(|line| {
        let rest = line.strip_prefix("Pages:")?;
        rest.trim().parse().ok()
    })
}
