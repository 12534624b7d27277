//! Barcode decoding through `zbarimg`.

use crate::capability::{
    scratch_dir, scratch_file, spawn_error, tool_failed, Barcode, BarcodeDecoder, PageImage,
};
use crate::config::ToolPaths;
use crate::error::CapabilityError;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// zbarimg exit status when the image decoded cleanly but held no symbols.
const EXIT_NO_SYMBOLS: i32 = 4;

#[derive(Debug, Clone)]
pub struct ZbarDecoder {
    zbarimg: PathBuf,
}

impl ZbarDecoder {
    pub fn new(zbarimg: PathBuf) -> Self {
        Self { zbarimg }
    }

    pub fn from_tools(tools: &ToolPaths) -> Self {
        Self::new(tools.zbarimg.clone())
    }
}

impl BarcodeDecoder for ZbarDecoder {
    fn decode(&self, image: &PageImage) -> Result<Vec<Barcode>, CapabilityError> {
        let scratch = scratch_dir()?;
        let input = scratch_file(&scratch, "page.png");
        std::fs::write(&input, &image.bytes)?;

        let output = Command::new(&self.zbarimg)
            .arg("--raw")
            .arg("-q")
            .arg(&input)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| spawn_error(&self.zbarimg, "DOCKET_ZBARIMG_BIN", e))?;

        match output.status.code() {
            Some(0) => Ok(split_symbols(&output.stdout)),
            Some(EXIT_NO_SYMBOLS) => Ok(Vec::new()),
            _ => Err(tool_failed(&self.zbarimg, &output)),
        }
    }
}

/// `--raw` prints one symbol payload per line.
fn split_symbols(stdout: &[u8]) -> Vec<Barcode> {
    stdout
        .split(|b| *b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .filter(|line| !line.is_empty())
        .map(Barcode::new)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_symbols() {
        let symbols = split_symbols(b"240115FRM1JD\r\nSECOND\n\n");
        assert_eq!(
            symbols,
            vec![Barcode::new("240115FRM1JD"), Barcode::new("SECOND")]
        );
        assert!(split_symbols(b"").is_empty());
    }

    #[test]
    fn test_missing_binary_names_env_override() {
        let decoder = ZbarDecoder::new(PathBuf::from("/nonexistent/zbarimg"));
        let image = PageImage {
            page: 0,
            dpi: 200,
            bytes: vec![0x89, b'P', b'N', b'G'],
        };
        let err = decoder.decode(&image).unwrap_err();
        assert!(err.to_string().contains("DOCKET_ZBARIMG_BIN"));
    }
}
