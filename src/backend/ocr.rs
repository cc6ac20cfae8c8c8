//! Text recognition through the `tesseract` command-line tool.

use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{OcrBackend, OcrError};

static CALL_COUNTER: AtomicU64 = AtomicU64::new(0);

/// OCR backend shelling out to tesseract in single-line mode. Each call
/// round-trips through a pair of temp files that are removed afterwards.
pub struct TesseractOcr {
    language: String,
}

impl TesseractOcr {
    pub fn new() -> Self {
        Self {
            language: "eng".to_string(),
        }
    }

    pub fn with_language(language: &str) -> Self {
        Self {
            language: language.to_string(),
        }
    }

    fn temp_base() -> PathBuf {
        let call = CALL_COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("macrocast-ocr-{}-{call}", std::process::id()))
    }
}

impl Default for TesseractOcr {
    fn default() -> Self {
        Self::new()
    }
}

impl OcrBackend for TesseractOcr {
    fn recognize_line(&self, png: &[u8]) -> Result<String, OcrError> {
        let check = Command::new("which").arg("tesseract").output()?;
        if !check.status.success() {
            return Err(OcrError::NotAvailable(
                "tesseract is not installed".to_string(),
            ));
        }

        let base = Self::temp_base();
        let input = base.with_extension("png");
        std::fs::write(&input, png)?;

        // --psm 7: treat the image as a single text line.
        let output = Command::new("tesseract")
            .arg(&input)
            .arg(&base)
            .args(["-l", &self.language, "--psm", "7"])
            .output();

        let text_path = base.with_extension("txt");
        let text = std::fs::read_to_string(&text_path).unwrap_or_default();

        let _ = std::fs::remove_file(&input);
        let _ = std::fs::remove_file(&text_path);

        let output = output?;
        if !output.status.success() {
            return Err(OcrError::Failed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        Ok(text.trim().to_string())
    }
}
