use std::fs;
use std::time::Duration;

use image::RgbaImage;

use crate::error::DesktopError;
use crate::platform::{command_exists, run_tool, scratch_png};

const TESSERACT_TIMEOUT: Duration = Duration::from_secs(20);

/// Extracts visible text from a captured frame.
pub trait TextRecognizer {
    fn recognize(&mut self, frame: &RgbaImage) -> Result<String, DesktopError>;
}

/// OCR through the `tesseract` command-line tool.
pub struct TesseractOcr;

impl TesseractOcr {
    /// Returns `None` when `tesseract` is not installed; prompt detection is then skipped.
    pub fn detect() -> Option<Self> {
        command_exists("tesseract").then_some(Self)
    }
}

impl TextRecognizer for TesseractOcr {
    fn recognize(&mut self, frame: &RgbaImage) -> Result<String, DesktopError> {
        let input = scratch_png("ocr");
        frame.save(&input)?;
        let result = run_tool(
            "tesseract",
            &[
                input.display().to_string(),
                "stdout".to_string(),
                "--psm".to_string(),
                "3".to_string(),
            ],
            TESSERACT_TIMEOUT,
            1,
        );
        let _ = fs::remove_file(&input);
        result
    }
}
