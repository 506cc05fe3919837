use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use image::RgbaImage;

/// Writes each captured frame to `dir` as `agent_<timestamp>.png`. Files are never read back.
pub struct ScreenshotArchive {
    dir: PathBuf,
}

impl ScreenshotArchive {
    pub fn create(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create screenshot dir: {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn save(&self, frame: &RgbaImage) -> Result<PathBuf> {
        let stamp = Local::now().format("%Y%m%d_%H%M%S_%3f");
        let mut path = self.dir.join(format!("agent_{stamp}.png"));
        let mut n = 1;
        while path.exists() {
            path = self.dir.join(format!("agent_{stamp}-{n}.png"));
            n += 1;
        }
        frame
            .save(&path)
            .with_context(|| format!("failed to save screenshot: {}", path.display()))?;
        Ok(path)
    }
}
