//! X11 backend over `xdotool` and ImageMagick `import`.

use std::time::Duration;

use image::RgbaImage;

use super::{
    load_capture, pick_window, run_tool, scratch_png, Desktop, Key, TargetWindow, WindowCandidate,
    WindowQuery,
};
use crate::error::DesktopError;

const XDOTOOL_TIMEOUT: Duration = Duration::from_secs(3);
const CAPTURE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Default)]
pub struct X11Desktop;

impl X11Desktop {
    pub fn new() -> Self {
        Self
    }

    /// Window ids from `xdotool search`. A search with no hits exits 1, which is not an error here.
    fn search(&self, flag: &str, needle: &str) -> Result<Vec<String>, DesktopError> {
        let args = vec![
            "search".to_string(),
            "--onlyvisible".to_string(),
            flag.to_string(),
            regex::escape(needle),
        ];
        match run_tool("xdotool", &args, XDOTOOL_TIMEOUT, 1) {
            Ok(out) => Ok(out
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(ToString::to_string)
                .collect()),
            Err(DesktopError::Failed { code: 1, .. }) => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }

    fn describe(
        &self,
        id: &str,
        index: usize,
        process: Option<&str>,
    ) -> Result<Option<WindowCandidate>, DesktopError> {
        let title = run_tool(
            "xdotool",
            &["getwindowname".to_string(), id.to_string()],
            XDOTOOL_TIMEOUT,
            1,
        )?;
        let geometry = run_tool(
            "xdotool",
            &[
                "getwindowgeometry".to_string(),
                "--shell".to_string(),
                id.to_string(),
            ],
            XDOTOOL_TIMEOUT,
            1,
        )?;
        let Some((x, y, w, h)) = parse_shell_geometry(&geometry) else {
            return Ok(None);
        };
        Ok(Some(WindowCandidate {
            id: id.to_string(),
            index,
            process: process.map(ToString::to_string),
            x,
            y,
            w,
            h,
            title: Some(title).filter(|t| !t.trim().is_empty()),
        }))
    }
}

impl Desktop for X11Desktop {
    fn name(&self) -> &'static str {
        "x11"
    }

    fn find_window(&mut self, query: &WindowQuery) -> Result<Option<TargetWindow>, DesktopError> {
        let mut ids: Vec<(String, Option<&str>)> = Vec::new();
        if let Some(hint) = query.process_hint.as_deref().filter(|h| !h.trim().is_empty()) {
            for id in self.search("--class", hint)? {
                ids.push((id, Some(hint)));
            }
        }
        if !query.title_pattern.trim().is_empty() {
            for id in self.search("--name", query.title_pattern.trim())? {
                if !ids.iter().any(|(seen, _)| *seen == id) {
                    ids.push((id, None));
                }
            }
        }

        let mut candidates = Vec::with_capacity(ids.len());
        for (index, (id, process)) in ids.iter().enumerate() {
            match self.describe(id, index + 1, *process) {
                Ok(Some(candidate)) => candidates.push(candidate),
                Ok(None) => {}
                Err(err) => tracing::debug!(window = %id, error = %err, "skipping window"),
            }
        }
        Ok(pick_window(candidates, query))
    }

    fn capture(&mut self, window: &TargetWindow) -> Result<RgbaImage, DesktopError> {
        let out = scratch_png("capture");
        run_tool(
            "import",
            &[
                "-silent".to_string(),
                "-window".to_string(),
                window.id.clone(),
                out.display().to_string(),
            ],
            CAPTURE_TIMEOUT,
            1,
        )?;
        load_capture(&out)
    }

    fn activate(&mut self, window: &TargetWindow) -> Result<(), DesktopError> {
        run_tool(
            "xdotool",
            &[
                "windowactivate".to_string(),
                "--sync".to_string(),
                window.id.clone(),
            ],
            XDOTOOL_TIMEOUT,
            2,
        )
        .map(|_| ())
    }

    fn press_key(&mut self, key: Key) -> Result<(), DesktopError> {
        let name = match key {
            Key::Down => "Down",
            Key::Enter => "Return",
        };
        run_tool(
            "xdotool",
            &["key".to_string(), name.to_string()],
            XDOTOOL_TIMEOUT,
            1,
        )
        .map(|_| ())
    }

    fn click(&mut self, x: i64, y: i64) -> Result<(), DesktopError> {
        run_tool(
            "xdotool",
            &[
                "mousemove".to_string(),
                x.to_string(),
                y.to_string(),
                "click".to_string(),
                "1".to_string(),
            ],
            XDOTOOL_TIMEOUT,
            1,
        )
        .map(|_| ())
    }

    fn type_text(&mut self, text: &str, per_char: Duration) -> Result<(), DesktopError> {
        let budget = per_char * (text.chars().count() as u32) + XDOTOOL_TIMEOUT;
        run_tool(
            "xdotool",
            &[
                "type".to_string(),
                "--delay".to_string(),
                per_char.as_millis().to_string(),
                "--".to_string(),
                text.to_string(),
            ],
            budget,
            1,
        )
        .map(|_| ())
    }
}

/// Parses `xdotool getwindowgeometry --shell` output into `(x, y, w, h)`.
fn parse_shell_geometry(raw: &str) -> Option<(i64, i64, i64, i64)> {
    let mut x = None;
    let mut y = None;
    let mut w = None;
    let mut h = None;
    for line in raw.lines() {
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        let value = value.trim().parse::<i64>().ok();
        match key.trim() {
            "X" => x = value,
            "Y" => y = value,
            "WIDTH" => w = value,
            "HEIGHT" => h = value,
            _ => {}
        }
    }
    match (x, y, w, h) {
        (Some(x), Some(y), Some(w), Some(h)) if w > 0 && h > 0 => Some((x, y, w, h)),
        _ => None,
    }
}
