//! Desktop access: window lookup, capture and input injection.
//!
//! Every backend drives external tools (`osascript`, `xdotool`, ...) through
//! [`run_tool`], so a missing tool or a hung call turns into a
//! [`DesktopError`] instead of stalling the monitor.

pub mod macos;
pub mod x11;

use std::cmp::Reverse;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use image::RgbaImage;
use rand::Rng;
use serde::Serialize;

use crate::error::DesktopError;
use crate::process::wait_with_output;

pub use macos::MacDesktop;
pub use x11::X11Desktop;

const MIN_USABLE_WINDOW_WIDTH: i64 = 220;
const MIN_USABLE_WINDOW_HEIGHT: i64 = 140;
const MIN_USABLE_WINDOW_AREA: i64 = 40_000;
const PLAUSIBLE_ORIGIN: std::ops::RangeInclusive<i64> = -5_000..=50_000;

/// A located window. Coordinates are screen points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetWindow {
    /// Backend-specific handle (X11 window id, or the window index within its process).
    pub id: String,
    pub process: Option<String>,
    pub title: String,
    pub x: i64,
    pub y: i64,
    pub w: i64,
    pub h: i64,
}

impl TargetWindow {
    /// Point used to focus the agent's input line: horizontal centre, 100pt above the bottom.
    pub fn input_point(&self) -> (i64, i64) {
        let x = self.x + self.w / 2;
        let y = self.y + (self.h - 100).max(self.h / 2);
        (x, y)
    }
}

#[derive(Debug, Clone, Default)]
pub struct WindowQuery {
    pub title_pattern: String,
    pub process_hint: Option<String>,
}

impl WindowQuery {
    fn title_matches(&self, title: &str) -> bool {
        let pattern = self.title_pattern.trim().to_lowercase();
        !pattern.is_empty() && title.to_lowercase().contains(&pattern)
    }

    fn process_matches(&self, process: Option<&str>) -> bool {
        match (self.process_hint.as_deref(), process) {
            (Some(hint), Some(process)) if !hint.trim().is_empty() => process
                .to_lowercase()
                .contains(&hint.trim().to_lowercase()),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Down,
    Enter,
}

pub trait Desktop {
    fn name(&self) -> &'static str;

    /// Finds the window matching `query`. `Ok(None)` means nothing matched.
    fn find_window(&mut self, query: &WindowQuery) -> Result<Option<TargetWindow>, DesktopError>;

    fn capture(&mut self, window: &TargetWindow) -> Result<RgbaImage, DesktopError>;

    /// Restores (if minimised) and focuses the window.
    fn activate(&mut self, window: &TargetWindow) -> Result<(), DesktopError>;

    fn press_key(&mut self, key: Key) -> Result<(), DesktopError>;

    fn click(&mut self, x: i64, y: i64) -> Result<(), DesktopError>;

    /// Types `text` into the focused window, pausing `per_char` between characters.
    fn type_text(&mut self, text: &str, per_char: Duration) -> Result<(), DesktopError>;
}

/// Picks the backend for the current host.
pub fn create_desktop() -> Result<Box<dyn Desktop>, DesktopError> {
    if cfg!(target_os = "macos") {
        return Ok(Box::new(MacDesktop::new()));
    }
    if cfg!(all(unix, not(target_os = "macos"))) {
        return Ok(Box::new(X11Desktop::new()));
    }
    Err(DesktopError::Unsupported("desktop automation"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WindowCandidate {
    pub id: String,
    pub index: usize,
    pub process: Option<String>,
    pub x: i64,
    pub y: i64,
    pub w: i64,
    pub h: i64,
    pub title: Option<String>,
}

impl WindowCandidate {
    fn area(&self) -> i64 {
        self.w.saturating_mul(self.h)
    }

    /// Large enough to capture and placed somewhere on a screen.
    fn is_usable(&self) -> bool {
        self.w >= MIN_USABLE_WINDOW_WIDTH
            && self.h >= MIN_USABLE_WINDOW_HEIGHT
            && self.area() >= MIN_USABLE_WINDOW_AREA
            && PLAUSIBLE_ORIGIN.contains(&self.x)
            && PLAUSIBLE_ORIGIN.contains(&self.y)
    }

    /// Higher ranks win: usable first, then area, width, height, then the earlier listing.
    fn rank(&self) -> (bool, i64, i64, i64, Reverse<usize>) {
        (self.is_usable(), self.area(), self.w, self.h, Reverse(self.index))
    }

    fn into_target(self) -> TargetWindow {
        TargetWindow {
            id: self.id,
            process: self.process,
            title: self.title.unwrap_or_default(),
            x: self.x,
            y: self.y,
            w: self.w,
            h: self.h,
        }
    }
}

/// Chooses the window for `query`: process-hint matches first, then title matches.
pub(crate) fn pick_window(
    candidates: Vec<WindowCandidate>,
    query: &WindowQuery,
) -> Option<TargetWindow> {
    let (by_process, rest): (Vec<_>, Vec<_>) = candidates
        .into_iter()
        .filter(|c| c.title.as_deref().is_some_and(|t| !t.trim().is_empty()))
        .partition(|c| query.process_matches(c.process.as_deref()));

    let pool: Vec<WindowCandidate> = if by_process.is_empty() {
        rest.into_iter()
            .filter(|c| query.title_matches(c.title.as_deref().unwrap_or_default()))
            .collect()
    } else {
        by_process
    };

    let candidates = pool.len();
    let usable = pool.iter().filter(|c| c.is_usable()).count();
    let selected = pool.into_iter().max_by_key(WindowCandidate::rank)?;
    tracing::debug!(
        candidates,
        usable,
        index = selected.index,
        title = ?selected.title,
        "selected window"
    );
    Some(selected.into_target())
}

/// Runs `program` with `args` and returns trimmed stdout.
///
/// Tries up to `attempts` times with linear backoff; each attempt is killed after `timeout`.
pub(crate) fn run_tool(
    program: &str,
    args: &[String],
    timeout: Duration,
    attempts: u32,
) -> Result<String, DesktopError> {
    let max_attempts = attempts.max(1);
    let mut last_error = DesktopError::Failed {
        tool: program.to_string(),
        code: -1,
        stderr: "not started".to_string(),
    };

    for attempt in 1..=max_attempts {
        match run_tool_once(program, args, timeout) {
            Ok(stdout) => return Ok(stdout),
            Err(err @ DesktopError::ToolMissing { .. }) => return Err(err),
            Err(err) => {
                tracing::debug!(tool = program, attempt, max_attempts, error = %err, "tool call failed");
                last_error = err;
            }
        }
        if attempt < max_attempts {
            let backoff = 120u64.saturating_mul(u64::from(attempt));
            thread::sleep(Duration::from_millis(backoff));
        }
    }

    Err(last_error)
}

fn run_tool_once(program: &str, args: &[String], timeout: Duration) -> Result<String, DesktopError> {
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                DesktopError::ToolMissing {
                    tool: program.to_string(),
                }
            } else {
                DesktopError::Io {
                    tool: program.to_string(),
                    source,
                }
            }
        })?;

    let finished = match wait_with_output(child, timeout) {
        Ok(Some(finished)) => finished,
        Ok(None) => {
            return Err(DesktopError::Timeout {
                tool: program.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        Err(source) => {
            return Err(DesktopError::Io {
                tool: program.to_string(),
                source,
            });
        }
    };

    if !finished.status.success() {
        return Err(DesktopError::Failed {
            tool: program.to_string(),
            code: finished.status.code().unwrap_or(1),
            stderr: finished.stderr.trim().to_string(),
        });
    }
    Ok(finished.stdout.trim().to_string())
}

pub(crate) fn command_exists(name: &str) -> bool {
    Command::new("sh")
        .arg("-c")
        .arg(format!("command -v {name} >/dev/null 2>&1"))
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Unique scratch path for a capture or OCR input.
pub(crate) fn scratch_png(label: &str) -> PathBuf {
    env::temp_dir().join(format!(
        "idle-nudge-{label}-{}-{}-{}.png",
        Utc::now().format("%Y%m%d-%H%M%S"),
        std::process::id(),
        rand::thread_rng().gen_range(1000..9999)
    ))
}

/// Decodes a capture written by an external tool and removes the file.
pub(crate) fn load_capture(path: &PathBuf) -> Result<RgbaImage, DesktopError> {
    let decoded = image::open(path);
    let _ = fs::remove_file(path);
    Ok(decoded?.to_rgba8())
}
