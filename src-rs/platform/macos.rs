//! macOS backend over System Events (`osascript`) and `screencapture`.

use std::time::Duration;

use image::RgbaImage;

use super::{
    command_exists, load_capture, pick_window, run_tool, scratch_png, Desktop, Key, TargetWindow,
    WindowCandidate, WindowQuery,
};
use crate::error::DesktopError;

const OSASCRIPT_TIMEOUT: Duration = Duration::from_millis(1500);
const CAPTURE_TIMEOUT: Duration = Duration::from_secs(10);

const LIST_WINDOWS_SCRIPT: &str = r#"
on cleanText(v)
  try
    set t to v as text
  on error
    set t to ""
  end try
  set AppleScript's text item delimiters to {return, linefeed, tab}
  set parts to text items of t
  set AppleScript's text item delimiters to " "
  set clean to parts as text
  set AppleScript's text item delimiters to ""
  return clean
end cleanText

on run argv
  set linesOut to {}
  tell application "System Events"
    repeat with procRef in (processes whose background only is false)
      set procName to name of procRef
      set idx to 0
      repeat with winRef in windows of procRef
        set idx to idx + 1
        try
          set p to position of winRef
          set s to size of winRef
          set wt to ""
          try
            set wt to name of winRef
          end try
          set end of linesOut to my cleanText(procName) & tab & (idx as text) & tab & ((item 1 of p) as text) & tab & ((item 2 of p) as text) & tab & ((item 1 of s) as text) & tab & ((item 2 of s) as text) & tab & my cleanText(wt)
        end try
      end repeat
    end repeat
  end tell
  set AppleScript's text item delimiters to linefeed
  set outText to linesOut as text
  set AppleScript's text item delimiters to ""
  return outText
end run
"#;

const RAISE_WINDOW_SCRIPT: &str = r#"
on run argv
  set procName to item 1 of argv
  set winIndex to (item 2 of argv) as integer
  tell application "System Events"
    tell process procName
      set visible to true
      set frontmost to true
      try
        set value of attribute "AXMinimized" of window winIndex to false
      end try
      try
        perform action "AXRaise" of window winIndex
      end try
    end tell
  end tell
  return "ok"
end run
"#;

const TYPE_TEXT_SCRIPT: &str = r#"
on run argv
  set msg to item 1 of argv
  set pause to (item 2 of argv) as real
  tell application "System Events"
    repeat with ch in characters of msg
      keystroke (ch as text)
      delay pause
    end repeat
  end tell
  return "ok"
end run
"#;

pub struct MacDesktop {
    has_cliclick: bool,
}

impl MacDesktop {
    pub fn new() -> Self {
        Self {
            has_cliclick: command_exists("cliclick"),
        }
    }
}

impl Default for MacDesktop {
    fn default() -> Self {
        Self::new()
    }
}

fn osascript(
    script: &str,
    args: &[String],
    timeout: Duration,
    attempts: u32,
) -> Result<String, DesktopError> {
    let mut argv = vec!["-e".to_string(), script.to_string()];
    if !args.is_empty() {
        argv.push("--".to_string());
        argv.extend(args.iter().cloned());
    }
    run_tool("osascript", &argv, timeout, attempts)
}

impl Desktop for MacDesktop {
    fn name(&self) -> &'static str {
        "macos"
    }

    fn find_window(&mut self, query: &WindowQuery) -> Result<Option<TargetWindow>, DesktopError> {
        let raw = osascript(LIST_WINDOWS_SCRIPT, &[], OSASCRIPT_TIMEOUT, 3)?;
        Ok(pick_window(parse_window_rows(&raw), query))
    }

    fn capture(&mut self, window: &TargetWindow) -> Result<RgbaImage, DesktopError> {
        if window.w <= 0 || window.h <= 0 {
            return Err(DesktopError::Parse {
                tool: "screencapture".to_string(),
                detail: format!("window has empty bounds {}x{}", window.w, window.h),
            });
        }
        let out = scratch_png("capture");
        let region = format!("{},{},{},{}", window.x, window.y, window.w, window.h);
        run_tool(
            "screencapture",
            &[
                "-x".to_string(),
                "-R".to_string(),
                region,
                out.display().to_string(),
            ],
            CAPTURE_TIMEOUT,
            1,
        )?;
        load_capture(&out)
    }

    fn activate(&mut self, window: &TargetWindow) -> Result<(), DesktopError> {
        let Some(process) = window.process.as_deref() else {
            return Err(DesktopError::Parse {
                tool: "osascript".to_string(),
                detail: "window has no owning process".to_string(),
            });
        };
        osascript(
            RAISE_WINDOW_SCRIPT,
            &[process.to_string(), window.id.clone()],
            OSASCRIPT_TIMEOUT,
            2,
        )
        .map(|_| ())
    }

    fn press_key(&mut self, key: Key) -> Result<(), DesktopError> {
        let code = match key {
            Key::Down => 125,
            Key::Enter => 36,
        };
        let script = format!("tell application \"System Events\" to key code {code}");
        osascript(&script, &[], OSASCRIPT_TIMEOUT, 1).map(|_| ())
    }

    fn click(&mut self, x: i64, y: i64) -> Result<(), DesktopError> {
        if self.has_cliclick {
            return run_tool("cliclick", &[format!("c:{x},{y}")], OSASCRIPT_TIMEOUT, 1).map(|_| ());
        }
        let script = format!("tell application \"System Events\" to click at {{{x}, {y}}}");
        osascript(&script, &[], OSASCRIPT_TIMEOUT, 1).map(|_| ())
    }

    fn type_text(&mut self, text: &str, per_char: Duration) -> Result<(), DesktopError> {
        let budget = per_char * (text.chars().count() as u32) + Duration::from_secs(5);
        osascript(
            TYPE_TEXT_SCRIPT,
            &[text.to_string(), format!("{:.3}", per_char.as_secs_f64())],
            budget,
            1,
        )
        .map(|_| ())
    }
}

/// Parses `process \t index \t x \t y \t w \t h \t title` rows.
fn parse_window_rows(raw: &str) -> Vec<WindowCandidate> {
    let mut items = Vec::new();
    for line in raw.lines() {
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() < 6 {
            continue;
        }
        let index = match parts[1].trim().parse::<usize>() {
            Ok(v) if v > 0 => v,
            _ => continue,
        };
        let mut dims = [0i64; 4];
        let mut valid = true;
        for (slot, field) in dims.iter_mut().zip(&parts[2..6]) {
            match field.trim().parse::<f64>() {
                Ok(v) => *slot = v.round() as i64,
                Err(_) => valid = false,
            }
        }
        let [x, y, w, h] = dims;
        if !valid || w <= 0 || h <= 0 {
            continue;
        }
        let process = Some(parts[0].trim())
            .filter(|v| !v.is_empty())
            .map(ToString::to_string);
        let title = parts
            .get(6)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(ToString::to_string);
        items.push(WindowCandidate {
            id: index.to_string(),
            index,
            process,
            x,
            y,
            w,
            h,
            title,
        });
    }
    items
}
