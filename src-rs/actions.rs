//! Input sequences that approve, answer or nudge the agent.
//!
//! The pauses between steps give the target UI time to settle; input sent
//! too early is dropped by some terminals.

use std::thread;
use std::time::Duration;

use serde::Serialize;

use crate::error::DesktopError;
use crate::platform::{Desktop, Key, TargetWindow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Approve,
    Answer,
    Send,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionTiming {
    pub after_activate: Duration,
    pub after_activate_send: Duration,
    pub between_arrows: Duration,
    pub before_confirm: Duration,
    pub after_confirm: Duration,
    pub after_click: Duration,
    pub per_char: Duration,
}

impl Default for ActionTiming {
    fn default() -> Self {
        Self {
            after_activate: Duration::from_millis(500),
            after_activate_send: Duration::from_millis(1000),
            between_arrows: Duration::from_millis(100),
            before_confirm: Duration::from_millis(300),
            after_confirm: Duration::from_millis(500),
            after_click: Duration::from_millis(500),
            per_char: Duration::from_millis(50),
        }
    }
}

impl ActionTiming {
    /// No pauses at all, for driving fakes in tests.
    pub fn instant() -> Self {
        Self {
            after_activate: Duration::ZERO,
            after_activate_send: Duration::ZERO,
            between_arrows: Duration::ZERO,
            before_confirm: Duration::ZERO,
            after_confirm: Duration::ZERO,
            after_click: Duration::ZERO,
            per_char: Duration::ZERO,
        }
    }
}

const APPROVE_ARROW_PRESSES: usize = 3;

fn settle(d: Duration) {
    if !d.is_zero() {
        thread::sleep(d);
    }
}

/// Selects the last option of a permission menu ("allow always") and confirms it.
pub fn approve_permission(
    desktop: &mut dyn Desktop,
    window: &TargetWindow,
    timing: &ActionTiming,
) -> Result<(), DesktopError> {
    desktop.activate(window)?;
    settle(timing.after_activate);

    for _ in 0..APPROVE_ARROW_PRESSES {
        desktop.press_key(Key::Down)?;
        settle(timing.between_arrows);
    }

    settle(timing.before_confirm);
    desktop.press_key(Key::Enter)?;
    settle(timing.after_confirm);
    Ok(())
}

/// Accepts the highlighted (first) option of a question.
pub fn answer_question(
    desktop: &mut dyn Desktop,
    window: &TargetWindow,
    timing: &ActionTiming,
) -> Result<(), DesktopError> {
    desktop.activate(window)?;
    settle(timing.after_activate);
    desktop.press_key(Key::Enter)?;
    settle(timing.after_confirm);
    Ok(())
}

/// Focuses the input line, types `message` and submits it.
pub fn send_prompt(
    desktop: &mut dyn Desktop,
    window: &TargetWindow,
    message: &str,
    timing: &ActionTiming,
) -> Result<(), DesktopError> {
    desktop.activate(window)?;
    settle(timing.after_activate_send);

    let (x, y) = window.input_point();
    desktop.click(x, y)?;
    settle(timing.after_click);

    desktop.type_text(message, timing.per_char)?;
    settle(timing.before_confirm);
    desktop.press_key(Key::Enter)
}
