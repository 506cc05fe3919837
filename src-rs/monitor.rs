//! The monitor loop: one cycle per interval, at most one action per cycle.
//!
//! Each cycle locates the window, captures it and feeds the frame to the
//! idle detector. Only once the window has been static for the full
//! history does the monitor look at the screen text. Blocking prompts
//! (permission menus, questions) are cleared first and ignore the cooldown.
//! A continuation prompt is sent only when the cooldown since the last send
//! has run out.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::actions::{self, ActionKind, ActionTiming};
use crate::artifacts::ScreenshotArchive;
use crate::detect::{PromptDetector, PromptKind, PromptScan};
use crate::error::DesktopError;
use crate::idle::{IdleDetector, IdleSignal};
use crate::ocr::{TesseractOcr, TextRecognizer};
use crate::platform::{Desktop, WindowQuery};
use crate::settings::{FailurePolicy, Settings};
use crate::verify::{load_verifier, resolve_prompt, run_verification, Verifier};

const SHUTDOWN_POLL: Duration = Duration::from_millis(250);

/// What an idle cycle should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Answer,
    CoolingDown { remaining: Duration },
    Prompt,
}

/// Priority: permission, then question, then cooldown, then prompt.
///
/// `since_last_send` is `None` when nothing has been sent yet this run.
pub fn decide(
    permission: bool,
    question: bool,
    since_last_send: Option<Duration>,
    cooldown: Duration,
) -> Decision {
    if permission {
        return Decision::Approve;
    }
    if question {
        return Decision::Answer;
    }
    match since_last_send {
        Some(elapsed) if elapsed < cooldown => Decision::CoolingDown {
            remaining: cooldown - elapsed,
        },
        _ => Decision::Prompt,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CycleState {
    WindowMissing,
    CaptureFailed { reason: String },
    Collecting { count: usize, required: usize },
    Active,
    IdleCoolingDown { remaining_secs: u64 },
    IdlePermission { keyword: String },
    IdleQuestion { cue: String },
    IdleReadyToPrompt { status: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionOutcome {
    pub kind: ActionKind,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    #[serde(flatten)]
    pub state: CycleState,
    pub window: Option<String>,
    pub action: Option<ActionOutcome>,
}

impl CycleReport {
    fn new(state: CycleState) -> Self {
        Self {
            state,
            window: None,
            action: None,
        }
    }
}

/// Successful actions taken during the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ActionCounts {
    pub approvals: u64,
    pub answers: u64,
    pub prompts: u64,
}

impl ActionCounts {
    pub fn total(&self) -> u64 {
        self.approvals + self.answers + self.prompts
    }

    fn record(&mut self, kind: ActionKind) {
        match kind {
            ActionKind::Approve => self.approvals += 1,
            ActionKind::Answer => self.answers += 1,
            ActionKind::Send => self.prompts += 1,
        }
    }
}

pub struct Monitor {
    query: WindowQuery,
    detector: IdleDetector,
    prompt_detector: PromptDetector,
    prompts: BTreeMap<String, String>,
    cooldown: Duration,
    failure_policy: FailurePolicy,
    timing: ActionTiming,
    ocr: Option<Box<dyn TextRecognizer>>,
    verifier: Option<Box<dyn Verifier>>,
    archive: Option<ScreenshotArchive>,
    last_send: Option<Instant>,
    counts: ActionCounts,
}

impl Monitor {
    /// A monitor with no OCR, no verifier and no screenshot archive.
    pub fn new(settings: &Settings) -> Self {
        Self {
            query: WindowQuery {
                title_pattern: settings.window_pattern.clone(),
                process_hint: settings.process_name.clone(),
            },
            detector: IdleDetector::new(
                settings.screenshots_to_compare,
                settings.screenshot_threshold,
            ),
            prompt_detector: PromptDetector::from_settings(settings),
            prompts: settings.prompts.clone(),
            cooldown: settings.cooldown(),
            failure_policy: settings.on_action_failure,
            timing: ActionTiming::default(),
            ocr: None,
            verifier: None,
            archive: None,
            last_send: None,
            counts: ActionCounts::default(),
        }
    }

    /// A monitor wired to tesseract, the configured verifier and the screenshot directory.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let mut monitor = Self::new(settings);
        monitor.verifier = load_verifier(settings);
        match TesseractOcr::detect() {
            Some(ocr) => monitor.ocr = Some(Box::new(ocr)),
            None => warn!("tesseract not found; permission and question detection disabled"),
        }
        if settings.save_screenshots {
            monitor.archive = Some(ScreenshotArchive::create(&settings.screenshot_dir)?);
        }
        Ok(monitor)
    }

    pub fn with_ocr(mut self, ocr: Box<dyn TextRecognizer>) -> Self {
        self.ocr = Some(ocr);
        self
    }

    pub fn with_verifier(mut self, verifier: Box<dyn Verifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn with_timing(mut self, timing: ActionTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn counts(&self) -> ActionCounts {
        self.counts
    }

    pub fn has_verifier(&self) -> bool {
        self.verifier.is_some()
    }

    #[cfg(test)]
    pub fn history_len(&self) -> usize {
        self.detector.len()
    }

    pub fn run_cycle(&mut self, desktop: &mut dyn Desktop, now: Instant) -> CycleReport {
        let window = match desktop.find_window(&self.query) {
            Ok(Some(window)) => window,
            Ok(None) => {
                warn!(pattern = %self.query.title_pattern, "window not found");
                return CycleReport::new(CycleState::WindowMissing);
            }
            Err(err) => {
                warn!(pattern = %self.query.title_pattern, error = %err, "window lookup failed");
                return CycleReport::new(CycleState::WindowMissing);
            }
        };
        info!(title = %window.title, process = ?window.process, "found window");

        let mut report = CycleReport::new(CycleState::Active);
        report.window = Some(window.title.clone());

        let frame = match desktop.capture(&window) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "screenshot capture failed");
                report.state = CycleState::CaptureFailed {
                    reason: err.to_string(),
                };
                return report;
            }
        };

        if let Some(archive) = &self.archive {
            if let Err(err) = archive.save(&frame) {
                warn!(error = %format!("{err:#}"), "failed to archive screenshot");
            }
        }

        match self.detector.observe(frame) {
            IdleSignal::Collecting { count, required } => {
                info!("collecting screenshots ({count}/{required})");
                report.state = CycleState::Collecting { count, required };
                return report;
            }
            IdleSignal::Active => {
                info!("agent is active (screenshots changed)");
                return report;
            }
            IdleSignal::Idle => {
                info!(
                    samples = self.detector.required(),
                    "agent appears idle (screenshots unchanged)"
                );
            }
        }

        let prompt = self.scan_screen(desktop.name()).primary();
        let since_last_send = self.last_send.map(|at| now.saturating_duration_since(at));
        let decision = decide(
            matches!(prompt, Some(PromptKind::Permission { .. })),
            matches!(prompt, Some(PromptKind::Question { .. })),
            since_last_send,
            self.cooldown,
        );

        match decision {
            Decision::Approve => {
                let keyword = match prompt {
                    Some(PromptKind::Permission { keyword }) => keyword,
                    _ => String::new(),
                };
                info!(%keyword, "permission prompt detected; approving");
                let result = actions::approve_permission(desktop, &window, &self.timing);
                report.action = Some(self.settle_action(ActionKind::Approve, result, now));
                report.state = CycleState::IdlePermission { keyword };
            }
            Decision::Answer => {
                let (cue, option) = match prompt {
                    Some(PromptKind::Question { cue, option }) => (cue, option),
                    _ => (String::new(), String::new()),
                };
                info!(%cue, %option, "question prompt detected; answering with the top option");
                let result = actions::answer_question(desktop, &window, &self.timing);
                report.action = Some(self.settle_action(ActionKind::Answer, result, now));
                report.state = CycleState::IdleQuestion { cue };
            }
            Decision::CoolingDown { remaining } => {
                let secs = remaining.as_secs();
                info!("cooldown active: {}m {}s remaining", secs / 60, secs % 60);
                report.state = CycleState::IdleCoolingDown {
                    remaining_secs: secs,
                };
            }
            Decision::Prompt => {
                let verification = run_verification(self.verifier.as_deref_mut());
                let message = resolve_prompt(&self.prompts, &verification);
                info!(
                    status = %verification.status,
                    detail = %verification.message,
                    %message,
                    "sending prompt"
                );
                let started = Instant::now();
                let result = actions::send_prompt(desktop, &window, &message, &self.timing);
                // The cooldown runs from the moment the prompt was submitted.
                let sent_at = now + started.elapsed();
                report.action = Some(self.settle_action(ActionKind::Send, result, sent_at));
                report.state = CycleState::IdleReadyToPrompt {
                    status: verification.status,
                    message,
                };
            }
        }
        debug!(history = self.detector.len(), "cycle finished");
        report
    }

    /// Runs cycles every `interval` until `shutdown` is raised. Returns the run's counters.
    pub fn run(
        &mut self,
        desktop: &mut dyn Desktop,
        interval: Duration,
        shutdown: &AtomicBool,
    ) -> ActionCounts {
        while !shutdown.load(Ordering::SeqCst) {
            self.run_cycle(desktop, Instant::now());
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            info!("waiting {}s until next check", interval.as_secs());
            sleep_unless_shutdown(interval, shutdown);
        }
        self.counts
    }

    fn scan_screen(&mut self, backend: &str) -> PromptScan {
        let (Some(ocr), Some(frame)) = (self.ocr.as_mut(), self.detector.latest()) else {
            return PromptScan::default();
        };
        match ocr.recognize(frame) {
            Ok(text) => self.prompt_detector.scan(&text),
            Err(err) => {
                warn!(backend, error = %err, "OCR failed; skipping prompt detection");
                PromptScan::default()
            }
        }
    }

    fn settle_action(
        &mut self,
        kind: ActionKind,
        result: Result<(), DesktopError>,
        at: Instant,
    ) -> ActionOutcome {
        match result {
            Ok(()) => {
                self.detector.reset();
                if kind == ActionKind::Send {
                    self.last_send = Some(at);
                }
                self.counts.record(kind);
                info!(action = ?kind, total = self.counts.total(), "action completed");
                ActionOutcome {
                    kind,
                    ok: true,
                    error: None,
                }
            }
            Err(err) => {
                warn!(action = ?kind, error = %err, policy = ?self.failure_policy, "action failed");
                if self.failure_policy == FailurePolicy::Reset {
                    self.detector.reset();
                    if kind == ActionKind::Send {
                        self.last_send = Some(at);
                    }
                }
                ActionOutcome {
                    kind,
                    ok: false,
                    error: Some(err.to_string()),
                }
            }
        }
    }
}

fn sleep_unless_shutdown(total: Duration, shutdown: &AtomicBool) {
    let Some(deadline) = Instant::now().checked_add(total) else {
        while !shutdown.load(Ordering::SeqCst) {
            thread::sleep(SHUTDOWN_POLL);
        }
        return;
    };
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::sleep((deadline - now).min(SHUTDOWN_POLL));
    }
}
