use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const FALLBACK_PROMPT: &str = "Continue working on the task.";

const MAX_SAMPLES: usize = 100;
const MAX_COOLDOWN_MINUTES: f64 = 7.0 * 24.0 * 60.0;
const MAX_CHECK_INTERVAL_SECS: u64 = 24 * 60 * 60;

const DEFAULT_PERMISSION_KEYWORDS: &[&str] = &[
    "do you want to proceed",
    "permission",
    "allow",
    "enable full access",
    "approve",
    "grant access",
    "authorize",
    "yes",
    "no",
];

const DEFAULT_QUESTION_PATTERNS: &[&str] =
    &["which", "what", "how", "would you like", "choose", "select", "?"];

const DEFAULT_OPTION_PATTERNS: &[&str] = &["1.", "2.", "\u{2022}", "-", "option"];

/// What to do with history and cooldown after an action fails to inject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Treat the attempt as taken: clear history and, for sends, restart the cooldown.
    #[default]
    Reset,
    /// Leave history and cooldown untouched so the next idle cycle tries again.
    Retry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRule {
    pub pattern: String,
    pub status: String,
    #[serde(default)]
    pub prompt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogVerification {
    pub path: PathBuf,
    #[serde(default = "default_tail_lines")]
    pub tail_lines: usize,
    #[serde(default)]
    pub rules: Vec<LogRule>,
}

/// Effective settings for one run. Built once by [`Settings::load`] and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub window_pattern: String,
    pub process_name: Option<String>,
    pub check_interval: u64,
    pub screenshots_to_compare: usize,
    pub cooldown_minutes: f64,
    pub screenshot_threshold: f64,
    pub prompts: BTreeMap<String, String>,
    pub verification_plugin: Option<PathBuf>,
    pub verification_timeout_secs: u64,
    pub log_verification: Option<LogVerification>,
    pub screenshot_dir: PathBuf,
    pub save_screenshots: bool,
    pub permission_keywords: Vec<String>,
    pub question_patterns: Vec<String>,
    pub option_patterns: Vec<String>,
    pub on_action_failure: FailurePolicy,
}

impl Default for Settings {
    fn default() -> Self {
        let mut prompts = BTreeMap::new();
        prompts.insert("default".to_string(), FALLBACK_PROMPT.to_string());
        prompts.insert(
            "idle".to_string(),
            "You appear to be idle. Please continue with the task.".to_string(),
        );

        Self {
            window_pattern: "Agent".to_string(),
            process_name: None,
            check_interval: 90,
            screenshots_to_compare: 4,
            cooldown_minutes: 15.0,
            screenshot_threshold: 0.01,
            prompts,
            verification_plugin: None,
            verification_timeout_secs: 30,
            log_verification: None,
            screenshot_dir: PathBuf::from("screenshots"),
            save_screenshots: true,
            permission_keywords: to_strings(DEFAULT_PERMISSION_KEYWORDS),
            question_patterns: to_strings(DEFAULT_QUESTION_PATTERNS),
            option_patterns: to_strings(DEFAULT_OPTION_PATTERNS),
            on_action_failure: FailurePolicy::Reset,
        }
    }
}

/// Explicit options that win over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub window_pattern: Option<String>,
    pub check_interval: Option<u64>,
    pub screenshots_to_compare: Option<usize>,
    pub cooldown_minutes: Option<f64>,
}

impl Overrides {
    fn apply(&self, raw: &mut Map<String, Value>) {
        if let Some(v) = &self.window_pattern {
            raw.insert("window_pattern".to_string(), Value::from(v.clone()));
        }
        if let Some(v) = self.check_interval {
            raw.insert("check_interval".to_string(), Value::from(v));
        }
        if let Some(v) = self.screenshots_to_compare {
            raw.insert("screenshots_to_compare".to_string(), Value::from(v));
        }
        if let Some(v) = self.cooldown_minutes {
            raw.insert("cooldown_minutes".to_string(), Value::from(v));
        }
    }
}

impl Settings {
    /// Reads the optional JSON config, layers `overrides` on top and validates the result.
    pub fn load(path: Option<&Path>, overrides: &Overrides) -> Result<Self> {
        let mut raw = match path {
            Some(path) => read_config_object(path)?,
            None => Map::new(),
        };
        overrides.apply(&mut raw);

        let settings: Settings = serde_json::from_value(Value::Object(raw))
            .context("invalid configuration values")?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if !(2..=MAX_SAMPLES).contains(&self.screenshots_to_compare) {
            bail!(
                "screenshots_to_compare must be within 2..={MAX_SAMPLES} (got {})",
                self.screenshots_to_compare
            );
        }
        if !(0.0..=1.0).contains(&self.screenshot_threshold) {
            bail!(
                "screenshot_threshold must be within [0, 1] (got {})",
                self.screenshot_threshold
            );
        }
        if !(0.0..=MAX_COOLDOWN_MINUTES).contains(&self.cooldown_minutes) {
            bail!(
                "cooldown_minutes must be within [0, {MAX_COOLDOWN_MINUTES}] (got {})",
                self.cooldown_minutes
            );
        }
        if !(1..=MAX_CHECK_INTERVAL_SECS).contains(&self.check_interval) {
            bail!(
                "check_interval must be within 1..={MAX_CHECK_INTERVAL_SECS} seconds (got {})",
                self.check_interval
            );
        }
        if self.window_pattern.trim().is_empty() && self.process_name.is_none() {
            bail!("window_pattern is empty and no process_name was given");
        }
        Ok(())
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs_f64(self.cooldown_minutes * 60.0)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.check_interval)
    }
}

fn read_config_object(path: &Path) -> Result<Map<String, Value>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let value: Value = serde_json::from_str(&raw)
        .with_context(|| format!("invalid config JSON: {}", path.display()))?;
    match value {
        Value::Object(map) => Ok(map),
        _ => bail!("config root must be a JSON object: {}", path.display()),
    }
}

fn default_tail_lines() -> usize {
    200
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
