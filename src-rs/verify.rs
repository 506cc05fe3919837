//! Verification plugins pick the prompt text for a send.
//!
//! A plugin is anything implementing [`Verifier`]. Two ship with the crate:
//! [`CommandVerifier`] runs an external script, [`LogVerifier`] scans the
//! tail of a log file with regex rules.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::VerifyError;
use crate::process::wait_with_output;
use crate::settings::{LogVerification, Settings, FALLBACK_PROMPT};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub prompt_override: Option<String>,
}

impl Verification {
    pub fn new(status: &str, message: impl Into<String>) -> Self {
        Self {
            status: status.to_string(),
            message: message.into(),
            prompt_override: None,
        }
    }

    pub fn unconfigured() -> Self {
        Self::new("unknown", "No verification configured")
    }
}

pub trait Verifier {
    fn name(&self) -> String;

    fn verify(&mut self) -> Result<Verification, VerifyError>;
}

/// Builds the configured verifier. Load failures are logged and disable verification.
pub fn load_verifier(settings: &Settings) -> Option<Box<dyn Verifier>> {
    if let Some(path) = &settings.verification_plugin {
        return match CommandVerifier::load(path, settings.verification_timeout_secs) {
            Ok(verifier) => {
                tracing::info!(plugin = %path.display(), "loaded verification plugin");
                Some(Box::new(verifier))
            }
            Err(err) => {
                tracing::warn!(plugin = %path.display(), error = %err, "failed to load verification plugin");
                None
            }
        };
    }

    if let Some(config) = &settings.log_verification {
        return match LogVerifier::new(config) {
            Ok(verifier) => {
                tracing::info!(log = %config.path.display(), rules = config.rules.len(), "loaded log verification");
                Some(Box::new(verifier))
            }
            Err(err) => {
                tracing::warn!(log = %config.path.display(), error = %err, "failed to load log verification");
                None
            }
        };
    }
    None
}

/// Runs the verifier, turning a failure into an `error` status for this cycle.
pub fn run_verification(verifier: Option<&mut (dyn Verifier + '_)>) -> Verification {
    let Some(verifier) = verifier else {
        return Verification::unconfigured();
    };
    match verifier.verify() {
        Ok(result) => result,
        Err(err) => {
            tracing::warn!(verifier = %verifier.name(), error = %err, "verification failed");
            Verification::new("error", err.to_string())
        }
    }
}

/// Override text, else the prompt for the status, else the `default` prompt.
pub fn resolve_prompt(prompts: &BTreeMap<String, String>, verification: &Verification) -> String {
    if let Some(text) = verification
        .prompt_override
        .as_deref()
        .filter(|t| !t.is_empty())
    {
        return text.to_string();
    }
    prompts
        .get(&verification.status)
        .or_else(|| prompts.get("default"))
        .cloned()
        .unwrap_or_else(|| FALLBACK_PROMPT.to_string())
}

/// Imports a Python plugin module and prints its `verify()` result as JSON.
///
/// Anything the plugin prints itself goes to stderr so stdout carries only the verdict.
const PYTHON_HOST: &str = r#"
import contextlib, importlib.util, json, sys
found = importlib.util.spec_from_file_location("verification_plugin", sys.argv[1])
module = importlib.util.module_from_spec(found)
with contextlib.redirect_stdout(sys.stderr):
    found.loader.exec_module(module)
    if hasattr(module, "verify"):
        result = module.verify()
    else:
        result = ("unknown", "Verification plugin missing verify() function", None)
if isinstance(result, (tuple, list)):
    result = list(result)
print(json.dumps(result, default=str))
"#;

/// Runs a plugin file and reads its verdict from stdout as JSON.
///
/// A `.py` file is a module exposing `verify()` returning
/// `(status, message, prompt_override)`; it is imported by `PYTHON_HOST`.
/// Any other file is executed (`.sh` through `sh`) and prints either
/// `{"status", "message", "prompt_override"}` or `[status, message, override-or-null]`.
pub struct CommandVerifier {
    path: PathBuf,
    timeout: Duration,
}

impl CommandVerifier {
    pub fn load(path: &Path, timeout_secs: u64) -> Result<Self, VerifyError> {
        if !path.is_file() {
            return Err(VerifyError::NotFound(path.display().to_string()));
        }
        Ok(Self {
            path: path.to_path_buf(),
            timeout: Duration::from_secs(timeout_secs.max(1)),
        })
    }

    fn command(&self) -> Command {
        match self.path.extension().and_then(|e| e.to_str()) {
            Some("py") => {
                let mut cmd = Command::new("python3");
                cmd.arg("-c").arg(PYTHON_HOST).arg(&self.path);
                cmd
            }
            Some("sh") => {
                let mut cmd = Command::new("sh");
                cmd.arg(&self.path);
                cmd
            }
            _ => Command::new(&self.path),
        }
    }
}

impl Verifier for CommandVerifier {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn verify(&mut self) -> Result<Verification, VerifyError> {
        let child = self
            .command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let Some(finished) = wait_with_output(child, self.timeout)? else {
            return Err(VerifyError::Timeout(self.timeout.as_secs()));
        };

        if !finished.status.success() {
            return Err(VerifyError::Failed {
                code: finished.status.code().unwrap_or(1),
                stderr: last_lines(&finished.stderr, 20),
            });
        }
        parse_plugin_output(&finished.stdout)
    }
}

/// The tail of a plugin's stderr; tracebacks and build logs can be long.
fn last_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.trim().lines().collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}

fn parse_plugin_output(raw: &str) -> Result<Verification, VerifyError> {
    let value: Value = serde_json::from_str(raw.trim())
        .map_err(|e| VerifyError::InvalidOutput(e.to_string()))?;

    match value {
        Value::Object(_) => {
            serde_json::from_value(value).map_err(|e| VerifyError::InvalidOutput(e.to_string()))
        }
        Value::Array(items) if (2..=3).contains(&items.len()) => {
            let text = |v: &Value| match v {
                Value::String(s) => Some(s.clone()),
                Value::Null => None,
                other => Some(other.to_string()),
            };
            let status = text(&items[0])
                .ok_or_else(|| VerifyError::InvalidOutput("status is null".to_string()))?;
            Ok(Verification {
                status,
                message: text(&items[1]).unwrap_or_default(),
                prompt_override: items.get(2).and_then(text),
            })
        }
        other => Err(VerifyError::InvalidOutput(format!(
            "expected an object or a 2- or 3-element array, got {other}"
        ))),
    }
}

struct CompiledRule {
    regex: Regex,
    status: String,
    prompt: Option<String>,
}

/// Scans the tail of a log file; the first rule whose pattern matches a line wins.
pub struct LogVerifier {
    path: PathBuf,
    tail_lines: usize,
    rules: Vec<CompiledRule>,
}

impl LogVerifier {
    pub fn new(config: &LogVerification) -> Result<Self, VerifyError> {
        let rules = config
            .rules
            .iter()
            .map(|rule| {
                Regex::new(&rule.pattern)
                    .map(|regex| CompiledRule {
                        regex,
                        status: rule.status.clone(),
                        prompt: rule.prompt.clone(),
                    })
                    .map_err(|source| VerifyError::BadPattern {
                        pattern: rule.pattern.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            path: config.path.clone(),
            tail_lines: config.tail_lines.max(1),
            rules,
        })
    }
}

impl Verifier for LogVerifier {
    fn name(&self) -> String {
        format!("log:{}", self.path.display())
    }

    fn verify(&mut self) -> Result<Verification, VerifyError> {
        let bytes = fs::read(&self.path)?;
        let text = String::from_utf8_lossy(&bytes);
        let lines: Vec<&str> = text.lines().collect();
        let tail = &lines[lines.len().saturating_sub(self.tail_lines)..];

        for rule in &self.rules {
            if let Some(line) = tail.iter().rev().find(|line| rule.regex.is_match(line)) {
                return Ok(Verification {
                    status: rule.status.clone(),
                    message: line.trim().to_string(),
                    prompt_override: rule.prompt.clone(),
                });
            }
        }
        Ok(Verification::new("ok", "no log rule matched"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::LogRule;
    use tempfile::tempdir;

    struct Scripted(Result<Verification, String>);

    impl Verifier for Scripted {
        fn name(&self) -> String {
            "scripted".to_string()
        }

        fn verify(&mut self) -> Result<Verification, VerifyError> {
            self.0.clone().map_err(VerifyError::InvalidOutput)
        }
    }

    fn prompts() -> BTreeMap<String, String> {
        let mut prompts = BTreeMap::new();
        prompts.insert("default".to_string(), "Continue working on the task.".to_string());
        prompts.insert("error".to_string(), "Check the build output.".to_string());
        prompts
    }

    #[test]
    fn unknown_status_uses_default_prompt() {
        let verification = Verification::new("blocked", "waiting on build");
        assert_eq!(
            resolve_prompt(&prompts(), &verification),
            "Continue working on the task."
        );
    }

    #[test]
    fn override_wins_over_status() {
        let verification = Verification {
            status: "error".to_string(),
            message: "whatever".to_string(),
            prompt_override: Some("Please retry step 3".to_string()),
        };
        assert_eq!(resolve_prompt(&prompts(), &verification), "Please retry step 3");
    }

    #[test]
    fn known_status_uses_its_prompt() {
        let verification = Verification::new("error", "boom");
        assert_eq!(resolve_prompt(&prompts(), &verification), "Check the build output.");
    }

    #[test]
    fn missing_default_falls_back_to_builtin() {
        let verification = Verification::new("blocked", "");
        assert_eq!(resolve_prompt(&BTreeMap::new(), &verification), FALLBACK_PROMPT);
    }

    #[test]
    fn no_verifier_is_unknown() {
        let result = run_verification(None);
        assert_eq!(result.status, "unknown");
        assert!(result.prompt_override.is_none());
    }

    #[test]
    fn failing_verifier_degrades_to_error() {
        let mut verifier = Scripted(Err("disk on fire".to_string()));
        let result = run_verification(Some(&mut verifier as &mut dyn Verifier));
        assert_eq!(result.status, "error");
        assert!(result.message.contains("disk on fire"));
        assert!(result.prompt_override.is_none());
    }

    #[test]
    fn parses_object_output() {
        let parsed = parse_plugin_output(
            r#"{"status": "blocked", "message": "waiting on build", "prompt_override": null}"#,
        )
        .unwrap();
        assert_eq!(parsed, Verification::new("blocked", "waiting on build"));
    }

    #[test]
    fn parses_array_output() {
        let parsed = parse_plugin_output(r#"["ok", "tests green", "Please retry step 3"]"#).unwrap();
        assert_eq!(parsed.status, "ok");
        assert_eq!(parsed.prompt_override.as_deref(), Some("Please retry step 3"));

        let parsed = parse_plugin_output(r#"["blocked", "waiting", null]"#).unwrap();
        assert!(parsed.prompt_override.is_none());
    }

    #[test]
    fn rejects_garbage_output() {
        assert!(parse_plugin_output("not json").is_err());
        assert!(parse_plugin_output("42").is_err());
        assert!(parse_plugin_output("[null, \"x\", null]").is_err());
    }

    #[test]
    fn missing_plugin_fails_to_load() {
        let err = CommandVerifier::load(Path::new("/nonexistent/verify.py"), 5)
            .err()
            .unwrap();
        assert!(matches!(err, VerifyError::NotFound(_)));
    }

    #[cfg(unix)]
    #[test]
    fn runs_shell_plugin() {
        let dir = tempdir().unwrap();
        let script = dir.path().join("verify.sh");
        fs::write(
            &script,
            "echo '{\"status\": \"blocked\", \"message\": \"waiting on build\"}'\n",
        )
        .unwrap();
        let mut verifier = CommandVerifier::load(&script, 10).unwrap();
        let result = verifier.verify().unwrap();
        assert_eq!(result, Verification::new("blocked", "waiting on build"));
    }

    #[cfg(unix)]
    #[test]
    fn failing_shell_plugin_reports_exit_code() {
        let dir = tempdir().unwrap();
        let script = dir.path().join("verify.sh");
        fs::write(&script, "echo nope >&2\nexit 3\n").unwrap();
        let mut verifier = CommandVerifier::load(&script, 10).unwrap();
        match verifier.verify() {
            Err(VerifyError::Failed { code, stderr }) => {
                assert_eq!(code, 3);
                assert_eq!(stderr, "nope");
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn chatty_shell_plugin_is_not_stalled_by_its_stderr() {
        let dir = tempdir().unwrap();
        let script = dir.path().join("verify.sh");
        fs::write(
            &script,
            "head -c 200000 /dev/zero | tr '\\0' x >&2\necho '{\"status\": \"ok\"}'\n",
        )
        .unwrap();
        let mut verifier = CommandVerifier::load(&script, 5).unwrap();
        let result = verifier.verify().unwrap();
        assert_eq!(result, Verification::new("ok", ""));
    }

    fn python_plugin(source: &str) -> Option<(tempfile::TempDir, CommandVerifier)> {
        if !crate::platform::command_exists("python3") {
            return None;
        }
        let dir = tempdir().unwrap();
        let path = dir.path().join("plugin.py");
        fs::write(&path, source).unwrap();
        let verifier = CommandVerifier::load(&path, 10).unwrap();
        Some((dir, verifier))
    }

    #[test]
    fn python_module_verify_tuple_is_used() {
        let Some((_dir, mut verifier)) = python_plugin(
            "print('loading plugin')\n\ndef verify():\n    print('checking build')\n    return ('blocked', 'waiting on build', None)\n",
        ) else {
            return;
        };
        let result = run_verification(Some(&mut verifier as &mut dyn Verifier));
        assert_eq!(result, Verification::new("blocked", "waiting on build"));
        assert_eq!(resolve_prompt(&prompts(), &result), "Continue working on the task.");
    }

    #[test]
    fn python_module_override_is_carried() {
        let Some((_dir, mut verifier)) = python_plugin(
            "def verify():\n    return ('error', 'tests failing', 'Please retry step 3')\n",
        ) else {
            return;
        };
        let result = run_verification(Some(&mut verifier as &mut dyn Verifier));
        assert_eq!(result.prompt_override.as_deref(), Some("Please retry step 3"));
        assert_eq!(resolve_prompt(&prompts(), &result), "Please retry step 3");
    }

    #[test]
    fn python_module_without_verify_is_unknown() {
        let Some((_dir, mut verifier)) = python_plugin("STATUS = 'ready'\n") else {
            return;
        };
        let result = run_verification(Some(&mut verifier as &mut dyn Verifier));
        assert_eq!(
            result,
            Verification::new("unknown", "Verification plugin missing verify() function")
        );
    }

    #[test]
    fn python_module_raising_is_an_error_status() {
        let Some((_dir, mut verifier)) =
            python_plugin("def verify():\n    raise RuntimeError('build server down')\n")
        else {
            return;
        };
        let result = run_verification(Some(&mut verifier as &mut dyn Verifier));
        assert_eq!(result.status, "error");
        assert!(result.message.contains("build server down"));
    }

    #[test]
    fn log_rules_match_in_order() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("build.log");
        fs::write(&log, "step 1 ok\nerror[E0308]: mismatched types\nwaiting for lock\n").unwrap();

        let config = LogVerification {
            path: log,
            tail_lines: 50,
            rules: vec![
                LogRule {
                    pattern: r"error\[E\d+\]".to_string(),
                    status: "error".to_string(),
                    prompt: Some("Fix the compile error.".to_string()),
                },
                LogRule {
                    pattern: "waiting".to_string(),
                    status: "blocked".to_string(),
                    prompt: None,
                },
            ],
        };
        let mut verifier = LogVerifier::new(&config).unwrap();
        let result = verifier.verify().unwrap();
        assert_eq!(result.status, "error");
        assert_eq!(result.message, "error[E0308]: mismatched types");
        assert_eq!(result.prompt_override.as_deref(), Some("Fix the compile error."));
    }

    #[test]
    fn log_tail_limits_the_scan() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("agent.log");
        fs::write(&log, "FATAL old crash\nline\nline\n").unwrap();
        let config = LogVerification {
            path: log,
            tail_lines: 2,
            rules: vec![LogRule {
                pattern: "FATAL".to_string(),
                status: "error".to_string(),
                prompt: None,
            }],
        };
        let result = LogVerifier::new(&config).unwrap().verify().unwrap();
        assert_eq!(result.status, "ok");
    }

    #[test]
    fn bad_log_pattern_fails_to_load() {
        let config = LogVerification {
            path: PathBuf::from("x.log"),
            tail_lines: 10,
            rules: vec![LogRule {
                pattern: "(".to_string(),
                status: "error".to_string(),
                prompt: None,
            }],
        };
        assert!(matches!(
            LogVerifier::new(&config),
            Err(VerifyError::BadPattern { .. })
        ));
    }

    #[test]
    fn missing_log_is_a_call_failure() {
        let config = LogVerification {
            path: PathBuf::from("/nonexistent/agent.log"),
            tail_lines: 10,
            rules: Vec::new(),
        };
        let mut verifier = LogVerifier::new(&config).unwrap();
        let result = run_verification(Some(&mut verifier as &mut dyn Verifier));
        assert_eq!(result.status, "error");
    }
}
