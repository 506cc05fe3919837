use thiserror::Error;

/// Failure of a call into the desktop: window lookup, capture, input or OCR.
#[derive(Debug, Error)]
pub enum DesktopError {
    #[error("{tool} is not installed or not on PATH")]
    ToolMissing { tool: String },
    #[error("{tool} timed out after {timeout_ms}ms")]
    Timeout { tool: String, timeout_ms: u64 },
    #[error("{tool} exited with status {code}: {stderr}")]
    Failed {
        tool: String,
        code: i32,
        stderr: String,
    },
    #[error("failed to run {tool}: {source}")]
    Io {
        tool: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unexpected output from {tool}: {detail}")]
    Parse { tool: String, detail: String },
    #[error("failed to decode captured image: {0}")]
    Image(#[from] image::ImageError),
    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),
}

/// Failure of a single verification call.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("plugin not found: {0}")]
    NotFound(String),
    #[error("plugin timed out after {0}s")]
    Timeout(u64),
    #[error("plugin exited with status {code}: {stderr}")]
    Failed { code: i32, stderr: String },
    #[error("plugin produced invalid output: {0}")]
    InvalidOutput(String),
    #[error("invalid log rule pattern {pattern:?}: {source}")]
    BadPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
