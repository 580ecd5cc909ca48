use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("external tool is missing: {tool}")]
    ExternalToolMissing { tool: String },

    #[error("external tool failed: {tool} (code={code:?}) {stderr}")]
    ExternalToolFailed {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("operation canceled")]
    Canceled,

    #[error("operation timed out after {0}s")]
    TimedOut(u64),

    #[error("network error: {0}")]
    Network(String),

    #[error("insufficient disk space: {0}")]
    DiskFull(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("input file not found: {}", .0.display())]
    InputNotFound(PathBuf),

    #[error("output folder not usable: {0}")]
    OutputDirUnusable(String),

    #[error("hash mismatch for {}: expected {expected}, got {actual}", .path.display())]
    HashMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("tool install failed: {0}")]
    InstallFailed(String),
}

impl EngineError {
    /// Errors worth another attempt after a backoff; everything else is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Network(_) | EngineError::TimedOut(_))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
