// Error types for extraction, proxy bootstrap and transcoding

use thiserror::Error;

/// Coarse error category, stable across variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    MissingBinary,
    Extraction,
    Proxy,
    Transcoding,
}

#[derive(Debug, Error)]
pub enum DownloadError {
    /// Malformed request, unknown filter, incompatible output modes, missing stream
    #[error("Validation error: {0}")]
    Validation(String),

    /// Required binary could not be located or spawned
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Subprocess ran but failed (non-zero exit, timeout, broken pipe)
    #[error("Execution error: {0}")]
    ExecutionError(String),

    /// Failed to parse extractor JSON output
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Retry budget spent; carries the last failure
    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<DownloadError>,
    },

    #[error("Proxy error: {0}")]
    Proxy(#[from] ProxyError),

    /// Transcoder exited with failure
    #[error("Transcode error: {0}")]
    Transcode(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DownloadError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) => ErrorCategory::Validation,
            Self::ToolNotFound(_) => ErrorCategory::MissingBinary,
            Self::ExecutionError(_) | Self::ParseError(_) => ErrorCategory::Extraction,
            Self::RetriesExhausted { last, .. } => last.category(),
            Self::Proxy(_) => ErrorCategory::Proxy,
            Self::Transcode(_) | Self::Cancelled | Self::Io(_) => ErrorCategory::Transcoding,
        }
    }

    /// Only a failed subprocess run is worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ExecutionError(_))
    }
}

/// Failures of the anonymizing proxy bootstrap
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("failed to start proxy: {0}")]
    Start(String),

    #[error("proxy exited before bootstrap completed (code {code:?})")]
    Exited { code: Option<i32> },

    #[error("proxy output stream unavailable")]
    StreamClosed,

    #[error("proxy output read failed: {0}")]
    Io(#[from] std::io::Error),
}
