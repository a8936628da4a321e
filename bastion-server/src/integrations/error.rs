// Bridge integration error types
//
// Failures of the helper CLI process itself. Platform-level outcomes
// (not found, throttled) arrive inside successful replies and are mapped
// to `PlatformError` by the bridge client instead.

use std::io;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum IntegrationError {
    /// CLI executable not found in PATH
    #[error("CLI not found: '{0}'. Is it installed and in PATH?")]
    CliNotFound(String),

    #[error("Failed to spawn subprocess: {0}")]
    SpawnFailed(String),

    /// Process exited with a non-zero code
    #[error("Process exited with code {code}: {stderr}")]
    ProcessExited { code: i32, stderr: String },

    #[error("Max restarts exceeded after {attempts} attempts. Last error: {last_error}")]
    MaxRestartsExceeded { attempts: u8, last_error: String },

    /// Output of the CLI was not the JSON we expected
    #[error("Failed to parse CLI output: {0}")]
    ParseError(String),

    #[error("Timeout after {duration_secs}s waiting for: {operation}")]
    Timeout {
        operation: String,
        duration_secs: u64,
    },

    #[error("Internal channel closed unexpectedly")]
    ChannelClosed,

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Subprocess is not running")]
    NotRunning,

    #[error("Shutdown requested")]
    ShutdownRequested,
}

impl From<io::Error> for IntegrationError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::CliNotFound(err.to_string()),
            io::ErrorKind::TimedOut => Self::Timeout {
                operation: "I/O".to_string(),
                duration_secs: 0,
            },
            _ => Self::IoError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for IntegrationError {
    fn from(err: serde_json::Error) -> Self {
        Self::ParseError(err.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for IntegrationError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Self::ChannelClosed
    }
}

pub type IntegrationResult<T> = Result<T, IntegrationError>;
