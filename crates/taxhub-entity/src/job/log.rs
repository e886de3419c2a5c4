//! Append-only job error and execution log records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of a job log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Diagnostic detail.
    Debug,
    /// Normal progress information.
    Info,
    /// Something unexpected but recoverable.
    Warn,
    /// A failure worth surfacing.
    Error,
}

impl LogLevel {
    /// Return the level as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One free-form execution log line, appended during processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobLogEntry {
    /// Severity.
    pub level: LogLevel,
    /// Log message.
    pub message: String,
    /// When the line was written.
    pub timestamp: DateTime<Utc>,
    /// Optional structured context.
    pub context: Option<serde_json::Value>,
}

impl JobLogEntry {
    /// Create a log entry timestamped now.
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            timestamp: Utc::now(),
            context: None,
        }
    }

    /// Attach structured context.
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }
}

/// One failure record. Errors accumulate across retries for audit and
/// are never cleared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    /// Error message from the handler.
    pub message: String,
    /// Optional machine-readable error code.
    pub code: Option<String>,
    /// When the failure occurred.
    pub timestamp: DateTime<Utc>,
}

impl JobError {
    /// Create an error record timestamped now.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach a machine-readable code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}
