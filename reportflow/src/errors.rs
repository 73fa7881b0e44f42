//! Error types for the reportflow pipeline.
//!
//! Only [`ConfigError`] is fatal. Every other error is caught at its stage
//! boundary and folded into a [`StageResult`](crate::core::StageResult).

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result alias for reportflow operations.
pub type Result<T> = std::result::Result<T, ReportflowError>;

/// The main error type for reportflow operations.
#[derive(Debug, Error)]
pub enum ReportflowError {
    /// Configuration could not be established.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A run was requested while another run holds the pipeline.
    #[error("a pipeline run is already in progress (run {active_run})")]
    RunInProgress {
        /// The run currently holding the guard.
        active_run: String,
    },

    /// The request selects no tasks, so there is nothing to run.
    #[error("no tasks selected for the {mode} run")]
    NoTasks {
        /// Requested run mode.
        mode: crate::core::RunMode,
    },

    /// An HTTP client could not be constructed.
    #[error("HTTP client setup failed: {0}")]
    Client(String),

    /// The orchestrator attempted an illegal state change.
    #[error(transparent)]
    Transition(#[from] crate::pipeline::TransitionError),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Raised while resolving configuration. Terminates the process before any
/// run starts.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable is absent or empty.
    #[error("missing required configuration variable {0}")]
    Missing(String),

    /// A variable holds a value that cannot be parsed.
    #[error("invalid value for {key}: {message}")]
    Invalid {
        /// The offending variable.
        key: String,
        /// Why the value was rejected.
        message: String,
    },

    /// A referenced path does not exist or cannot be read.
    #[error("{key} points to {path:?}, which {problem}")]
    Path {
        /// The variable naming the path.
        key: String,
        /// The path itself.
        path: PathBuf,
        /// What is wrong with it.
        problem: String,
    },

    /// The task catalog is missing or malformed.
    #[error("task catalog {path:?}: {message}")]
    Catalog {
        /// Catalog location.
        path: PathBuf,
        /// Parse or validation failure.
        message: String,
    },
}

impl ConfigError {
    /// Creates an invalid-value error.
    #[must_use]
    pub fn invalid(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Creates a path error.
    #[must_use]
    pub fn path(key: impl Into<String>, path: impl Into<PathBuf>, problem: impl Into<String>) -> Self {
        Self::Path {
            key: key.into(),
            path: path.into(),
            problem: problem.into(),
        }
    }
}

/// Failure of a single Redash query. Aggregated per stage, never fatal.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractionError {
    /// The request never produced a response.
    #[error("network error: {0}")]
    Network(String),

    /// Redash answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Message extracted from the body.
        message: String,
    },

    /// The query job ended in the failed or cancelled state.
    #[error("query job failed: {0}")]
    JobFailed(String),

    /// The response could not be interpreted.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// The query did not finish within its timeout.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The result could not be written to disk.
    #[error("write failed for {path:?}: {message}")]
    Write {
        /// Target file.
        path: PathBuf,
        /// IO error text.
        message: String,
    },
}

impl ExtractionError {
    /// Returns true if another attempt may succeed.
    ///
    /// Authorization failures and malformed payloads will not fix themselves.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::JobFailed(_) | Self::Timeout(_) => true,
            Self::Status { status, .. } => !matches!(status, 401 | 403 | 404),
            Self::Malformed(_) | Self::Write { .. } => false,
        }
    }
}

/// Failure of the Power BI stage.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PublishError {
    /// The refresh did not complete in time. No export was attempted.
    #[error("refresh of '{report}' did not complete within {timeout:?}")]
    RefreshTimeout {
        /// Report title.
        report: String,
        /// The configured limit.
        timeout: Duration,
    },

    /// The service reported the refresh as failed. No export was attempted.
    #[error("refresh of '{report}' failed: {message}")]
    RefreshFailed {
        /// Report title.
        report: String,
        /// Service message.
        message: String,
    },

    /// Exporting failed after a successful refresh.
    #[error("export failed after completed refresh: {}", failed.join("; "))]
    Export {
        /// One entry per failing page.
        failed: Vec<String>,
    },

    /// A call to the Power BI service failed.
    #[error("Power BI service error: {0}")]
    Service(String),
}

/// Failure to deliver a webhook payload.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// Transport failure or timeout.
    #[error("transport error: {0}")]
    Transport(String),

    /// The endpoint answered with a non-success status.
    #[error("webhook answered HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },
}

impl DeliveryError {
    /// Transport failures and 5xx responses are transient; 4xx is treated
    /// as a configuration problem.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => *status >= 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_error_transience() {
        assert!(DeliveryError::Transport("reset".into()).is_transient());
        assert!(DeliveryError::Status { status: 503, body: String::new() }.is_transient());
        assert!(!DeliveryError::Status { status: 404, body: String::new() }.is_transient());
        assert!(!DeliveryError::Status { status: 400, body: String::new() }.is_transient());
    }

    #[test]
    fn test_extraction_error_retryable() {
        assert!(ExtractionError::Network("dns".into()).is_retryable());
        assert!(ExtractionError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(ExtractionError::Status { status: 502, message: String::new() }.is_retryable());
        assert!(!ExtractionError::Status { status: 403, message: String::new() }.is_retryable());
        assert!(!ExtractionError::Malformed("no job".into()).is_retryable());
    }

    #[test]
    fn test_export_error_lists_pages() {
        let err = PublishError::Export {
            failed: vec!["Summary: boom".into(), "Detail: bang".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("completed refresh"));
        assert!(msg.contains("Summary: boom; Detail: bang"));
    }

    #[test]
    fn test_config_error_into_main_error() {
        let err: ReportflowError = ConfigError::Missing("REDASH_DOMAIN".into()).into();
        assert!(err.to_string().contains("REDASH_DOMAIN"));
    }
}
