//! Stage result type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{Artifact, StageName, StageStatus};

/// One failed item inside a stage (a query, a page, a delivery).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// What failed, e.g. `"query 42 (orders)"`.
    pub subject: String,
    /// Error message of the last attempt.
    pub error: String,
    /// How many attempts were made.
    pub attempts: usize,
}

impl FailureRecord {
    /// Creates a new failure record.
    #[must_use]
    pub fn new(subject: impl Into<String>, error: impl Into<String>, attempts: usize) -> Self {
        Self {
            subject: subject.into(),
            error: error.into(),
            attempts,
        }
    }
}

/// Outcome of one stage. Built once by the stage and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    /// Which stage produced this.
    pub stage: StageName,
    /// Stage status.
    pub status: StageStatus,
    /// When the stage started.
    pub started_at: DateTime<Utc>,
    /// When the stage ended.
    pub ended_at: DateTime<Utc>,
    /// Files produced by the stage.
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    /// Error detail if the stage failed, or notes about partial failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Individual failed items.
    #[serde(default)]
    pub failures: Vec<FailureRecord>,
    /// Stage-specific data.
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
}

impl StageResult {
    fn base(stage: StageName, status: StageStatus, started_at: DateTime<Utc>) -> Self {
        Self {
            stage,
            status,
            started_at,
            ended_at: Utc::now(),
            artifacts: Vec::new(),
            error: None,
            failures: Vec::new(),
            data: HashMap::new(),
        }
    }

    /// Creates a succeeded result.
    #[must_use]
    pub fn succeeded(stage: StageName, started_at: DateTime<Utc>, artifacts: Vec<Artifact>) -> Self {
        Self {
            artifacts,
            ..Self::base(stage, StageStatus::Succeeded, started_at)
        }
    }

    /// Creates a failed result.
    #[must_use]
    pub fn failed(stage: StageName, started_at: DateTime<Utc>, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::base(stage, StageStatus::Failed, started_at)
        }
    }

    /// Creates a skipped result.
    #[must_use]
    pub fn skipped(stage: StageName, reason: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            error: Some(reason.into()),
            ..Self::base(stage, StageStatus::Skipped, now)
        }
    }

    /// Attaches artifacts.
    #[must_use]
    pub fn with_artifacts(mut self, artifacts: Vec<Artifact>) -> Self {
        self.artifacts = artifacts;
        self
    }

    /// Attaches item failures.
    #[must_use]
    pub fn with_failures(mut self, failures: Vec<FailureRecord>) -> Self {
        self.failures = failures;
        self
    }

    /// Sets the error detail.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Adds a data entry.
    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Returns the duration in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        (self.ended_at - self.started_at).num_milliseconds()
    }

    /// Returns true if the stage succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Returns true if the stage failed.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.status.is_failure()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ArtifactKind;

    #[test]
    fn test_stage_result_succeeded() {
        let started = Utc::now();
        let artifact = Artifact::new(ArtifactKind::Extract, "orders", "orders.csv");
        let result = StageResult::succeeded(StageName::Extract, started, vec![artifact]);

        assert_eq!(result.stage, StageName::Extract);
        assert!(result.is_success());
        assert!(!result.is_failure());
        assert!(result.error.is_none());
        assert_eq!(result.artifacts.len(), 1);
    }

    #[test]
    fn test_stage_result_failed() {
        let started = Utc::now();
        let result = StageResult::failed(StageName::Publish, started, "refresh timed out")
            .with_failures(vec![FailureRecord::new("refresh", "timed out", 1)]);

        assert!(result.is_failure());
        assert_eq!(result.error.as_deref(), Some("refresh timed out"));
        assert_eq!(result.failures[0].subject, "refresh");
    }

    #[test]
    fn test_stage_result_skipped() {
        let result = StageResult::skipped(StageName::Extract, "quick run");
        assert_eq!(result.status, StageStatus::Skipped);
        assert!(!result.is_success());
        assert!(!result.is_failure());
    }

    #[test]
    fn test_stage_result_duration() {
        let started = Utc::now();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let result = StageResult::succeeded(StageName::Notify, started, Vec::new());

        assert!(result.duration_ms() >= 10);
    }

    #[test]
    fn test_stage_result_serialization() {
        let result = StageResult::succeeded(StageName::Notify, Utc::now(), Vec::new())
            .with_data("attempts", serde_json::json!(2));

        let json = serde_json::to_string(&result).unwrap();
        let deserialized: StageResult = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.stage, StageName::Notify);
        assert_eq!(deserialized.status, StageStatus::Succeeded);
        assert_eq!(deserialized.data["attempts"], serde_json::json!(2));
    }
}
