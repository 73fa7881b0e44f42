//! Stage and run status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The three pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    /// Pull Redash query results to local files.
    Extract,
    /// Refresh the Power BI report and export pages.
    Publish,
    /// Post the run summary to the webhook.
    Notify,
}

impl StageName {
    /// All stages in the order they run.
    pub const ORDER: [Self; 3] = [Self::Extract, Self::Publish, Self::Notify];

    /// Returns true if a failure of this stage aborts the run when
    /// extraction is configured as mandatory.
    #[must_use]
    pub fn is_mandatory(self) -> bool {
        matches!(self, Self::Extract)
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Extract => write!(f, "extract"),
            Self::Publish => write!(f, "publish"),
            Self::Notify => write!(f, "notify"),
        }
    }
}

/// Outcome of a single stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage completed successfully.
    Succeeded,
    /// Stage failed.
    Failed,
    /// Stage was not run.
    Skipped,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

impl StageStatus {
    /// Returns true if the status indicates success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Returns true if the status indicates failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// No stage failed.
    Succeeded,
    /// A non-mandatory stage failed after at least one success.
    Partial,
    /// The mandatory stage failed, or nothing succeeded.
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Partial => write!(f, "partial"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl RunStatus {
    /// Derives the overall status from stage outcomes.
    ///
    /// `mandatory_failed` is true when a stage whose failure aborts the run
    /// has failed; that always yields [`RunStatus::Failed`].
    #[must_use]
    pub fn derive(statuses: &[StageStatus], mandatory_failed: bool) -> Self {
        if mandatory_failed {
            return Self::Failed;
        }
        let any_failed = statuses.iter().any(StageStatus::is_failure);
        if !any_failed {
            return Self::Succeeded;
        }
        if statuses.iter().any(StageStatus::is_success) {
            Self::Partial
        } else {
            Self::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_name_display_and_order() {
        assert_eq!(StageName::Extract.to_string(), "extract");
        assert_eq!(StageName::Notify.to_string(), "notify");
        assert!(StageName::Extract < StageName::Publish);
        assert!(StageName::Publish < StageName::Notify);
        assert!(StageName::Extract.is_mandatory());
        assert!(!StageName::Publish.is_mandatory());
    }

    #[test]
    fn test_run_status_all_succeeded() {
        let s = [StageStatus::Succeeded, StageStatus::Succeeded, StageStatus::Succeeded];
        assert_eq!(RunStatus::derive(&s, false), RunStatus::Succeeded);
    }

    #[test]
    fn test_run_status_skipped_is_not_failure() {
        let s = [StageStatus::Skipped, StageStatus::Succeeded, StageStatus::Succeeded];
        assert_eq!(RunStatus::derive(&s, false), RunStatus::Succeeded);
    }

    #[test]
    fn test_run_status_partial() {
        let s = [StageStatus::Succeeded, StageStatus::Failed, StageStatus::Succeeded];
        assert_eq!(RunStatus::derive(&s, false), RunStatus::Partial);
    }

    #[test]
    fn test_run_status_mandatory_failure() {
        let s = [StageStatus::Failed];
        assert_eq!(RunStatus::derive(&s, true), RunStatus::Failed);
    }

    #[test]
    fn test_run_status_nothing_succeeded() {
        let s = [StageStatus::Skipped, StageStatus::Failed, StageStatus::Failed];
        assert_eq!(RunStatus::derive(&s, false), RunStatus::Failed);
    }

    #[test]
    fn test_status_serialize() {
        let json = serde_json::to_string(&StageStatus::Skipped).unwrap();
        assert_eq!(json, r#""skipped""#);
        let json = serde_json::to_string(&RunStatus::Partial).unwrap();
        assert_eq!(json, r#""partial""#);
    }
}
