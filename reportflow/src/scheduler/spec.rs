//! Recurrence entries.

use chrono::NaiveTime;
use std::fmt;
use std::time::Duration;

use crate::core::{RunMode, RunRequest};

/// When an entry fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recurrence {
    /// Every day at a local wall-clock time.
    DailyAt(NaiveTime),
    /// At a fixed interval from scheduler start.
    Every(Duration),
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DailyAt(at) => write!(f, "daily at {}", at.format("%H:%M")),
            Self::Every(interval) => write!(f, "every {interval:?}"),
        }
    }
}

/// One recurring trigger and the tasks it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleEntry {
    /// Label used in logs and trigger history.
    pub label: String,
    /// When the entry fires.
    pub recurrence: Recurrence,
    /// Catalog tasks to run.
    pub tasks: Vec<String>,
    /// Stages to run.
    pub mode: RunMode,
}

impl ScheduleEntry {
    /// A full run of `tasks` every day at `at`.
    #[must_use]
    pub fn daily(at: NaiveTime, tasks: Vec<String>) -> Self {
        Self {
            label: at.format("%H:%M").to_string(),
            recurrence: Recurrence::DailyAt(at),
            tasks,
            mode: RunMode::Full,
        }
    }

    /// A full run of `tasks` every `interval`.
    #[must_use]
    pub fn every(interval: Duration, tasks: Vec<String>) -> Self {
        Self {
            label: format!("every {interval:?}"),
            recurrence: Recurrence::Every(interval),
            tasks,
            mode: RunMode::Full,
        }
    }

    /// Sets the run mode.
    #[must_use]
    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    /// The request this entry submits when it fires.
    #[must_use]
    pub fn request(&self) -> RunRequest {
        RunRequest {
            tasks: self.tasks.clone(),
            mode: self.mode,
        }
    }
}

/// The full set of recurring triggers. Read-only once built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleSpec {
    entries: Vec<ScheduleEntry>,
}

impl ScheduleSpec {
    /// Creates a schedule.
    #[must_use]
    pub fn new(entries: Vec<ScheduleEntry>) -> Self {
        Self { entries }
    }

    /// The entries in declaration order.
    #[must_use]
    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    /// Returns true if nothing is scheduled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_request_and_label() {
        let at = NaiveTime::from_hms_opt(8, 0, 0).unwrap();
        let entry = ScheduleEntry::daily(at, vec!["daily".into()]).with_mode(RunMode::Quick);

        assert_eq!(entry.label, "08:00");
        assert_eq!(entry.recurrence.to_string(), "daily at 08:00");
        assert_eq!(entry.request(), RunRequest::quick(vec!["daily".into()]));
    }

    #[test]
    fn test_empty_spec() {
        assert!(ScheduleSpec::default().is_empty());
        let spec = ScheduleSpec::new(vec![ScheduleEntry::every(Duration::from_secs(60), Vec::new())]);
        assert_eq!(spec.entries().len(), 1);
    }
}
