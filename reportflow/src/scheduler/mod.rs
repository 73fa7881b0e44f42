//! Recurring and manual run triggers.
//!
//! The [`Scheduler`] owns all scheduling state. A trigger that fires while a
//! run is in flight is recorded as skipped, never queued.

mod spec;

pub use spec::{Recurrence, ScheduleEntry, ScheduleSpec};

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::{RunReport, RunRequest, RunStatus};
use crate::errors::{ReportflowError, Result};
use crate::utils::next_daily;

/// Something that can execute a run on request.
#[async_trait]
pub trait RunTrigger: Send + Sync {
    /// Executes one run, or rejects it with
    /// [`ReportflowError::RunInProgress`].
    async fn trigger(&self, request: RunRequest) -> Result<RunReport>;
}

/// What became of one trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TriggerOutcome {
    /// The run executed.
    Ran {
        /// Run id.
        run_id: Uuid,
        /// Overall status of the run.
        overall: RunStatus,
    },
    /// Another run was in flight.
    Skipped {
        /// Why the trigger was dropped.
        reason: String,
    },
    /// The run could not be executed at all.
    Errored {
        /// Error message.
        error: String,
    },
}

/// One entry of the trigger history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerRecord {
    /// Entry label, or `"manual"`.
    pub label: String,
    /// When the trigger fired.
    pub fired_at: DateTime<Utc>,
    /// Outcome.
    pub outcome: TriggerOutcome,
}

impl TriggerRecord {
    /// Returns true if the trigger was skipped because of an active run.
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        matches!(self.outcome, TriggerOutcome::Skipped { .. })
    }
}

/// Label recorded for manual runs.
pub const MANUAL_LABEL: &str = "manual";

/// Fires runs on a schedule or on demand and remembers what happened.
#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    history: Arc<Mutex<Vec<TriggerRecord>>>,
}

/// A running schedule loop.
#[derive(Debug)]
pub struct SchedulerHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
    scheduler: Scheduler,
}

impl SchedulerHandle {
    /// Trigger history so far.
    #[must_use]
    pub fn history(&self) -> Vec<TriggerRecord> {
        self.scheduler.history()
    }

    /// Stops the loop and waits for runs it started to finish.
    pub async fn stop(self) {
        self.stop.send_replace(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "Schedule loop ended abnormally");
        }
    }
}

struct Pending {
    entry: ScheduleEntry,
    due: Instant,
    occurrence: Option<NaiveDateTime>,
}

impl Pending {
    fn first(entry: ScheduleEntry) -> Self {
        let now = Instant::now();
        match entry.recurrence {
            Recurrence::DailyAt(at) => {
                let local = Local::now().naive_local();
                let occurrence = next_daily(local, at);
                Self {
                    due: now + until(local, occurrence),
                    occurrence: Some(occurrence),
                    entry,
                }
            }
            Recurrence::Every(interval) => Self {
                due: now + interval,
                occurrence: None,
                entry,
            },
        }
    }

    /// Moves to the next occurrence strictly after the one that fired.
    fn advance(&mut self) {
        let now = Instant::now();
        match self.entry.recurrence {
            Recurrence::DailyAt(at) => {
                let local = Local::now().naive_local();
                let after = self.occurrence.map_or(local, |fired| fired.max(local));
                let occurrence = next_daily(after, at);
                self.due = now + until(local, occurrence);
                self.occurrence = Some(occurrence);
            }
            Recurrence::Every(interval) => {
                let interval = interval.max(Duration::from_millis(1));
                self.due += interval;
                while self.due <= now {
                    self.due += interval;
                }
            }
        }
    }
}

fn until(now: NaiveDateTime, at: NaiveDateTime) -> Duration {
    (at - now).to_std().unwrap_or(Duration::ZERO)
}

impl Scheduler {
    /// Creates a scheduler with an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Trigger history so far, in completion order.
    #[must_use]
    pub fn history(&self) -> Vec<TriggerRecord> {
        self.history.lock().clone()
    }

    /// Spawns [`Scheduler::set_schedule`] and returns a handle to stop it.
    pub fn start(&self, spec: ScheduleSpec, trigger: Arc<dyn RunTrigger>) -> SchedulerHandle {
        let (stop, stopped) = watch::channel(false);
        let scheduler = self.clone();
        let task = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.set_schedule(spec, trigger, stopped).await }
        });
        SchedulerHandle {
            stop,
            task,
            scheduler,
        }
    }

    /// Runs the recurring loop until `stop` turns true or its sender is
    /// dropped. Each occurrence fires at most once; runs are spawned so the
    /// loop keeps ticking while they execute.
    pub async fn set_schedule(
        &self,
        spec: ScheduleSpec,
        trigger: Arc<dyn RunTrigger>,
        mut stop: watch::Receiver<bool>,
    ) {
        let mut pending: Vec<Pending> = spec.entries().iter().cloned().map(Pending::first).collect();
        let mut runs = JoinSet::new();
        info!(entries = pending.len(), "Schedule started");

        loop {
            if *stop.borrow() {
                break;
            }
            let next = pending
                .iter()
                .enumerate()
                .min_by_key(|(_, p)| p.due)
                .map(|(i, p)| (i, p.due));

            let fired = match next {
                Some((index, due)) => {
                    tokio::select! {
                        () = tokio::time::sleep_until(due) => Some(index),
                        changed = stop.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            None
                        }
                    }
                }
                None => {
                    if stop.changed().await.is_err() {
                        break;
                    }
                    None
                }
            };

            if let Some(index) = fired {
                let slot = &mut pending[index];
                let label = slot.entry.label.clone();
                let request = slot.entry.request();
                slot.advance();
                debug!(label = %label, "Schedule entry due");

                let trigger = Arc::clone(&trigger);
                let scheduler = self.clone();
                runs.spawn(async move {
                    let _ = scheduler.fire(&label, trigger.as_ref(), request).await;
                });
            }

            while let Some(joined) = runs.try_join_next() {
                if let Err(e) = joined {
                    error!(error = %e, "Scheduled run panicked");
                }
            }
        }

        while let Some(joined) = runs.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Scheduled run panicked");
            }
        }
        info!("Schedule stopped");
    }

    /// Fires exactly one run and returns its report.
    pub async fn run_manual_once(
        &self,
        trigger: &dyn RunTrigger,
        request: RunRequest,
    ) -> Result<RunReport> {
        self.fire(MANUAL_LABEL, trigger, request).await
    }

    async fn fire(
        &self,
        label: &str,
        trigger: &dyn RunTrigger,
        request: RunRequest,
    ) -> Result<RunReport> {
        let fired_at = Utc::now();
        info!(label, tasks = ?request.tasks, mode = %request.mode, "Trigger fired");
        let result = trigger.trigger(request).await;

        let outcome = match &result {
            Ok(report) => TriggerOutcome::Ran {
                run_id: report.run_id,
                overall: report.overall,
            },
            Err(ReportflowError::RunInProgress { active_run }) => {
                warn!(label, active_run = %active_run, "Run in progress, trigger skipped");
                TriggerOutcome::Skipped {
                    reason: format!("run {active_run} in progress"),
                }
            }
            Err(e @ ReportflowError::NoTasks { .. }) => {
                info!(label, "Trigger has no tasks, skipped");
                TriggerOutcome::Skipped {
                    reason: e.to_string(),
                }
            }
            Err(e) => {
                error!(label, error = %e, "Triggered run could not execute");
                TriggerOutcome::Errored {
                    error: e.to_string(),
                }
            }
        };

        self.history.lock().push(TriggerRecord {
            label: label.to_string(),
            fired_at,
            outcome,
        });
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{RunContext, StageName, StageResult};
    use crate::pipeline::PipelineState;
    use crate::testing::test_config;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Takes `duration` per run and rejects overlapping calls.
    struct TimedTrigger {
        guard: tokio::sync::Mutex<()>,
        duration: Duration,
        runs: AtomicUsize,
    }

    impl TimedTrigger {
        fn new(duration: Duration) -> Arc<Self> {
            Arc::new(Self {
                guard: tokio::sync::Mutex::new(()),
                duration,
                runs: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl RunTrigger for TimedTrigger {
        async fn trigger(&self, request: RunRequest) -> Result<RunReport> {
            let Ok(_guard) = self.guard.try_lock() else {
                return Err(ReportflowError::RunInProgress {
                    active_run: "busy".into(),
                });
            };
            self.runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.duration).await;

            let ctx = RunContext::new(Arc::new(test_config()), request);
            let stages = vec![StageResult::succeeded(StageName::Extract, Utc::now(), Vec::new())];
            Ok(RunReport::assemble(&ctx, stages, vec![PipelineState::Completed], true))
        }
    }

    fn every(secs: u64) -> ScheduleSpec {
        ScheduleSpec::new(vec![ScheduleEntry::every(Duration::from_secs(secs), vec!["daily".into()])])
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_entry_fires_each_occurrence_once() {
        let trigger = TimedTrigger::new(Duration::from_secs(1));
        let handle = Scheduler::new().start(every(10), trigger.clone());

        tokio::time::sleep(Duration::from_secs(35)).await;
        let scheduler = handle.scheduler.clone();
        handle.stop().await;
        let history = scheduler.history();

        assert_eq!(trigger.runs.load(Ordering::SeqCst), 3);
        assert_eq!(history.len(), 3);
        assert!(history.iter().all(|r| matches!(r.outcome, TriggerOutcome::Ran { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_trigger_is_skipped() {
        let trigger = TimedTrigger::new(Duration::from_secs(25));
        let handle = Scheduler::new().start(every(10), trigger.clone());

        tokio::time::sleep(Duration::from_secs(45)).await;
        let scheduler = handle.scheduler.clone();
        handle.stop().await;
        let history = scheduler.history();

        let skipped = history.iter().filter(|r| r.is_skipped()).count();
        let ran = history
            .iter()
            .filter(|r| matches!(r.outcome, TriggerOutcome::Ran { .. }))
            .count();
        assert_eq!(skipped, 2);
        assert_eq!(ran, 2);
        assert_eq!(trigger.runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_first_occurrence() {
        let trigger = TimedTrigger::new(Duration::ZERO);
        let handle = Scheduler::new().start(every(60), trigger.clone());

        tokio::time::sleep(Duration::from_secs(5)).await;
        let scheduler = handle.scheduler.clone();
        handle.stop().await;

        assert!(scheduler.history().is_empty());
        assert_eq!(trigger.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_schedule_waits_for_stop() {
        let trigger = TimedTrigger::new(Duration::ZERO);
        let handle = Scheduler::new().start(ScheduleSpec::default(), trigger);

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert!(handle.history().is_empty());
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_run_manual_once_records_history() {
        let trigger = TimedTrigger::new(Duration::ZERO);
        let scheduler = Scheduler::new();

        let report = scheduler
            .run_manual_once(trigger.as_ref(), RunRequest::full(vec!["daily".into()]))
            .await
            .unwrap();

        let history = scheduler.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].label, MANUAL_LABEL);
        assert_eq!(
            history[0].outcome,
            TriggerOutcome::Ran {
                run_id: report.run_id,
                overall: RunStatus::Succeeded
            }
        );
    }

    #[tokio::test]
    async fn test_daily_entry_advances_by_one_day() {
        let at = chrono::NaiveTime::from_hms_opt(3, 0, 0).unwrap();
        let mut pending = Pending::first(ScheduleEntry::daily(at, Vec::new()));
        let first_due = pending.due;
        let first = pending.occurrence.unwrap();
        assert!(first_due <= Instant::now() + Duration::from_secs(24 * 3600));

        pending.advance();

        assert!(pending.due > first_due);
        assert_eq!(pending.occurrence.unwrap(), first + chrono::Duration::days(1));
    }
}
