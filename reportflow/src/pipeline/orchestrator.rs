//! Sequences Extract, Publish and Notify for one run.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use super::state::{PipelineState, StateMachine};
use crate::config::{Config, TaskCatalog};
use crate::core::{RunContext, RunMode, RunReport, RunRequest, StageName, StageResult};
use crate::errors::{ReportflowError, Result};
use crate::scheduler::RunTrigger;
use crate::stages::{
    PowerBiPublisher, PowerBiService, RedashExtractor, RedashSource, WebhookNotifier,
    WebhookSender,
};

/// External services a run talks to.
#[derive(Clone)]
pub struct Collaborators {
    /// Redash query source.
    pub redash: Arc<dyn RedashSource>,
    /// Power BI refresh and export.
    pub powerbi: Arc<dyn PowerBiService>,
    /// Webhook delivery.
    pub webhook: Arc<dyn WebhookSender>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// Runs the pipeline. At most one run is active per orchestrator.
#[derive(Debug)]
pub struct Orchestrator {
    config: Arc<Config>,
    catalog: TaskCatalog,
    extractor: RedashExtractor,
    publisher: PowerBiPublisher,
    notifier: WebhookNotifier,
    guard: tokio::sync::Mutex<()>,
    active: Arc<Mutex<Option<Uuid>>>,
}

/// Clears the active run id when the run ends or is dropped.
struct ActiveRun(Arc<Mutex<Option<Uuid>>>);

impl Drop for ActiveRun {
    fn drop(&mut self) {
        *self.0.lock() = None;
    }
}

impl Orchestrator {
    /// Creates an orchestrator over the given collaborators.
    #[must_use]
    pub fn new(config: Arc<Config>, catalog: TaskCatalog, collaborators: Collaborators) -> Self {
        Self {
            extractor: RedashExtractor::from_settings(collaborators.redash, &config.redash),
            publisher: PowerBiPublisher::from_settings(collaborators.powerbi, &config.powerbi),
            notifier: WebhookNotifier::from_settings(collaborators.webhook, &config.webhook),
            config,
            catalog,
            guard: tokio::sync::Mutex::new(()),
            active: Arc::new(Mutex::new(None)),
        }
    }

    /// Replaces the webhook notifier.
    #[must_use]
    pub fn with_notifier(mut self, notifier: WebhookNotifier) -> Self {
        self.notifier = notifier;
        self
    }

    /// Replaces the Redash extractor.
    #[must_use]
    pub fn with_extractor(mut self, extractor: RedashExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    /// Replaces the Power BI publisher.
    #[must_use]
    pub fn with_publisher(mut self, publisher: PowerBiPublisher) -> Self {
        self.publisher = publisher;
        self
    }

    /// The configuration runs are launched with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The task catalog.
    #[must_use]
    pub fn catalog(&self) -> &TaskCatalog {
        &self.catalog
    }

    /// Id of the run in progress, if any.
    #[must_use]
    pub fn active_run(&self) -> Option<Uuid> {
        *self.active.lock()
    }

    /// Executes one run.
    ///
    /// Returns [`ReportflowError::NoTasks`] for an empty task selection and
    /// [`ReportflowError::RunInProgress`] if another run holds the pipeline;
    /// neither touches a collaborator. Stage failures never surface as
    /// errors; they are recorded in the report.
    pub async fn run_once(&self, request: RunRequest) -> Result<RunReport> {
        if request.tasks.is_empty() {
            info!(mode = %request.mode, "No tasks selected, nothing to run");
            return Err(ReportflowError::NoTasks { mode: request.mode });
        }

        let Ok(_guard) = self.guard.try_lock() else {
            return Err(ReportflowError::RunInProgress {
                active_run: self
                    .active_run()
                    .map_or_else(|| "unknown".to_string(), |id| id.to_string()),
            });
        };

        let ctx = RunContext::new(Arc::clone(&self.config), request);
        *self.active.lock() = Some(ctx.run_id());
        let _active = ActiveRun(Arc::clone(&self.active));

        let span = info_span!("run", run_id = %ctx.run_id(), mode = %ctx.request().mode);
        self.execute(&ctx).instrument(span).await
    }

    async fn execute(&self, ctx: &RunContext) -> Result<RunReport> {
        let config = ctx.config();
        let tasks = &ctx.request().tasks;
        let data_dir = &config.paths.data_dir;
        let mandatory = config.pipeline.extraction_mandatory;
        let mut machine = StateMachine::new();
        let mut stages: Vec<StageResult> = Vec::with_capacity(StageName::ORDER.len());

        info!(tasks = ?tasks, "Run started");
        machine.advance(PipelineState::Extracting)?;

        let extract = match ctx.request().mode {
            RunMode::Full => {
                let queries = self.catalog.queries_for(tasks, config.redash.api_key.as_ref());
                self.extractor.extract(&queries, data_dir).await
            }
            RunMode::Quick => StageResult::skipped(StageName::Extract, "quick run"),
        };
        let extracted = extract.is_success();
        let extract_failed = extract.is_failure();
        stages.push(extract);

        if extract_failed && mandatory {
            machine.advance(PipelineState::Aborted)?;
            let report = RunReport::assemble(ctx, stages, machine.into_visited(), mandatory);
            error!(overall = %report.overall, "Extraction failed, run aborted");
            return Ok(report);
        }

        if extracted && !config.pipeline.settle_delay.is_zero() {
            tokio::time::sleep(config.pipeline.settle_delay).await;
        }

        machine.advance(PipelineState::Publishing)?;
        let exports = self.catalog.exports_for(tasks);
        stages.push(
            self.publisher
                .publish(&config.powerbi.report_title, &exports, data_dir)
                .await,
        );

        machine.advance(PipelineState::Notifying)?;
        let provisional =
            RunReport::assemble(ctx, stages.clone(), machine.visited().to_vec(), mandatory);
        stages.push(self.notifier.notify(&provisional).await);

        machine.advance(PipelineState::Completed)?;
        let report = RunReport::assemble(ctx, stages, machine.into_visited(), mandatory);
        info!(
            overall = %report.overall,
            artifacts = report.artifacts().count(),
            "Run finished"
        );
        Ok(report)
    }
}

#[async_trait]
impl RunTrigger for Orchestrator {
    async fn trigger(&self, request: RunRequest) -> Result<RunReport> {
        self.run_once(request).await
    }
}
