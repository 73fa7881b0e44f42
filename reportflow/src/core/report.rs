//! Run identity and the aggregate run report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use super::{Artifact, RunStatus, StageName, StageResult};
use crate::config::Config;
use crate::pipeline::PipelineState;

/// Which stages a run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Extract, publish and notify.
    #[default]
    Full,
    /// Skip extraction; refresh and export from whatever data is in place.
    Quick,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Quick => write!(f, "quick"),
        }
    }
}

/// What a trigger asks the pipeline to do.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunRequest {
    /// Catalog tasks selected for this run.
    pub tasks: Vec<String>,
    /// Stages to run.
    pub mode: RunMode,
}

impl RunRequest {
    /// Creates a full run for the given tasks.
    #[must_use]
    pub fn full(tasks: Vec<String>) -> Self {
        Self {
            tasks,
            mode: RunMode::Full,
        }
    }

    /// Creates a quick run for the given tasks.
    #[must_use]
    pub fn quick(tasks: Vec<String>) -> Self {
        Self {
            tasks,
            mode: RunMode::Quick,
        }
    }
}

/// Identifies one pipeline execution. Immutable once created.
#[derive(Debug, Clone)]
pub struct RunContext {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    config: Arc<Config>,
    request: RunRequest,
}

impl RunContext {
    /// Creates a context with a fresh run id.
    #[must_use]
    pub fn new(config: Arc<Config>, request: RunRequest) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            config,
            request,
        }
    }

    /// The run id.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// When the run started.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// The configuration snapshot the run was launched with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The trigger's request.
    #[must_use]
    pub fn request(&self) -> &RunRequest {
        &self.request
    }
}

/// Aggregate outcome of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// The run id.
    pub run_id: Uuid,
    /// Stages requested.
    pub mode: RunMode,
    /// Tasks the run covered.
    pub tasks: Vec<String>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the report was assembled.
    pub finished_at: DateTime<Utc>,
    /// Stage results in execution order.
    pub stages: Vec<StageResult>,
    /// Orchestrator states visited, starting with `Idle`.
    pub states: Vec<PipelineState>,
    /// Overall status.
    pub overall: RunStatus,
}

impl RunReport {
    /// Assembles a report, deriving the overall status.
    #[must_use]
    pub fn assemble(
        ctx: &RunContext,
        stages: Vec<StageResult>,
        states: Vec<PipelineState>,
        extraction_mandatory: bool,
    ) -> Self {
        let mandatory_failed = extraction_mandatory
            && stages
                .iter()
                .any(|s| s.stage.is_mandatory() && s.is_failure());
        let statuses: Vec<_> = stages.iter().map(|s| s.status).collect();

        Self {
            run_id: ctx.run_id(),
            mode: ctx.request().mode,
            tasks: ctx.request().tasks.clone(),
            started_at: ctx.started_at(),
            finished_at: Utc::now(),
            overall: RunStatus::derive(&statuses, mandatory_failed),
            stages,
            states,
        }
    }

    /// The last state the orchestrator reached.
    #[must_use]
    pub fn final_state(&self) -> PipelineState {
        self.states.last().copied().unwrap_or(PipelineState::Idle)
    }

    /// Returns true if the run was aborted after a mandatory failure.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.final_state() == PipelineState::Aborted
    }

    /// Looks up a stage result.
    #[must_use]
    pub fn stage(&self, name: StageName) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.stage == name)
    }

    /// All artifacts produced by the run, in stage order.
    pub fn artifacts(&self) -> impl Iterator<Item = &Artifact> {
        self.stages.iter().flat_map(|s| s.artifacts.iter())
    }

    /// Returns true if the run fully succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.overall == RunStatus::Succeeded && !self.is_aborted()
    }
}
