//! Core domain model types for reportflow.
//!
//! This module contains the types passed between the stages and the
//! orchestrator:
//! - Stage, stage status and run status enums
//! - Artifact references
//! - Stage results, run context and run report

mod artifact;
mod report;
mod result;
mod status;

pub use artifact::{Artifact, ArtifactKind};
pub use report::{RunContext, RunMode, RunReport, RunRequest};
pub use result::{FailureRecord, StageResult};
pub use status::{RunStatus, StageName, StageStatus};
