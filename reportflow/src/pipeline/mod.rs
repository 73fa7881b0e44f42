//! Pipeline orchestration.
//!
//! This module provides:
//! - The orchestrator state machine
//! - The orchestrator running Extract, Publish and Notify
//! - Retry policies shared by the stages

mod orchestrator;
pub mod retry;
mod state;

pub use orchestrator::{Collaborators, Orchestrator};
pub use retry::{with_retry, Backoff, RetryConfig, RetryOutcome};
pub use state::{PipelineState, StateMachine, TransitionError};
