//! # Reportflow
//!
//! Scheduled reporting pipeline: Redash query extraction, Power BI dataset
//! refresh and page export, and a webhook run summary.
//!
//! Reportflow runs the three stages in a fixed order under a small state
//! machine:
//!
//! - **Extract**: execute the configured Redash queries concurrently and write
//!   one CSV per query
//! - **Publish**: refresh the Power BI dataset, then export report pages as
//!   images or tabular data
//! - **Notify**: post a run summary to the webhook
//!
//! A [`scheduler::Scheduler`] fires runs at daily wall-clock slots or fixed
//! intervals and refuses to start a run while another is in flight.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use reportflow::prelude::*;
//!
//! let config = Arc::new(Config::load()?);
//! let catalog = TaskCatalog::load(&config.paths.catalog)?;
//! let collaborators = http_collaborators(&config)?;
//! let orchestrator = Orchestrator::new(config, catalog, collaborators);
//!
//! let report = orchestrator.run_once(RunRequest::full(vec!["daily".into()])).await?;
//! println!("{}", report.overall);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

#[cfg(feature = "http")]
pub mod clients;
pub mod config;
pub mod core;
pub mod errors;
pub mod pipeline;
pub mod scheduler;
pub mod stages;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    #[cfg(feature = "http")]
    pub use crate::clients::{http_collaborators, PowerBiClient, RedashClient, WebhookClient};
    pub use crate::config::{Config, ExportKind, ExportTarget, TaskCatalog};
    pub use crate::core::{
        Artifact, ArtifactKind, RunMode, RunReport, RunRequest, RunStatus, StageName,
        StageResult, StageStatus,
    };
    pub use crate::errors::{
        ConfigError, DeliveryError, ExtractionError, PublishError, ReportflowError,
    };
    pub use crate::pipeline::{Collaborators, Orchestrator, PipelineState, RetryConfig};
    pub use crate::scheduler::{
        RunTrigger, ScheduleEntry, ScheduleSpec, Scheduler, SchedulerHandle, TriggerOutcome,
    };
    pub use crate::stages::{PowerBiService, QuerySpec, RedashSource, WebhookSender};
}
