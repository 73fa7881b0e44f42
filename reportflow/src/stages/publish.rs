//! Power BI refresh-and-export stage.

use chrono::Utc;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::ports::{PowerBiService, RefreshHandle, RefreshState};
use crate::config::{ExportKind, ExportTarget, PowerBiSettings};
use crate::core::{Artifact, ArtifactKind, FailureRecord, StageName, StageResult};
use crate::errors::PublishError;

/// Refreshes the report, then exports the configured pages.
pub struct PowerBiPublisher {
    service: Arc<dyn PowerBiService>,
    refresh_timeout: Duration,
    refresh_poll: Duration,
    export_timeout: Duration,
}

impl std::fmt::Debug for PowerBiPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PowerBiPublisher")
            .field("refresh_timeout", &self.refresh_timeout)
            .field("refresh_poll", &self.refresh_poll)
            .field("export_timeout", &self.export_timeout)
            .finish()
    }
}

impl PowerBiPublisher {
    /// Creates a publisher with the configured limits.
    #[must_use]
    pub fn from_settings(service: Arc<dyn PowerBiService>, settings: &PowerBiSettings) -> Self {
        Self {
            service,
            refresh_timeout: settings.refresh_timeout,
            refresh_poll: settings.refresh_poll,
            export_timeout: settings.export_timeout,
        }
    }

    /// Overrides the refresh limit and polling interval.
    #[must_use]
    pub fn with_refresh_limits(mut self, timeout: Duration, poll: Duration) -> Self {
        self.refresh_timeout = timeout;
        self.refresh_poll = poll;
        self
    }

    /// Refreshes `report` and exports every target into `destination`.
    ///
    /// A refresh that times out or fails ends the stage before any export.
    pub async fn publish(
        &self,
        report: &str,
        exports: &[ExportTarget],
        destination: &Path,
    ) -> StageResult {
        let started_at = Utc::now();

        if let Err(e) = self.refresh(report).await {
            warn!(stage = %StageName::Publish, report, error = %e, "Refresh did not complete");
            return StageResult::failed(StageName::Publish, started_at, e.to_string())
                .with_failures(vec![FailureRecord::new("refresh", e.to_string(), 1)])
                .with_data("refresh", json!(refresh_label(&e)));
        }
        info!(stage = %StageName::Publish, report, "Refresh completed");

        let mut artifacts = Vec::new();
        let mut failures = Vec::new();
        for target in exports {
            match self.export(report, target, destination).await {
                Ok(artifact) => {
                    info!(page = %target.page, path = %artifact.path.display(), "Page exported");
                    artifacts.push(artifact);
                }
                Err(e) => {
                    warn!(page = %target.page, error = %e, "Page export failed");
                    failures.push(FailureRecord::new(target.page.clone(), e.to_string(), 1));
                }
            }
        }

        if failures.is_empty() {
            return StageResult::succeeded(StageName::Publish, started_at, artifacts)
                .with_data("refresh", json!("completed"));
        }

        let err = PublishError::Export {
            failed: failures
                .iter()
                .map(|f| format!("{}: {}", f.subject, f.error))
                .collect(),
        };
        StageResult::failed(StageName::Publish, started_at, err.to_string())
            .with_artifacts(artifacts)
            .with_failures(failures)
            .with_data("refresh", json!("completed"))
    }

    async fn refresh(&self, report: &str) -> Result<(), PublishError> {
        let handle = self.service.start_refresh(report).await?;
        debug!(report, dataset = %handle.dataset, refresh_id = %handle.id, "Refresh started");

        match tokio::time::timeout(self.refresh_timeout, self.wait_for_refresh(&handle)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                if let Err(e) = self.service.cancel_refresh(&handle).await {
                    warn!(report, error = %e, "Cancelling timed out refresh failed");
                }
                Err(PublishError::RefreshTimeout {
                    report: report.to_string(),
                    timeout: self.refresh_timeout,
                })
            }
        }
    }

    async fn wait_for_refresh(&self, handle: &RefreshHandle) -> Result<(), PublishError> {
        loop {
            match self.service.refresh_state(handle).await? {
                RefreshState::Completed => return Ok(()),
                RefreshState::Failed(message) => {
                    return Err(PublishError::RefreshFailed {
                        report: handle.report.clone(),
                        message,
                    })
                }
                RefreshState::InProgress => tokio::time::sleep(self.refresh_poll).await,
            }
        }
    }

    async fn export(
        &self,
        report: &str,
        target: &ExportTarget,
        destination: &Path,
    ) -> Result<Artifact, PublishError> {
        let path = tokio::time::timeout(
            self.export_timeout,
            self.service.export(report, target, destination),
        )
        .await
        .map_err(|_| PublishError::Service(format!("export timed out after {:?}", self.export_timeout)))??;

        let kind = match target.kind {
            ExportKind::Image => ArtifactKind::Image,
            ExportKind::Data { .. } => ArtifactKind::Data,
        };
        let artifact =
            Artifact::new(kind, target.page.clone(), path).with_message(target.message.clone());
        Ok(match tokio::fs::metadata(artifact.path()).await {
            Ok(meta) => artifact.with_bytes(meta.len()),
            Err(_) => artifact,
        })
    }
}

fn refresh_label(err: &PublishError) -> &'static str {
    match err {
        PublishError::RefreshTimeout { .. } => "timed_out",
        _ => "failed",
    }
}
