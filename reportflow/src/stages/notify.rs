//! Webhook notification stage.

use chrono::Utc;
use serde_json::{json, Value};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::ports::WebhookSender;
use crate::config::WebhookSettings;
use crate::core::{FailureRecord, RunReport, StageName, StageResult, StageStatus};
use crate::errors::DeliveryError;
use crate::pipeline::retry::{with_retry, RetryConfig};

/// Posts the run summary to the configured webhook.
pub struct WebhookNotifier {
    sender: Arc<dyn WebhookSender>,
    url: String,
    retry: RetryConfig,
}

impl std::fmt::Debug for WebhookNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookNotifier")
            .field("url", &self.url)
            .field("retry", &self.retry)
            .finish()
    }
}

impl WebhookNotifier {
    /// Creates a notifier.
    #[must_use]
    pub fn new(sender: Arc<dyn WebhookSender>, url: impl Into<String>, retry: RetryConfig) -> Self {
        Self {
            sender,
            url: url.into(),
            retry,
        }
    }

    /// Creates a notifier with exponential backoff over the configured
    /// attempts.
    #[must_use]
    pub fn from_settings(sender: Arc<dyn WebhookSender>, settings: &WebhookSettings) -> Self {
        Self::new(
            sender,
            settings.url.clone(),
            RetryConfig::exponential(
                settings.max_attempts,
                Duration::from_secs(1),
                Duration::from_secs(10),
            ),
        )
    }

    /// Delivers the summary of `report`. Only transient failures are retried.
    pub async fn notify(&self, report: &RunReport) -> StageResult {
        let started_at = Utc::now();
        let payload = build_payload(report);
        let sender = &self.sender;
        let url = self.url.as_str();
        let payload_ref = &payload;

        let outcome = with_retry(&self.retry, DeliveryError::is_transient, || async move {
            sender.deliver(url, payload_ref).await
        })
        .await;
        let attempts = outcome.attempts;

        match outcome.result {
            Ok(()) => {
                info!(run_id = %report.run_id, attempts, "Run summary delivered");
                StageResult::succeeded(StageName::Notify, started_at, Vec::new())
                    .with_data("attempts", json!(attempts))
            }
            Err(e) => {
                warn!(run_id = %report.run_id, attempts, error = %e, "Run summary not delivered");
                StageResult::failed(StageName::Notify, started_at, e.to_string())
                    .with_failures(vec![FailureRecord::new("webhook", e.to_string(), attempts)])
                    .with_data("attempts", json!(attempts))
            }
        }
    }
}

/// Builds the webhook payload: a chat-readable `text` and a structured
/// `run` object. Artifacts are referenced by path only.
#[must_use]
pub fn build_payload(report: &RunReport) -> Value {
    let stages: Vec<Value> = report
        .stages
        .iter()
        .map(|s| {
            json!({
                "stage": s.stage,
                "status": s.status,
                "error": s.error,
                "duration_ms": s.duration_ms(),
                "failures": s.failures,
                "data": s.data,
            })
        })
        .collect();
    let artifacts: Vec<Value> = report
        .artifacts()
        .map(|a| {
            json!({
                "kind": a.kind,
                "name": a.name,
                "path": a.path,
                "message": a.message,
            })
        })
        .collect();

    json!({
        "text": summary_text(report),
        "run": {
            "run_id": report.run_id,
            "mode": report.mode,
            "tasks": report.tasks,
            "overall": report.overall,
            "started_at": report.started_at,
            "stages": stages,
            "artifacts": artifacts,
        }
    })
}

/// Plain-text summary of a run.
#[must_use]
pub fn summary_text(report: &RunReport) -> String {
    let mut text = String::new();
    let _ = writeln!(
        text,
        "Report run {} ({} run, tasks: {}): {}",
        report.run_id,
        report.mode,
        report.tasks.join(", "),
        report.overall
    );

    for stage in &report.stages {
        let _ = write!(text, "- {}: {}", stage.stage, stage.status);
        if let Some(err) = &stage.error {
            if stage.status != StageStatus::Succeeded || !stage.failures.is_empty() {
                let _ = write!(text, " ({err})");
            }
        }
        text.push('\n');
        for failure in &stage.failures {
            let _ = writeln!(
                text,
                "    {} | {} | attempts: {}",
                failure.subject, failure.error, failure.attempts
            );
        }
        if let Some(queries) = stage.data.get("queries").and_then(Value::as_array) {
            write_query_table(&mut text, queries);
        }
    }

    let count = report.artifacts().count();
    if count > 0 {
        let _ = writeln!(text, "Artifacts ({count}):");
        for artifact in report.artifacts() {
            let _ = write!(text, "- {} {}", artifact.kind, artifact.path.display());
            if let Some(message) = &artifact.message {
                let _ = write!(text, ": {message}");
            }
            text.push('\n');
        }
    }
    text.trim_end().to_string()
}

/// One line per query: id, name, status, rows, attempts, Redash runtime and
/// result id.
fn write_query_table(text: &mut String, queries: &[Value]) {
    let _ = writeln!(text, "  Redash results:");
    for q in queries {
        let field = |key: &str| match q.get(key) {
            None | Some(Value::Null) => "-".to_string(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        };
        let runtime = q
            .get("redash_runtime_secs")
            .and_then(Value::as_f64)
            .map_or_else(|| "-".to_string(), |secs| format!("{secs:.2}s"));
        let _ = writeln!(
            text,
            "    {} {} | {} | rows: {} | attempts: {} | runtime: {} | result: {}",
            field("query_id"),
            field("name"),
            field("status"),
            field("rows"),
            field("attempts"),
            runtime,
            field("result_id"),
        );
    }
}
