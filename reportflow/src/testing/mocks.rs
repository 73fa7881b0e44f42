//! Fake collaborators for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};

use crate::config::{ExportKind, ExportTarget};
use crate::errors::{DeliveryError, ExtractionError, PublishError};
use crate::stages::{
    PowerBiService, QueryResult, QuerySpec, RedashSource, RefreshHandle, RefreshState,
    WebhookSender,
};

/// Holds callers until opened. Lets a test observe a run while it is in
/// flight.
#[derive(Debug, Clone)]
pub struct Gate {
    open: Arc<watch::Sender<bool>>,
    entered: Arc<Notify>,
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

impl Gate {
    /// Creates a closed gate.
    #[must_use]
    pub fn new() -> Self {
        let (open, _) = watch::channel(false);
        Self {
            open: Arc::new(open),
            entered: Arc::new(Notify::new()),
        }
    }

    /// Resolves once a caller has reached the gate.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Releases all current and future callers.
    pub fn open(&self) {
        self.open.send_replace(true);
    }

    async fn pass(&self) {
        self.entered.notify_one();
        let mut rx = self.open.subscribe();
        let _ = rx.wait_for(|open| *open).await;
    }
}

/// Scripted Redash source.
///
/// Unknown query ids answer HTTP 404.
#[derive(Debug, Default)]
pub struct FakeRedash {
    results: HashMap<u64, QueryResult>,
    errors: HashMap<u64, ExtractionError>,
    transient_failures: Mutex<HashMap<u64, usize>>,
    delay: Option<Duration>,
    gate: Option<Gate>,
    calls: Mutex<HashMap<u64, usize>>,
}

impl FakeRedash {
    /// Creates a source that knows no queries.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers `query_id` with the given rows. Each row must be a JSON
    /// object.
    #[must_use]
    pub fn with_rows(mut self, query_id: u64, columns: Vec<&str>, rows: Vec<Value>) -> Self {
        let rows = rows
            .into_iter()
            .filter_map(|row| match row {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect::<Vec<Map<String, Value>>>();
        self.results.insert(
            query_id,
            QueryResult {
                columns: columns.into_iter().map(String::from).collect(),
                rows,
                runtime_secs: Some(0.25),
                result_id: Some(query_id * 100),
            },
        );
        self
    }

    /// Answers `query_id` with an error on every attempt.
    #[must_use]
    pub fn with_error(mut self, query_id: u64, error: ExtractionError) -> Self {
        self.errors.insert(query_id, error);
        self
    }

    /// Fails the first `times` attempts of `query_id` with a network error.
    #[must_use]
    pub fn failing_first(self, query_id: u64, times: usize) -> Self {
        self.transient_failures.lock().insert(query_id, times);
        self
    }

    /// Sleeps before every answer.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Waits at `gate` before every answer.
    #[must_use]
    pub fn with_gate(mut self, gate: Gate) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Attempts made for `query_id`.
    #[must_use]
    pub fn calls(&self, query_id: u64) -> usize {
        self.calls.lock().get(&query_id).copied().unwrap_or(0)
    }

    /// Attempts made across all queries.
    #[must_use]
    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }
}

#[async_trait]
impl RedashSource for FakeRedash {
    async fn fetch(&self, query: &QuerySpec) -> Result<QueryResult, ExtractionError> {
        *self.calls.lock().entry(query.query_id).or_default() += 1;

        if let Some(gate) = &self.gate {
            gate.pass().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        {
            let mut transient = self.transient_failures.lock();
            if let Some(remaining) = transient.get_mut(&query.query_id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(ExtractionError::Network("connection reset".into()));
                }
            }
        }

        if let Some(err) = self.errors.get(&query.query_id) {
            return Err(err.clone());
        }
        self.results
            .get(&query.query_id)
            .cloned()
            .ok_or_else(|| ExtractionError::Status {
                status: 404,
                message: format!("query {} not found", query.query_id),
            })
    }
}

#[derive(Debug, Clone)]
enum RefreshScript {
    CompleteAfter(usize),
    Never,
    Fail(String),
}

/// Scripted Power BI service. Exports write small files with `std::fs`.
#[derive(Debug)]
pub struct FakePowerBi {
    script: RefreshScript,
    failing_pages: HashSet<String>,
    refreshes: Mutex<usize>,
    polls: Mutex<usize>,
    cancels: Mutex<usize>,
    exported: Mutex<Vec<String>>,
}

impl FakePowerBi {
    fn with_script(script: RefreshScript) -> Self {
        Self {
            script,
            failing_pages: HashSet::new(),
            refreshes: Mutex::new(0),
            polls: Mutex::new(0),
            cancels: Mutex::new(0),
            exported: Mutex::new(Vec::new()),
        }
    }

    /// Refresh reports in-progress for `polls` polls, then completes.
    #[must_use]
    pub fn completing_after(polls: usize) -> Self {
        Self::with_script(RefreshScript::CompleteAfter(polls))
    }

    /// Refresh never completes.
    #[must_use]
    pub fn never_completing() -> Self {
        Self::with_script(RefreshScript::Never)
    }

    /// Refresh is reported as failed on the first poll.
    #[must_use]
    pub fn failing_refresh(message: impl Into<String>) -> Self {
        Self::with_script(RefreshScript::Fail(message.into()))
    }

    /// Exporting `page` fails.
    #[must_use]
    pub fn failing_page(mut self, page: impl Into<String>) -> Self {
        self.failing_pages.insert(page.into());
        self
    }

    /// Refreshes started.
    #[must_use]
    pub fn refresh_count(&self) -> usize {
        *self.refreshes.lock()
    }

    /// Cancellations requested.
    #[must_use]
    pub fn cancel_count(&self) -> usize {
        *self.cancels.lock()
    }

    /// Pages exported successfully, in order.
    #[must_use]
    pub fn exported_pages(&self) -> Vec<String> {
        self.exported.lock().clone()
    }
}

#[async_trait]
impl PowerBiService for FakePowerBi {
    async fn start_refresh(&self, report: &str) -> Result<RefreshHandle, PublishError> {
        let mut refreshes = self.refreshes.lock();
        *refreshes += 1;
        Ok(RefreshHandle {
            report: report.to_string(),
            dataset: format!("dataset-{report}"),
            id: format!("refresh-{refreshes}"),
        })
    }

    async fn refresh_state(&self, _handle: &RefreshHandle) -> Result<RefreshState, PublishError> {
        let mut polls = self.polls.lock();
        *polls += 1;
        Ok(match &self.script {
            RefreshScript::CompleteAfter(n) if *polls > *n => RefreshState::Completed,
            RefreshScript::CompleteAfter(_) | RefreshScript::Never => RefreshState::InProgress,
            RefreshScript::Fail(message) => RefreshState::Failed(message.clone()),
        })
    }

    async fn cancel_refresh(&self, _handle: &RefreshHandle) -> Result<(), PublishError> {
        *self.cancels.lock() += 1;
        Ok(())
    }

    async fn export(
        &self,
        _report: &str,
        target: &ExportTarget,
        destination: &Path,
    ) -> Result<PathBuf, PublishError> {
        if self.failing_pages.contains(&target.page) {
            return Err(PublishError::Service(format!("page '{}' not found", target.page)));
        }
        let path = destination.join(&target.export_name);
        let body: &[u8] = match target.kind {
            ExportKind::Image => b"\x89PNG\r\n\x1a\n",
            ExportKind::Data { .. } => b"value\n1\n",
        };
        std::fs::write(&path, body).map_err(|e| PublishError::Service(e.to_string()))?;
        self.exported.lock().push(target.page.clone());
        Ok(path)
    }
}

/// Webhook that records delivered payloads.
#[derive(Debug, Default)]
pub struct RecordingWebhook {
    payloads: Mutex<Vec<Value>>,
    scripted_failures: Mutex<VecDeque<DeliveryError>>,
    permanent_failure: Option<DeliveryError>,
    calls: Mutex<usize>,
}

impl RecordingWebhook {
    /// Accepts every payload.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects every payload with `error`.
    #[must_use]
    pub fn failing_with(error: DeliveryError) -> Self {
        Self {
            permanent_failure: Some(error),
            ..Self::default()
        }
    }

    /// Rejects the next `times` payloads with `error`, then accepts.
    #[must_use]
    pub fn failing_times(times: usize, error: DeliveryError) -> Self {
        let webhook = Self::default();
        webhook
            .scripted_failures
            .lock()
            .extend(std::iter::repeat(error).take(times));
        webhook
    }

    /// Payloads that were acknowledged.
    #[must_use]
    pub fn payloads(&self) -> Vec<Value> {
        self.payloads.lock().clone()
    }

    /// Delivery attempts, including rejected ones.
    #[must_use]
    pub fn call_count(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl WebhookSender for RecordingWebhook {
    async fn deliver(&self, _url: &str, payload: &Value) -> Result<(), DeliveryError> {
        *self.calls.lock() += 1;
        if let Some(err) = &self.permanent_failure {
            return Err(err.clone());
        }
        if let Some(err) = self.scripted_failures.lock().pop_front() {
            return Err(err);
        }
        self.payloads.lock().push(payload.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_fake_redash_scripts() {
        let redash = FakeRedash::new()
            .with_rows(1, vec!["a"], vec![json!({"a": 1})])
            .failing_first(1, 1);
        let q = QuerySpec::new(1, "one", "one");

        assert!(redash.fetch(&q).await.is_err());
        assert_eq!(redash.fetch(&q).await.unwrap().rows.len(), 1);
        assert_eq!(redash.calls(1), 2);

        let missing = redash.fetch(&QuerySpec::new(9, "nine", "nine")).await.unwrap_err();
        assert!(!missing.is_retryable());
    }

    #[tokio::test]
    async fn test_recording_webhook_failures_then_success() {
        let webhook = RecordingWebhook::failing_times(1, DeliveryError::Transport("reset".into()));

        assert!(webhook.deliver("u", &json!({})).await.is_err());
        assert!(webhook.deliver("u", &json!({"text": "hi"})).await.is_ok());
        assert_eq!(webhook.call_count(), 2);
        assert_eq!(webhook.payloads(), vec![json!({"text": "hi"})]);
    }

    #[tokio::test]
    async fn test_gate_holds_until_opened() {
        let gate = Gate::new();
        let redash = Arc::new(
            FakeRedash::new()
                .with_rows(1, vec!["a"], Vec::new())
                .with_gate(gate.clone()),
        );

        let task = {
            let redash = Arc::clone(&redash);
            tokio::spawn(async move { redash.fetch(&QuerySpec::new(1, "one", "one")).await })
        };
        gate.entered().await;
        assert!(!task.is_finished());

        gate.open();
        assert!(task.await.unwrap().is_ok());
    }
}
