//! Redash extraction stage.

use chrono::{Local, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::ports::{QueryResult, QuerySpec, RedashSource};
use crate::config::RedashSettings;
use crate::core::{Artifact, ArtifactKind, FailureRecord, StageName, StageResult};
use crate::errors::ExtractionError;
use crate::pipeline::retry::{with_retry, RetryConfig};
use crate::utils::{header_of, placeholder_row, run_stamp, to_csv};

/// Outcome of one query, reported in the stage data under `"queries"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryOutcome {
    /// Redash query id.
    pub query_id: u64,
    /// Query name.
    pub name: String,
    /// `"succeeded"` or `"failed"`.
    pub status: String,
    /// Rows written (0 for placeholder files).
    pub rows: usize,
    /// Attempts made.
    pub attempts: usize,
    /// Wall time including retries, in seconds.
    pub elapsed_secs: f64,
    /// Execution time reported by Redash.
    pub redash_runtime_secs: Option<f64>,
    /// Redash result id.
    pub result_id: Option<u64>,
    /// Last error, if the query failed.
    pub error: Option<String>,
}

enum Extracted {
    Written {
        artifact: Artifact,
        outcome: QueryOutcome,
    },
    Failed {
        failure: FailureRecord,
        outcome: QueryOutcome,
    },
}

/// Runs Redash queries and writes each result as CSV.
pub struct RedashExtractor {
    source: Arc<dyn RedashSource>,
    retry: RetryConfig,
    timeout: Duration,
}

impl std::fmt::Debug for RedashExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedashExtractor")
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RedashExtractor {
    /// Creates an extractor.
    #[must_use]
    pub fn new(source: Arc<dyn RedashSource>, retry: RetryConfig, timeout: Duration) -> Self {
        Self {
            source,
            retry,
            timeout,
        }
    }

    /// Creates an extractor with the configured constant-delay policy.
    #[must_use]
    pub fn from_settings(source: Arc<dyn RedashSource>, settings: &RedashSettings) -> Self {
        Self::new(
            source,
            RetryConfig::constant(settings.max_attempts, Duration::from_secs(1)),
            settings.timeout,
        )
    }

    /// Runs all queries concurrently and writes their results into
    /// `destination`.
    ///
    /// The stage fails only when no query succeeded.
    pub async fn extract(&self, queries: &[QuerySpec], destination: &Path) -> StageResult {
        let started_at = Utc::now();

        if queries.is_empty() {
            warn!(stage = %StageName::Extract, "No queries selected");
            return StageResult::failed(StageName::Extract, started_at, "no queries selected");
        }

        let run_time = run_stamp(&Local::now());
        let results = join_all(
            queries
                .iter()
                .map(|q| self.extract_one(q, destination, &run_time)),
        )
        .await;

        let mut artifacts = Vec::new();
        let mut failures = Vec::new();
        let mut outcomes = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Extracted::Written { artifact, outcome } => {
                    artifacts.push(artifact);
                    outcomes.push(outcome);
                }
                Extracted::Failed { failure, outcome } => {
                    failures.push(failure);
                    outcomes.push(outcome);
                }
            }
        }

        let table = serde_json::to_value(&outcomes).unwrap_or_default();
        info!(
            stage = %StageName::Extract,
            succeeded = artifacts.len(),
            failed = failures.len(),
            "Extraction finished"
        );

        if artifacts.is_empty() {
            let detail = format!("all {} queries failed", failures.len());
            return StageResult::failed(StageName::Extract, started_at, detail)
                .with_failures(failures)
                .with_data("queries", table);
        }

        let mut result = StageResult::succeeded(StageName::Extract, started_at, artifacts)
            .with_data("queries", table);
        if !failures.is_empty() {
            let names: Vec<_> = failures.iter().map(|f| f.subject.as_str()).collect();
            result = result.with_error(format!("failed queries: {}", names.join(", ")));
        }
        result.with_failures(failures)
    }

    async fn extract_one(&self, query: &QuerySpec, destination: &Path, run_time: &str) -> Extracted {
        let clock = Instant::now();
        let source = &self.source;
        let timeout = self.timeout;

        let fetched = with_retry(&self.retry, ExtractionError::is_retryable, || async move {
            match tokio::time::timeout(timeout, source.fetch(query)).await {
                Ok(result) => result,
                Err(_) => Err(ExtractionError::Timeout(timeout)),
            }
        })
        .await;
        let attempts = fetched.attempts;

        let mut outcome = QueryOutcome {
            query_id: query.query_id,
            name: query.name.clone(),
            status: "failed".to_string(),
            rows: 0,
            attempts,
            elapsed_secs: 0.0,
            redash_runtime_secs: None,
            result_id: None,
            error: None,
        };

        let written = match fetched.result {
            Ok(result) => {
                outcome.redash_runtime_secs = result.runtime_secs;
                outcome.result_id = result.result_id;
                outcome.rows = result.rows.len();
                write_result(query, result, destination, run_time).await
            }
            Err(e) => Err(e),
        };
        outcome.elapsed_secs = clock.elapsed().as_secs_f64();

        match written {
            Ok(artifact) => {
                info!(
                    query_id = query.query_id,
                    rows = outcome.rows,
                    attempts,
                    path = %artifact.path.display(),
                    "Query extracted"
                );
                outcome.status = "succeeded".to_string();
                Extracted::Written { artifact, outcome }
            }
            Err(e) => {
                warn!(query_id = query.query_id, attempts, error = %e, "Query failed");
                outcome.error = Some(e.to_string());
                Extracted::Failed {
                    failure: FailureRecord::new(query.to_string(), e.to_string(), attempts),
                    outcome,
                }
            }
        }
    }
}

async fn write_result(
    query: &QuerySpec,
    result: QueryResult,
    destination: &Path,
    run_time: &str,
) -> Result<Artifact, ExtractionError> {
    let mut columns = header_of(&result.columns, &result.rows);
    let rows = if result.rows.is_empty() {
        vec![placeholder_row(&mut columns, &query.params, run_time)]
    } else {
        result.rows
    };

    let path = destination.join(query.file_name());
    let body = to_csv(&columns, &rows);
    tokio::fs::write(&path, body.as_bytes())
        .await
        .map_err(|e| ExtractionError::Write {
            path: path.clone(),
            message: e.to_string(),
        })?;

    Ok(Artifact::new(ArtifactKind::Extract, query.save_name.clone(), path)
        .with_bytes(body.len() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageStatus;
    use crate::testing::FakeRedash;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn extractor(source: Arc<FakeRedash>) -> RedashExtractor {
        RedashExtractor::new(source, RetryConfig::constant(3, Duration::ZERO), Duration::from_secs(5))
    }

    fn orders() -> QuerySpec {
        QuerySpec::new(1, "orders", "orders").with_param("wh_id", "7")
    }

    #[tokio::test]
    async fn test_partial_failure_still_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(
            FakeRedash::new()
                .with_rows(1, vec!["id", "qty"], vec![json!({"id": 1, "qty": 3})])
                .with_error(2, ExtractionError::Malformed("no job".into())),
        );
        let queries = vec![orders(), QuerySpec::new(2, "stock", "stock")];

        let result = extractor(source).extract(&queries, dir.path()).await;

        assert_eq!(result.status, StageStatus::Succeeded);
        assert_eq!(result.artifacts.len(), 1);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].subject, "query 2 (stock)");
        assert_eq!(result.failures[0].attempts, 1);
        assert!(result.error.unwrap().contains("query 2 (stock)"));

        let csv = std::fs::read_to_string(dir.path().join("orders.csv")).unwrap();
        assert_eq!(csv, "id,qty\n1,3\n");
    }

    #[tokio::test]
    async fn test_all_failed_fails_stage() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(
            FakeRedash::new().with_error(1, ExtractionError::Network("refused".into())),
        );

        let result = extractor(source.clone()).extract(&[orders()], dir.path()).await;

        assert_eq!(result.status, StageStatus::Failed);
        assert!(result.artifacts.is_empty());
        assert_eq!(result.failures[0].attempts, 3);
        assert_eq!(source.calls(1), 3);
        assert_eq!(result.data["queries"][0]["status"], json!("failed"));
    }

    #[tokio::test]
    async fn test_empty_query_list_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = extractor(Arc::new(FakeRedash::new())).extract(&[], dir.path()).await;
        assert_eq!(result.status, StageStatus::Failed);
    }

    #[tokio::test]
    async fn test_transient_error_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(
            FakeRedash::new()
                .with_rows(1, vec!["id"], vec![json!({"id": 1})])
                .failing_first(1, 2),
        );

        let result = extractor(source.clone()).extract(&[orders()], dir.path()).await;

        assert_eq!(result.status, StageStatus::Succeeded);
        assert_eq!(source.calls(1), 3);
        assert_eq!(result.data["queries"][0]["attempts"], json!(3));
    }

    #[tokio::test]
    async fn test_empty_result_writes_placeholder_row() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeRedash::new().with_rows(1, vec!["wh_hub_id", "qty"], Vec::new()));

        let result = extractor(source).extract(&[orders()], dir.path()).await;
        assert!(result.is_success());

        let csv = std::fs::read_to_string(dir.path().join("orders.csv")).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("wh_hub_id,qty,datetime_run"));
        assert!(lines.next().unwrap().starts_with("7,,"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_query_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(
            FakeRedash::new()
                .with_rows(1, vec!["id"], Vec::new())
                .with_delay(Duration::from_secs(120)),
        );
        let extractor = RedashExtractor::new(
            source,
            RetryConfig::constant(2, Duration::ZERO),
            Duration::from_secs(1),
        );

        let result = extractor.extract(&[orders()], dir.path()).await;

        assert_eq!(result.status, StageStatus::Failed);
        assert!(result.failures[0].error.contains("timed out"));
        assert_eq!(result.failures[0].attempts, 2);
    }
}
