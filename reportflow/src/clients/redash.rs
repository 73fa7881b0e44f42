//! Redash REST client.
//!
//! A query is executed by submitting a job with `max_age: 0`, polling the
//! job until it finishes, then downloading the query result.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::debug;

use crate::config::RedashSettings;
use crate::errors::{ExtractionError, ReportflowError};
use crate::stages::{QueryResult, QuerySpec, RedashSource};

/// Redash job status codes.
mod job_status {
    pub const QUEUED: u64 = 1;
    pub const STARTED: u64 = 2;
    pub const SUCCESS: u64 = 3;
    pub const FAILURE: u64 = 4;
    pub const CANCELLED: u64 = 5;
}

/// Answer to a job submission.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Submission {
    /// A job was queued.
    Job(String),
    /// Redash answered from a fresh result directly.
    Ready(QueryResult),
}

/// Observed job state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum JobState {
    Pending,
    Done(u64),
    Failed(String),
}

/// [`RedashSource`] over HTTP.
#[derive(Debug, Clone)]
pub struct RedashClient {
    domain: String,
    client: reqwest::Client,
    poll_interval: Duration,
}

impl RedashClient {
    /// Creates a client for the configured domain.
    pub fn new(settings: &RedashSettings) -> Result<Self, ReportflowError> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| ReportflowError::Client(e.to_string()))?;
        Ok(Self {
            domain: settings.domain.clone(),
            client,
            poll_interval: settings.poll_interval,
        })
    }

    async fn get_json(&self, url: &str, key: &str) -> Result<(StatusCode, Value), ExtractionError> {
        let response = self
            .client
            .get(url)
            .header("Authorization", format!("Key {key}"))
            .send()
            .await
            .map_err(network)?;
        read_json(response).await
    }
}

#[async_trait]
impl RedashSource for RedashClient {
    async fn fetch(&self, query: &QuerySpec) -> Result<QueryResult, ExtractionError> {
        let key = query
            .api_key
            .as_ref()
            .ok_or_else(|| ExtractionError::Status {
                status: 401,
                message: "no API key configured".into(),
            })?
            .expose();

        let submit_url = format!("{}/api/queries/{}/results", self.domain, query.query_id);
        let payload = json!({
            "id": query.query_id,
            "apply_auto_limit": false,
            "max_age": 0,
            "parameters": query.params,
        });
        let response = self
            .client
            .post(&submit_url)
            .header("Authorization", format!("Key {key}"))
            .json(&payload)
            .send()
            .await
            .map_err(network)?;
        let (status, body) = read_json(response).await?;

        let job_id = match parse_submission(status.as_u16(), &body)? {
            Submission::Ready(result) => return Ok(result),
            Submission::Job(id) => id,
        };
        debug!(query_id = query.query_id, job_id = %job_id, "Query job submitted");

        let job_url = format!("{}/api/jobs/{job_id}", self.domain);
        let result_id = loop {
            let (status, body) = self.get_json(&job_url, key).await?;
            ensure_success(status, &body)?;
            match parse_job(&body)? {
                JobState::Done(id) => break id,
                JobState::Failed(message) => return Err(ExtractionError::JobFailed(message)),
                JobState::Pending => tokio::time::sleep(self.poll_interval).await,
            }
        };

        let result_url = format!("{}/api/query_results/{result_id}", self.domain);
        let (status, body) = self.get_json(&result_url, key).await?;
        ensure_success(status, &body)?;
        parse_query_result(&body)
    }
}

fn network(err: reqwest::Error) -> ExtractionError {
    ExtractionError::Network(err.to_string())
}

async fn read_json(response: reqwest::Response) -> Result<(StatusCode, Value), ExtractionError> {
    let status = response.status();
    let text = response.text().await.map_err(network)?;
    match serde_json::from_str(&text) {
        Ok(body) => Ok((status, body)),
        Err(_) if !status.is_success() => Err(ExtractionError::Status {
            status: status.as_u16(),
            message: text.chars().take(200).collect(),
        }),
        Err(e) => Err(ExtractionError::Malformed(e.to_string())),
    }
}

fn ensure_success(status: StatusCode, body: &Value) -> Result<(), ExtractionError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(ExtractionError::Status {
            status: status.as_u16(),
            message: error_message(body),
        })
    }
}

/// Best human-readable message in an error body.
pub(crate) fn error_message(body: &Value) -> String {
    body.pointer("/job/error")
        .or_else(|| body.get("message"))
        .and_then(Value::as_str)
        .map_or_else(|| body.to_string(), str::to_string)
}

pub(crate) fn parse_submission(status: u16, body: &Value) -> Result<Submission, ExtractionError> {
    if !(200..300).contains(&status) {
        return Err(ExtractionError::Status {
            status,
            message: error_message(body),
        });
    }
    if body.get("query_result").is_some() {
        return parse_query_result(body).map(Submission::Ready);
    }
    let job = body
        .get("job")
        .ok_or_else(|| ExtractionError::Malformed("response has neither job nor query_result".into()))?;
    match job.get("id") {
        Some(Value::String(id)) if !id.is_empty() => Ok(Submission::Job(id.clone())),
        Some(Value::Number(id)) => Ok(Submission::Job(id.to_string())),
        _ => Err(ExtractionError::JobFailed(error_message(body))),
    }
}

pub(crate) fn parse_job(body: &Value) -> Result<JobState, ExtractionError> {
    let status = body
        .pointer("/job/status")
        .and_then(Value::as_u64)
        .ok_or_else(|| ExtractionError::Malformed("job status missing".into()))?;
    match status {
        job_status::QUEUED | job_status::STARTED => Ok(JobState::Pending),
        job_status::SUCCESS => body
            .pointer("/job/query_result_id")
            .and_then(Value::as_u64)
            .map(JobState::Done)
            .ok_or_else(|| ExtractionError::Malformed("finished job has no query_result_id".into())),
        job_status::FAILURE | job_status::CANCELLED => Ok(JobState::Failed(error_message(body))),
        other => Err(ExtractionError::Malformed(format!("unknown job status {other}"))),
    }
}

pub(crate) fn parse_query_result(body: &Value) -> Result<QueryResult, ExtractionError> {
    let result = body
        .get("query_result")
        .ok_or_else(|| ExtractionError::Malformed("query_result missing".into()))?;
    let data = result
        .get("data")
        .ok_or_else(|| ExtractionError::Malformed("query_result.data missing".into()))?;

    let columns = data
        .get("columns")
        .and_then(Value::as_array)
        .map(|cols| {
            cols.iter()
                .filter_map(|c| c.get("name").and_then(Value::as_str).map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    let rows = data
        .get("rows")
        .and_then(Value::as_array)
        .ok_or_else(|| ExtractionError::Malformed("query_result.data.rows missing".into()))?
        .iter()
        .map(|row| {
            row.as_object()
                .cloned()
                .ok_or_else(|| ExtractionError::Malformed("row is not an object".into()))
        })
        .collect::<Result<Vec<Map<String, Value>>, _>>()?;

    Ok(QueryResult {
        columns,
        rows,
        runtime_secs: result.get("runtime").and_then(Value::as_f64),
        result_id: result.get("id").and_then(Value::as_u64),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_submission_job() {
        let body = json!({"job": {"id": "4f1c", "status": 1}});
        assert_eq!(parse_submission(200, &body).unwrap(), Submission::Job("4f1c".into()));
    }

    #[test]
    fn test_parse_submission_errors() {
        let body = json!({"message": "Invalid API key"});
        let err = parse_submission(403, &body).unwrap_err();
        assert_eq!(
            err,
            ExtractionError::Status { status: 403, message: "Invalid API key".into() }
        );
        assert!(!err.is_retryable());

        let body = json!({"job": {"error": "Query parameter wh_id missing"}});
        assert_eq!(
            parse_submission(200, &body).unwrap_err(),
            ExtractionError::JobFailed("Query parameter wh_id missing".into())
        );
    }

    #[test]
    fn test_parse_job_states() {
        assert_eq!(parse_job(&json!({"job": {"status": 2}})).unwrap(), JobState::Pending);
        assert_eq!(
            parse_job(&json!({"job": {"status": 3, "query_result_id": 991}})).unwrap(),
            JobState::Done(991)
        );
        assert_eq!(
            parse_job(&json!({"job": {"status": 4, "error": "timeout"}})).unwrap(),
            JobState::Failed("timeout".into())
        );
        assert!(parse_job(&json!({"job": {}})).is_err());
    }

    #[test]
    fn test_parse_query_result() {
        let body = json!({
            "query_result": {
                "id": 991,
                "runtime": 1.5,
                "data": {
                    "columns": [{"name": "wh_hub_id"}, {"name": "orders"}],
                    "rows": [{"wh_hub_id": 7, "orders": 12}]
                }
            }
        });

        let result = parse_query_result(&body).unwrap();

        assert_eq!(result.columns, vec!["wh_hub_id", "orders"]);
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.result_id, Some(991));
        assert_eq!(result.runtime_secs, Some(1.5));
    }

    #[test]
    fn test_parse_query_result_rejects_missing_rows() {
        let body = json!({"query_result": {"data": {"columns": []}}});
        assert!(matches!(parse_query_result(&body), Err(ExtractionError::Malformed(_))));
    }
}
