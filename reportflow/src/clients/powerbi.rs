//! Power BI REST client.
//!
//! The report is looked up by title in the configured workspace once and
//! cached. Page images go through the asynchronous `ExportTo` API; data
//! pages run their DAX query through `executeQueries` and are written as
//! CSV.

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Method, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::config::{ExportKind, ExportTarget, PowerBiApi, PowerBiSettings};
use crate::errors::{PublishError, ReportflowError};
use crate::stages::{PowerBiService, RefreshHandle, RefreshState};
use crate::utils::{header_of, to_csv};

/// A report and the dataset behind it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub(crate) struct ReportRef {
    pub id: String,
    pub name: String,
    #[serde(rename = "datasetId")]
    pub dataset_id: String,
}

#[derive(Debug, Deserialize)]
struct Listing<T> {
    value: Vec<T>,
}

/// Refresh history entries read when looking for a request.
const HISTORY_DEPTH: usize = 10;

/// [`PowerBiService`] over the Power BI REST API.
#[derive(Debug)]
pub struct PowerBiClient {
    api: PowerBiApi,
    client: reqwest::Client,
    poll_interval: Duration,
    report: Mutex<Option<ReportRef>>,
}

impl PowerBiClient {
    /// Creates a client for the configured workspace.
    pub fn new(api: PowerBiApi, settings: &PowerBiSettings) -> Result<Self, ReportflowError> {
        let client = reqwest::Client::builder()
            .timeout(settings.export_timeout)
            .build()
            .map_err(|e| ReportflowError::Client(e.to_string()))?;
        Ok(Self {
            api,
            client,
            poll_interval: settings.refresh_poll,
            report: Mutex::new(None),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/groups/{}{path}", self.api.base_url, self.api.workspace_id);
        self.client
            .request(method, url)
            .bearer_auth(self.api.access_token.expose())
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, PublishError> {
        let response = request
            .send()
            .await
            .map_err(|e| PublishError::Service(e.to_string()))?;
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(PublishError::Service(format!(
            "HTTP {}: {}",
            status.as_u16(),
            body.chars().take(300).collect::<String>()
        )))
    }

    async fn send_json(&self, request: RequestBuilder) -> Result<Value, PublishError> {
        self.send(request)
            .await?
            .json()
            .await
            .map_err(|e| PublishError::Service(format!("unreadable response: {e}")))
    }

    async fn resolve(&self, title: &str) -> Result<ReportRef, PublishError> {
        if let Some(found) = self.report.lock().clone().filter(|r| r.name == title) {
            return Ok(found);
        }
        let body = self.send_json(self.request(Method::GET, "/reports")).await?;
        let found = find_report(&body, title)?;
        *self.report.lock() = Some(found.clone());
        Ok(found)
    }

    async fn refresh_history(&self, dataset_id: &str) -> Result<Value, PublishError> {
        let path = format!("/datasets/{dataset_id}/refreshes?$top={HISTORY_DEPTH}");
        self.send_json(self.request(Method::GET, &path)).await
    }

    async fn export_image(
        &self,
        report: &ReportRef,
        target: &ExportTarget,
        path: &Path,
    ) -> Result<(), PublishError> {
        let body = json!({
            "format": "PNG",
            "powerBIReportConfiguration": { "pages": [{ "pageName": target.page }] }
        });
        let started = self
            .send_json(
                self.request(Method::POST, &format!("/reports/{}/ExportTo", report.id))
                    .json(&body),
            )
            .await?;
        let export_id = started
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| PublishError::Service("export response has no id".into()))?
            .to_string();

        let status_path = format!("/reports/{}/exports/{export_id}", report.id);
        loop {
            let status = self
                .send_json(self.request(Method::GET, &status_path))
                .await?;
            match export_status(&status)? {
                true => break,
                false => tokio::time::sleep(self.poll_interval).await,
            }
        }

        let bytes = self
            .send(self.request(Method::GET, &format!("{status_path}/file")))
            .await?
            .bytes()
            .await
            .map_err(|e| PublishError::Service(e.to_string()))?;
        write_file(path, &bytes).await
    }

    async fn export_data(
        &self,
        report: &ReportRef,
        dax: &str,
        path: &Path,
    ) -> Result<(), PublishError> {
        let body = json!({
            "queries": [{ "query": dax }],
            "serializerSettings": { "includeNulls": true }
        });
        let answer = self
            .send_json(
                self.request(
                    Method::POST,
                    &format!("/datasets/{}/executeQueries", report.dataset_id),
                )
                .json(&body),
            )
            .await?;
        let rows = dax_rows(&answer)?;
        let columns = header_of(&[], &rows);
        write_file(path, to_csv(&columns, &rows).as_bytes()).await
    }
}

#[async_trait]
impl PowerBiService for PowerBiClient {
    async fn start_refresh(&self, report: &str) -> Result<RefreshHandle, PublishError> {
        let found = self.resolve(report).await?;
        let path = format!("/datasets/{}/refreshes", found.dataset_id);
        let response = self
            .send(
                self.request(Method::POST, &path)
                    .json(&json!({ "notifyOption": "NoNotification" })),
            )
            .await?;

        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let id = refresh_request_id(header("RequestId").as_deref(), header("Location").as_deref())
            .ok_or_else(|| {
                PublishError::Service("refresh accepted without a request id".into())
            })?;
        debug!(report, dataset_id = %found.dataset_id, request_id = %id, "Dataset refresh requested");

        Ok(RefreshHandle {
            report: report.to_string(),
            dataset: found.dataset_id,
            id,
        })
    }

    async fn refresh_state(&self, handle: &RefreshHandle) -> Result<RefreshState, PublishError> {
        let history = self.refresh_history(&handle.dataset).await?;
        Ok(refresh_state_for(&history, &handle.id))
    }

    async fn cancel_refresh(&self, handle: &RefreshHandle) -> Result<(), PublishError> {
        let path = format!("/datasets/{}/refreshes/{}", handle.dataset, handle.id);
        self.send(self.request(Method::DELETE, &path)).await?;
        Ok(())
    }

    async fn export(
        &self,
        report: &str,
        target: &ExportTarget,
        destination: &Path,
    ) -> Result<PathBuf, PublishError> {
        let found = self.resolve(report).await?;
        let path = destination.join(&target.export_name);
        match &target.kind {
            ExportKind::Image => self.export_image(&found, target, &path).await?,
            ExportKind::Data { dax } => self.export_data(&found, dax, &path).await?,
        }
        Ok(path)
    }
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<(), PublishError> {
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| PublishError::Service(format!("cannot write {}: {e}", path.display())))
}

pub(crate) fn find_report(listing: &Value, title: &str) -> Result<ReportRef, PublishError> {
    let listing: Listing<ReportRef> = serde_json::from_value(listing.clone())
        .map_err(|e| PublishError::Service(format!("unreadable report listing: {e}")))?;
    listing
        .value
        .into_iter()
        .find(|r| r.name == title)
        .ok_or_else(|| PublishError::Service(format!("report '{title}' not found in workspace")))
}

/// Request id of an accepted refresh: the `RequestId` header, or the last
/// path segment of `Location`.
pub(crate) fn refresh_request_id(request_id: Option<&str>, location: Option<&str>) -> Option<String> {
    request_id
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .or_else(|| {
            location
                .and_then(|url| url.trim_end_matches('/').rsplit('/').next())
                .filter(|id| !id.is_empty() && !id.eq_ignore_ascii_case("refreshes"))
                .map(str::to_string)
        })
}

/// State of refresh `request_id` in a refresh history listing. A request
/// not listed yet is still starting.
pub(crate) fn refresh_state_for(history: &Value, request_id: &str) -> RefreshState {
    history
        .get("value")
        .and_then(Value::as_array)
        .and_then(|entries| {
            entries
                .iter()
                .find(|e| e.get("requestId").and_then(Value::as_str) == Some(request_id))
        })
        .map_or(RefreshState::InProgress, refresh_state_of)
}

pub(crate) fn refresh_state_of(entry: &Value) -> RefreshState {
    match entry.get("status").and_then(Value::as_str) {
        Some("Completed") => RefreshState::Completed,
        Some(status @ ("Failed" | "Cancelled" | "Disabled")) => {
            let detail = entry
                .get("serviceExceptionJson")
                .and_then(Value::as_str)
                .unwrap_or(status);
            RefreshState::Failed(detail.to_string())
        }
        _ => RefreshState::InProgress,
    }
}

/// Returns `Ok(true)` once the export file is ready.
pub(crate) fn export_status(body: &Value) -> Result<bool, PublishError> {
    match body.get("status").and_then(Value::as_str) {
        Some("Succeeded") => Ok(true),
        Some("Failed") => Err(PublishError::Service(format!(
            "export failed: {}",
            body.pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("no detail")
        ))),
        _ => Ok(false),
    }
}

pub(crate) fn dax_rows(answer: &Value) -> Result<Vec<Map<String, Value>>, PublishError> {
    if let Some(err) = answer.pointer("/results/0/error") {
        return Err(PublishError::Service(format!("DAX query failed: {err}")));
    }
    answer
        .pointer("/results/0/tables/0/rows")
        .and_then(Value::as_array)
        .ok_or_else(|| PublishError::Service("executeQueries answer has no rows".into()))?
        .iter()
        .map(|row| {
            row.as_object()
                .cloned()
                .ok_or_else(|| PublishError::Service("DAX row is not an object".into()))
        })
        .collect()
}
