//! Collaborator ports.
//!
//! Stages talk to Redash, Power BI and the webhook only through these
//! traits. The HTTP clients in [`crate::clients`] implement them for
//! production; [`crate::testing`] provides fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::{ExportTarget, Secret};
use crate::errors::{DeliveryError, ExtractionError, PublishError};

/// One Redash query to run.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySpec {
    /// Owning catalog task.
    pub task: String,
    /// Redash query id.
    pub query_id: u64,
    /// Human-readable name.
    pub name: String,
    /// Query parameters.
    pub params: Map<String, Value>,
    /// Output file stem.
    pub save_name: String,
    /// API key for this query.
    pub api_key: Option<Secret>,
}

impl QuerySpec {
    /// Creates a query with no parameters and no key.
    #[must_use]
    pub fn new(query_id: u64, name: impl Into<String>, save_name: impl Into<String>) -> Self {
        Self {
            task: String::new(),
            query_id,
            name: name.into(),
            params: Map::new(),
            save_name: save_name.into(),
            api_key: None,
        }
    }

    /// Adds a parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Sets the API key.
    #[must_use]
    pub fn with_api_key(mut self, key: Secret) -> Self {
        self.api_key = Some(key);
        self
    }

    /// Output file name inside the destination directory.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}.csv", self.save_name)
    }
}

impl fmt::Display for QuerySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "query {} ({})", self.query_id, self.name)
    }
}

/// Rows returned by a finished Redash job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Column names in the order Redash returned them.
    pub columns: Vec<String>,
    /// Result rows keyed by column name.
    pub rows: Vec<Map<String, Value>>,
    /// Execution time reported by Redash, in seconds.
    pub runtime_secs: Option<f64>,
    /// Redash query result id.
    pub result_id: Option<u64>,
}

/// Source of Redash query results.
#[async_trait]
pub trait RedashSource: Send + Sync {
    /// Executes a query and waits for its rows.
    async fn fetch(&self, query: &QuerySpec) -> Result<QueryResult, ExtractionError>;
}

/// Handle to a refresh started on the Power BI service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshHandle {
    /// Report title the refresh belongs to.
    pub report: String,
    /// Dataset being refreshed.
    pub dataset: String,
    /// Identifier of this particular refresh request.
    pub id: String,
}

/// Observed refresh state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshState {
    /// Still running.
    InProgress,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed(String),
}

/// Power BI refresh and export operations.
#[async_trait]
pub trait PowerBiService: Send + Sync {
    /// Starts a dataset refresh for the report.
    async fn start_refresh(&self, report: &str) -> Result<RefreshHandle, PublishError>;

    /// Reads the current refresh state.
    async fn refresh_state(&self, handle: &RefreshHandle) -> Result<RefreshState, PublishError>;

    /// Cancels a running refresh.
    async fn cancel_refresh(&self, handle: &RefreshHandle) -> Result<(), PublishError>;

    /// Exports one page into `destination`, returning the written file.
    async fn export(
        &self,
        report: &str,
        target: &ExportTarget,
        destination: &Path,
    ) -> Result<PathBuf, PublishError>;
}

/// Delivers JSON payloads to a webhook.
#[async_trait]
pub trait WebhookSender: Send + Sync {
    /// Posts one payload. A 2xx answer is an acknowledgement.
    async fn deliver(&self, url: &str, payload: &Value) -> Result<(), DeliveryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_spec_builder() {
        let q = QuerySpec::new(42, "orders", "orders_daily")
            .with_param("wh_id", "7")
            .with_api_key(Secret::new("k"));

        assert_eq!(q.file_name(), "orders_daily.csv");
        assert_eq!(q.params["wh_id"], Value::from("7"));
        assert_eq!(q.to_string(), "query 42 (orders)");
        assert!(!format!("{q:?}").contains("\"k\""));
    }
}
