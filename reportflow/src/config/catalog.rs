//! Task catalog: which queries, exports and schedule slots belong to which
//! task.
//!
//! The catalog is a JSON document mirroring the operators' task sheet:
//!
//! ```json
//! {
//!   "queries":  [{ "task": "daily", "query_id": 42, "query_name": "orders",
//!                  "params": { "wh_id": "7" }, "save_name": "orders" }],
//!   "exports":  [{ "task": "daily", "page": "Summary",
//!                  "kind": { "type": "image" }, "export_name": "summary.png" }],
//!   "schedule": [{ "task": "daily", "slots": ["08:00", "14:30"], "once": true }]
//! }
//! ```

use chrono::NaiveTime;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use super::Secret;
use crate::errors::ConfigError;
use crate::scheduler::{ScheduleEntry, ScheduleSpec};
use crate::stages::QuerySpec;

const fn yes() -> bool {
    true
}

/// One Redash query row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogQuery {
    /// Owning task.
    pub task: String,
    /// Redash query id.
    pub query_id: u64,
    /// Human-readable query name.
    pub query_name: String,
    /// Per-query API key.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Query parameters.
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
    /// Output file stem.
    pub save_name: String,
    /// Row is active.
    #[serde(default = "yes")]
    pub active: bool,
    /// Row should run.
    #[serde(default = "yes")]
    pub run: bool,
}

/// How a page is exported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExportKind {
    /// Rendered page image.
    Image,
    /// Tabular data produced by a DAX query against the report's dataset.
    Data {
        /// The DAX query.
        dax: String,
    },
}

/// One report page to export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportTarget {
    /// Owning task.
    pub task: String,
    /// Report page name.
    pub page: String,
    /// Export kind.
    pub kind: ExportKind,
    /// Output file name.
    pub export_name: String,
    /// Message to pass along with the artifact reference.
    #[serde(default)]
    pub message: Option<String>,
    /// Row should be processed.
    #[serde(default = "yes")]
    pub proceed: bool,
}

/// Schedule row for one task.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScheduleRow {
    /// Task name.
    pub task: String,
    /// Daily `HH:MM` slots.
    #[serde(default)]
    pub slots: Vec<String>,
    /// Included in the manual full run.
    #[serde(default)]
    pub once: bool,
    /// Included in the manual quick run.
    #[serde(default)]
    pub quick: bool,
}

/// The parsed task catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskCatalog {
    /// Query rows.
    #[serde(default)]
    pub queries: Vec<CatalogQuery>,
    /// Export rows.
    #[serde(default)]
    pub exports: Vec<ExportTarget>,
    /// Schedule rows.
    #[serde(default)]
    pub schedule: Vec<ScheduleRow>,
}

impl TaskCatalog {
    /// Reads and validates the catalog file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| catalog_error(path, e))?;
        Self::parse(&raw, path)
    }

    /// Parses and validates catalog JSON. `origin` is only used in errors.
    pub fn parse(raw: &str, origin: &Path) -> Result<Self, ConfigError> {
        let catalog: Self = serde_json::from_str(raw).map_err(|e| catalog_error(origin, e))?;
        catalog.validate().map_err(|m| catalog_error(origin, m))?;
        Ok(catalog)
    }

    fn validate(&self) -> Result<(), String> {
        for q in &self.queries {
            if !file_name_pattern().is_match(&q.save_name) {
                return Err(format!(
                    "query {} has unsafe save_name '{}'",
                    q.query_id, q.save_name
                ));
            }
        }
        for e in &self.exports {
            if !file_name_pattern().is_match(&e.export_name) {
                return Err(format!(
                    "export of page '{}' has unsafe export_name '{}'",
                    e.page, e.export_name
                ));
            }
        }
        for row in &self.schedule {
            for slot in &row.slots {
                parse_slot(slot).map_err(|m| format!("task '{}': {m}", row.task))?;
            }
        }
        Ok(())
    }

    /// Active, runnable queries of the selected tasks, de-duplicated by
    /// query id, parameters and output name (first row wins).
    #[must_use]
    pub fn queries_for(&self, tasks: &[String], fallback_key: Option<&Secret>) -> Vec<QuerySpec> {
        let selected: HashSet<&str> = tasks.iter().map(String::as_str).collect();
        let mut seen = HashSet::new();

        self.queries
            .iter()
            .filter(|q| q.active && q.run && selected.contains(q.task.as_str()))
            .filter(|q| {
                let params = serde_json::Value::Object(q.params.clone()).to_string();
                seen.insert((q.query_id, params, q.save_name.clone()))
            })
            .map(|q| QuerySpec {
                task: q.task.clone(),
                query_id: q.query_id,
                name: q.query_name.clone(),
                params: q.params.clone(),
                save_name: q.save_name.clone(),
                api_key: q.api_key.clone().map(Secret::new).or_else(|| fallback_key.cloned()),
            })
            .collect()
    }

    /// Exports of the selected tasks marked to proceed.
    #[must_use]
    pub fn exports_for(&self, tasks: &[String]) -> Vec<ExportTarget> {
        self.exports
            .iter()
            .filter(|e| e.proceed && tasks.iter().any(|t| t == &e.task))
            .cloned()
            .collect()
    }

    /// One daily entry per distinct slot, carrying every task scheduled at it.
    #[must_use]
    pub fn schedule_spec(&self) -> ScheduleSpec {
        let mut by_slot: BTreeMap<NaiveTime, Vec<String>> = BTreeMap::new();
        for row in &self.schedule {
            for slot in &row.slots {
                if let Ok(at) = parse_slot(slot) {
                    let tasks = by_slot.entry(at).or_default();
                    if !tasks.contains(&row.task) {
                        tasks.push(row.task.clone());
                    }
                }
            }
        }
        ScheduleSpec::new(
            by_slot
                .into_iter()
                .map(|(at, tasks)| ScheduleEntry::daily(at, tasks))
                .collect(),
        )
    }

    /// Tasks flagged for the manual full run.
    #[must_use]
    pub fn once_tasks(&self) -> Vec<String> {
        self.schedule.iter().filter(|r| r.once).map(|r| r.task.clone()).collect()
    }

    /// Tasks flagged for the manual quick run.
    #[must_use]
    pub fn quick_tasks(&self) -> Vec<String> {
        self.schedule.iter().filter(|r| r.quick).map(|r| r.task.clone()).collect()
    }
}

/// Parses an `HH:MM` slot.
pub(crate) fn parse_slot(slot: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(slot.trim(), "%H:%M")
        .map_err(|_| format!("slot '{slot}' is not HH:MM"))
}

fn file_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._ -]*$").unwrap()
    })
}

fn catalog_error(path: &Path, message: impl ToString) -> ConfigError {
    ConfigError::Catalog {
        path: PathBuf::from(path),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const CATALOG: &str = r#"{
        "queries": [
            {"task": "daily", "query_id": 1, "query_name": "orders", "save_name": "orders",
             "params": {"wh_id": "7"}, "api_key": "row-key"},
            {"task": "daily", "query_id": 1, "query_name": "orders again", "save_name": "orders",
             "params": {"wh_id": "7"}},
            {"task": "daily", "query_id": 2, "query_name": "stock", "save_name": "stock"},
            {"task": "daily", "query_id": 3, "query_name": "old", "save_name": "old", "active": false},
            {"task": "weekly", "query_id": 4, "query_name": "weekly", "save_name": "weekly"}
        ],
        "exports": [
            {"task": "daily", "page": "Summary", "kind": {"type": "image"}, "export_name": "summary.png"},
            {"task": "daily", "page": "Detail", "kind": {"type": "data", "dax": "EVALUATE Detail"},
             "export_name": "detail.csv", "proceed": false},
            {"task": "weekly", "page": "Week", "kind": {"type": "image"}, "export_name": "week.png"}
        ],
        "schedule": [
            {"task": "daily", "slots": ["08:00", "14:30"], "once": true},
            {"task": "weekly", "slots": ["08:00"], "quick": true}
        ]
    }"#;

    fn catalog() -> TaskCatalog {
        TaskCatalog::parse(CATALOG, Path::new("catalog.json")).unwrap()
    }

    #[test]
    fn test_queries_are_filtered_and_deduplicated() {
        let fallback = Secret::new("fallback");
        let queries = catalog().queries_for(&["daily".to_string()], Some(&fallback));

        let names: Vec<_> = queries.iter().map(|q| q.name.as_str()).collect();
        assert_eq!(names, vec!["orders", "stock"]);
        assert_eq!(queries[0].api_key.as_ref().map(Secret::expose), Some("row-key"));
        assert_eq!(queries[1].api_key.as_ref().map(Secret::expose), Some("fallback"));
    }

    #[test]
    fn test_exports_for_respects_proceed_flag() {
        let exports = catalog().exports_for(&["daily".to_string(), "weekly".to_string()]);
        let pages: Vec<_> = exports.iter().map(|e| e.page.as_str()).collect();
        assert_eq!(pages, vec!["Summary", "Week"]);
    }

    #[test]
    fn test_schedule_groups_tasks_by_slot() {
        let spec = catalog().schedule_spec();
        let entries = spec.entries();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].tasks, vec!["daily".to_string(), "weekly".to_string()]);
        assert_eq!(entries[1].tasks, vec!["daily".to_string()]);
    }

    #[test]
    fn test_manual_task_lists() {
        let catalog = catalog();
        assert_eq!(catalog.once_tasks(), vec!["daily".to_string()]);
        assert_eq!(catalog.quick_tasks(), vec!["weekly".to_string()]);
    }

    #[test]
    fn test_rejects_unsafe_names_and_bad_slots() {
        let raw = r#"{"queries": [{"task": "t", "query_id": 1, "query_name": "x", "save_name": "../etc/passwd"}]}"#;
        assert!(matches!(
            TaskCatalog::parse(raw, Path::new("c.json")),
            Err(ConfigError::Catalog { .. })
        ));

        let raw = r#"{"schedule": [{"task": "t", "slots": ["25:00"]}]}"#;
        let err = TaskCatalog::parse(raw, Path::new("c.json")).unwrap_err();
        assert!(err.to_string().contains("25:00"));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = TaskCatalog::load(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Catalog { .. }));
    }
}
