//! Environment-sourced configuration.
//!
//! [`Config::load`] resolves every setting once at process start and fails
//! with a [`ConfigError`] before any run can begin. The resulting record is
//! immutable and shared by reference with all stages.

mod catalog;

pub use catalog::{CatalogQuery, ExportKind, ExportTarget, ScheduleRow, TaskCatalog};

use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use crate::errors::ConfigError;

/// Environment variable names.
pub mod keys {
    /// Redash base URL.
    pub const REDASH_DOMAIN: &str = "REDASH_DOMAIN";
    /// Webhook endpoint for run summaries.
    pub const WEBHOOK_URL: &str = "WEBHOOK_URL";
    /// Service-account credential file.
    pub const SERVICE_ACCOUNT_PATH: &str = "SERVICE_ACCOUNT_PATH";
    /// Identifier of the task sheet the catalog mirrors.
    pub const SHEET_ID: &str = "SHEET_ID";
    /// Local data directory.
    pub const DATA_PATH: &str = "DATA_PATH";
    /// Local log directory.
    pub const LOG_PATH: &str = "LOG_PATH";
    /// Power BI report title.
    pub const PBI_TITLE: &str = "PBI_TITLE";

    /// Fallback Redash API key for catalog rows without one.
    pub const REDASH_API_KEY: &str = "REDASH_API_KEY";
    /// Catalog file override.
    pub const CATALOG: &str = "REPORTFLOW_CATALOG";
    /// Per-query timeout.
    pub const REDASH_TIMEOUT_SECS: &str = "REDASH_TIMEOUT_SECS";
    /// Attempts per query.
    pub const REDASH_MAX_ATTEMPTS: &str = "REDASH_MAX_ATTEMPTS";
    /// Job polling interval.
    pub const REDASH_POLL_MS: &str = "REDASH_POLL_MS";
    /// Refresh completion limit.
    pub const REFRESH_TIMEOUT_SECS: &str = "REFRESH_TIMEOUT_SECS";
    /// Refresh polling interval.
    pub const REFRESH_POLL_SECS: &str = "REFRESH_POLL_SECS";
    /// Per-page export limit.
    pub const EXPORT_TIMEOUT_SECS: &str = "EXPORT_TIMEOUT_SECS";
    /// Per-request webhook timeout.
    pub const WEBHOOK_TIMEOUT_SECS: &str = "WEBHOOK_TIMEOUT_SECS";
    /// Webhook delivery attempts.
    pub const WEBHOOK_MAX_ATTEMPTS: &str = "WEBHOOK_MAX_ATTEMPTS";
    /// Pause between extraction and publishing.
    pub const STAGE_SETTLE_SECS: &str = "STAGE_SETTLE_SECS";
    /// Whether a failed extraction aborts the run.
    pub const EXTRACTION_MANDATORY: &str = "EXTRACTION_MANDATORY";
    /// Power BI REST base URL.
    pub const POWERBI_API_BASE: &str = "POWERBI_API_BASE";
    /// Power BI workspace (group) id.
    pub const POWERBI_WORKSPACE_ID: &str = "POWERBI_WORKSPACE_ID";
    /// Power BI bearer token.
    pub const POWERBI_ACCESS_TOKEN: &str = "POWERBI_ACCESS_TOKEN";
}

const DEFAULT_POWERBI_API_BASE: &str = "https://api.powerbi.com/v1.0/myorg";

/// A credential that never appears in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// Wraps a credential.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the raw credential.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(***)")
    }
}

/// Redash collaborator settings.
#[derive(Debug, Clone)]
pub struct RedashSettings {
    /// Base URL without trailing slash.
    pub domain: String,
    /// Key used when a catalog row carries none.
    pub api_key: Option<Secret>,
    /// Limit for one query including job polling.
    pub timeout: Duration,
    /// Attempts per query (including the first).
    pub max_attempts: usize,
    /// Job polling interval.
    pub poll_interval: Duration,
}

/// Power BI REST access. Absent when the deployment supplies its own
/// Power BI collaborator.
#[derive(Debug, Clone)]
pub struct PowerBiApi {
    /// REST base URL.
    pub base_url: String,
    /// Workspace (group) id.
    pub workspace_id: String,
    /// Bearer token.
    pub access_token: Secret,
}

/// Power BI collaborator settings.
#[derive(Debug, Clone)]
pub struct PowerBiSettings {
    /// Title of the report to refresh and export.
    pub report_title: String,
    /// Refresh completion limit.
    pub refresh_timeout: Duration,
    /// Refresh polling interval.
    pub refresh_poll: Duration,
    /// Per-page export limit.
    pub export_timeout: Duration,
    /// REST access, if configured.
    pub api: Option<PowerBiApi>,
}

/// Webhook collaborator settings.
#[derive(Debug, Clone)]
pub struct WebhookSettings {
    /// Endpoint URL.
    pub url: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Attempts (including the first).
    pub max_attempts: usize,
}

/// Filesystem locations.
#[derive(Debug, Clone)]
pub struct PathSettings {
    /// Service-account credential file.
    pub service_account: PathBuf,
    /// Directory receiving extracts and exports.
    pub data_dir: PathBuf,
    /// Directory receiving log files.
    pub log_dir: PathBuf,
    /// Task catalog file.
    pub catalog: PathBuf,
}

/// Orchestration policy.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Pause after extraction so synced files can land.
    pub settle_delay: Duration,
    /// Whether an extraction with zero successful queries aborts the run.
    pub extraction_mandatory: bool,
}

/// Immutable, fully validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Redash settings.
    pub redash: RedashSettings,
    /// Power BI settings.
    pub powerbi: PowerBiSettings,
    /// Webhook settings.
    pub webhook: WebhookSettings,
    /// Filesystem locations.
    pub paths: PathSettings,
    /// Identifier of the task sheet.
    pub sheet_id: String,
    /// Orchestration policy.
    pub pipeline: PipelineSettings,
}

impl Config {
    /// Resolves configuration from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolves configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(&lookup);

        let redash_domain = env.url(keys::REDASH_DOMAIN)?;
        let webhook_url = env.url(keys::WEBHOOK_URL)?;
        let service_account = env.required_path(keys::SERVICE_ACCOUNT_PATH)?;
        let sheet_id = env.required(keys::SHEET_ID)?;
        let data_dir = env.required_path(keys::DATA_PATH)?;
        let log_dir = env.required_path(keys::LOG_PATH)?;
        let report_title = env.required(keys::PBI_TITLE)?;

        check_readable_file(keys::SERVICE_ACCOUNT_PATH, &service_account)?;
        check_readable_dir(keys::DATA_PATH, &data_dir)?;
        check_readable_dir(keys::LOG_PATH, &log_dir)?;

        let catalog = env
            .optional(keys::CATALOG)
            .map_or_else(|| data_dir.join(format!("{sheet_id}.json")), PathBuf::from);

        let api = match (
            env.optional(keys::POWERBI_WORKSPACE_ID),
            env.optional(keys::POWERBI_ACCESS_TOKEN),
        ) {
            (Some(workspace_id), Some(token)) => Some(PowerBiApi {
                base_url: match env.optional(keys::POWERBI_API_BASE) {
                    Some(_) => env.url(keys::POWERBI_API_BASE)?,
                    None => DEFAULT_POWERBI_API_BASE.to_string(),
                },
                workspace_id,
                access_token: Secret::new(token),
            }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::Missing(keys::POWERBI_ACCESS_TOKEN.into())),
            (None, Some(_)) => return Err(ConfigError::Missing(keys::POWERBI_WORKSPACE_ID.into())),
        };

        Ok(Self {
            redash: RedashSettings {
                domain: redash_domain,
                api_key: env.optional(keys::REDASH_API_KEY).map(Secret::new),
                timeout: Duration::from_secs(env.number(keys::REDASH_TIMEOUT_SECS, 60)?),
                max_attempts: env.attempts(keys::REDASH_MAX_ATTEMPTS, 5)?,
                poll_interval: Duration::from_millis(env.positive(keys::REDASH_POLL_MS, 1000)?),
            },
            powerbi: PowerBiSettings {
                report_title,
                refresh_timeout: Duration::from_secs(env.number(keys::REFRESH_TIMEOUT_SECS, 600)?),
                refresh_poll: Duration::from_secs(env.positive(keys::REFRESH_POLL_SECS, 5)?),
                export_timeout: Duration::from_secs(env.number(keys::EXPORT_TIMEOUT_SECS, 300)?),
                api,
            },
            webhook: WebhookSettings {
                url: webhook_url,
                timeout: Duration::from_secs(env.number(keys::WEBHOOK_TIMEOUT_SECS, 30)?),
                max_attempts: env.attempts(keys::WEBHOOK_MAX_ATTEMPTS, 3)?,
            },
            paths: PathSettings {
                service_account,
                data_dir,
                log_dir,
                catalog,
            },
            sheet_id,
            pipeline: PipelineSettings {
                settle_delay: Duration::from_secs(env.number(keys::STAGE_SETTLE_SECS, 15)?),
                extraction_mandatory: env.flag(keys::EXTRACTION_MANDATORY, true)?,
            },
        })
    }
}

struct Lookup<'a, F>(&'a F);

impl<F> Lookup<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.optional(key)
            .ok_or_else(|| ConfigError::Missing(key.to_string()))
    }

    fn required_path(&self, key: &str) -> Result<PathBuf, ConfigError> {
        self.required(key).map(PathBuf::from)
    }

    fn url(&self, key: &str) -> Result<String, ConfigError> {
        let value = self.required(key)?;
        if !url_pattern().is_match(&value) {
            return Err(ConfigError::invalid(key, format!("'{value}' is not an http(s) URL")));
        }
        Ok(value.trim_end_matches('/').to_string())
    }

    fn number(&self, key: &str, default: u64) -> Result<u64, ConfigError> {
        match self.optional(key) {
            None => Ok(default),
            Some(raw) => raw
                .parse()
                .map_err(|_| ConfigError::invalid(key, format!("'{raw}' is not a non-negative integer"))),
        }
    }

    fn positive(&self, key: &str, default: u64) -> Result<u64, ConfigError> {
        let n = self.number(key, default)?;
        if n == 0 {
            return Err(ConfigError::invalid(key, "must be at least 1"));
        }
        Ok(n)
    }

    fn attempts(&self, key: &str, default: u64) -> Result<usize, ConfigError> {
        let n = self.positive(key, default)?;
        usize::try_from(n).map_err(|_| ConfigError::invalid(key, "too large"))
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.optional(key).map(|v| v.to_ascii_lowercase()) {
            None => Ok(default),
            Some(v) => match v.as_str() {
                "1" | "true" | "yes" | "y" => Ok(true),
                "0" | "false" | "no" | "n" => Ok(false),
                _ => Err(ConfigError::invalid(key, format!("'{v}' is not a boolean"))),
            },
        }
    }
}

fn url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"^https?://[^\s/?#]+(/[^\s]*)?$").unwrap()
    })
}

fn check_readable_file(key: &str, path: &Path) -> Result<(), ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::path(key, path, "does not exist or is not a file"));
    }
    std::fs::File::open(path)
        .map(|_| ())
        .map_err(|e| ConfigError::path(key, path, format!("is not readable: {e}")))
}

fn check_readable_dir(key: &str, path: &Path) -> Result<(), ConfigError> {
    if !path.is_dir() {
        return Err(ConfigError::path(key, path, "does not exist or is not a directory"));
    }
    std::fs::read_dir(path)
        .map(|_| ())
        .map_err(|e| ConfigError::path(key, path, format!("is not readable: {e}")))
}
