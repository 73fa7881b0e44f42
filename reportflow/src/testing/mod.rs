//! Testing utilities for reportflow pipelines.
//!
//! This module provides:
//! - Fake Redash, Power BI and webhook collaborators
//! - A ready-made configuration that touches no real service
//! - Catalog helpers

mod mocks;

pub use mocks::{FakePowerBi, FakeRedash, Gate, RecordingWebhook};

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{
    CatalogQuery, Config, ExportKind, ExportTarget, PathSettings, PipelineSettings,
    PowerBiSettings, RedashSettings, ScheduleRow, Secret, TaskCatalog, WebhookSettings,
};
use crate::pipeline::{Collaborators, Orchestrator, RetryConfig};
use crate::stages::{RedashExtractor, WebhookNotifier};

/// Configuration rooted at the system temp directory with short limits
/// and no settle delay.
#[must_use]
pub fn test_config() -> Config {
    test_config_in(&std::env::temp_dir())
}

/// Same as [`test_config`] but writing into `data_dir`.
#[must_use]
pub fn test_config_in(data_dir: &Path) -> Config {
    Config {
        redash: RedashSettings {
            domain: "https://redash.test".to_string(),
            api_key: Some(Secret::new("test-key")),
            timeout: Duration::from_secs(5),
            max_attempts: 3,
            poll_interval: Duration::from_millis(10),
        },
        powerbi: PowerBiSettings {
            report_title: "Test Report".to_string(),
            refresh_timeout: Duration::from_secs(60),
            refresh_poll: Duration::from_millis(10),
            export_timeout: Duration::from_secs(30),
            api: None,
        },
        webhook: WebhookSettings {
            url: "https://hooks.test/run".to_string(),
            timeout: Duration::from_secs(5),
            max_attempts: 3,
        },
        paths: PathSettings {
            service_account: data_dir.join("service_account.json"),
            data_dir: data_dir.to_path_buf(),
            log_dir: data_dir.to_path_buf(),
            catalog: data_dir.join("catalog.json"),
        },
        sheet_id: "test-sheet".to_string(),
        pipeline: PipelineSettings {
            settle_delay: Duration::ZERO,
            extraction_mandatory: true,
        },
    }
}

/// An image export of `page` for task `daily`.
#[must_use]
pub fn image_export(page: &str, export_name: &str) -> ExportTarget {
    ExportTarget {
        task: "daily".to_string(),
        page: page.to_string(),
        kind: ExportKind::Image,
        export_name: export_name.to_string(),
        message: None,
        proceed: true,
    }
}

/// A catalog with one `daily` task holding the given query ids and image
/// pages, scheduled at 08:00.
#[must_use]
pub fn daily_catalog(query_ids: &[u64], pages: &[&str]) -> TaskCatalog {
    TaskCatalog {
        queries: query_ids
            .iter()
            .map(|id| CatalogQuery {
                task: "daily".to_string(),
                query_id: *id,
                query_name: format!("query_{id}"),
                api_key: None,
                params: serde_json::Map::new(),
                save_name: format!("query_{id}"),
                active: true,
                run: true,
            })
            .collect(),
        exports: pages
            .iter()
            .map(|page| image_export(page, &format!("{}.png", page.to_lowercase())))
            .collect(),
        schedule: vec![ScheduleRow {
            task: "daily".to_string(),
            slots: vec!["08:00".to_string()],
            once: true,
            quick: true,
        }],
    }
}

/// Fakes wired into one orchestrator.
#[derive(Debug)]
pub struct TestPipeline {
    /// Redash fake.
    pub redash: Arc<FakeRedash>,
    /// Power BI fake.
    pub powerbi: Arc<FakePowerBi>,
    /// Webhook recorder.
    pub webhook: Arc<RecordingWebhook>,
    /// Orchestrator under test.
    pub orchestrator: Arc<Orchestrator>,
}

impl TestPipeline {
    /// Builds an orchestrator over the given fakes. Retries happen without
    /// delay.
    #[must_use]
    pub fn new(
        config: Config,
        catalog: TaskCatalog,
        redash: FakeRedash,
        powerbi: FakePowerBi,
        webhook: RecordingWebhook,
    ) -> Self {
        let redash = Arc::new(redash);
        let powerbi = Arc::new(powerbi);
        let webhook = Arc::new(webhook);
        let collaborators = Collaborators {
            redash: redash.clone(),
            powerbi: powerbi.clone(),
            webhook: webhook.clone(),
        };
        let extractor = RedashExtractor::new(
            redash.clone(),
            RetryConfig::constant(config.redash.max_attempts, Duration::ZERO),
            config.redash.timeout,
        );
        let notifier = WebhookNotifier::new(
            webhook.clone(),
            config.webhook.url.clone(),
            RetryConfig::constant(config.webhook.max_attempts, Duration::ZERO),
        );
        let orchestrator = Orchestrator::new(Arc::new(config), catalog, collaborators)
            .with_extractor(extractor)
            .with_notifier(notifier);
        Self {
            orchestrator: Arc::new(orchestrator),
            redash,
            powerbi,
            webhook,
        }
    }
}
