//! HTTP implementations of the stage ports.
//!
//! Only compiled with the `http` feature. Tests and embedders that bring
//! their own collaborators can build without reqwest.

mod powerbi;
mod redash;
mod webhook;

pub use powerbi::PowerBiClient;
pub use redash::RedashClient;
pub use webhook::WebhookClient;

use std::sync::Arc;

use crate::config::{keys, Config};
use crate::errors::{ConfigError, ReportflowError};
use crate::pipeline::Collaborators;

/// Builds the production collaborators from configuration.
///
/// Power BI access needs [`keys::POWERBI_WORKSPACE_ID`] and
/// [`keys::POWERBI_ACCESS_TOKEN`]; without them this fails.
pub fn http_collaborators(config: &Config) -> Result<Collaborators, ReportflowError> {
    let api = config
        .powerbi
        .api
        .clone()
        .ok_or_else(|| ConfigError::Missing(keys::POWERBI_WORKSPACE_ID.to_string()))?;

    Ok(Collaborators {
        redash: Arc::new(RedashClient::new(&config.redash)?),
        powerbi: Arc::new(PowerBiClient::new(api, &config.powerbi)?),
        webhook: Arc::new(WebhookClient::new(config.webhook.timeout)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PowerBiApi, Secret};
    use crate::testing::test_config;

    #[test]
    fn test_missing_powerbi_api_is_a_config_error() {
        let config = test_config();
        assert!(config.powerbi.api.is_none());

        let err = tokio_test::assert_err!(http_collaborators(&config));
        assert!(matches!(
            err,
            ReportflowError::Config(ConfigError::Missing(ref key)) if key == keys::POWERBI_WORKSPACE_ID
        ));
    }

    #[test]
    fn test_collaborators_build_with_workspace() {
        let mut config = test_config();
        config.powerbi.api = Some(PowerBiApi {
            base_url: "https://api.powerbi.test/v1.0/myorg".into(),
            workspace_id: "ws-1".into(),
            access_token: Secret::new("token"),
        });

        tokio_test::assert_ok!(http_collaborators(&config));
    }
}
