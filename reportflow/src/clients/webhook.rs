//! Webhook delivery over HTTP.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::errors::{DeliveryError, ReportflowError};
use crate::stages::WebhookSender;

const BODY_LIMIT: usize = 300;

/// [`WebhookSender`] that POSTs JSON with reqwest.
#[derive(Debug, Clone)]
pub struct WebhookClient {
    client: reqwest::Client,
}

impl WebhookClient {
    /// Creates a client whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, ReportflowError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ReportflowError::Client(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookSender for WebhookClient {
    async fn deliver(&self, url: &str, payload: &Value) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(DeliveryError::Status {
            status: status.as_u16(),
            body: truncate(&body),
        })
    }
}

fn truncate(body: &str) -> String {
    if body.chars().count() <= BODY_LIMIT {
        body.to_string()
    } else {
        let mut cut: String = body.chars().take(BODY_LIMIT).collect();
        cut.push_str("...");
        cut
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_long_bodies() {
        assert_eq!(truncate("bad request"), "bad request");
        let long = "x".repeat(BODY_LIMIT + 10);
        let cut = truncate(&long);
        assert_eq!(cut.len(), BODY_LIMIT + 3);
        assert!(cut.ends_with("..."));
    }
}
