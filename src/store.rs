//! HTTP client for the external alert store.

use crate::core::{Alert, AlertStore, DispatchStatus};
use anyhow::Result;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;

/// Alert store client speaking the store's JSON API: `GET /alerts/{id}` for
/// lookups and `POST /alerts/{id}/statuses` for delivery status updates.
pub struct HttpAlertStore {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpAlertStore {
    pub fn new(endpoint: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl AlertStore for HttpAlertStore {
    async fn get_alert(&self, alert_id: &str) -> Result<Option<Alert>> {
        let url = format!("{}/alerts/{alert_id}", self.endpoint);
        let response = self.client.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("alert store returned status {status}");
        }
        Ok(Some(response.json().await?))
    }

    async fn record_statuses(&self, alert_id: &str, statuses: Vec<DispatchStatus>) -> Result<()> {
        let url = format!("{}/alerts/{alert_id}/statuses", self.endpoint);
        let response = self.client.post(&url).json(&statuses).send().await?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("alert store returned status {status}");
        }
        Ok(())
    }
}
