//! Concrete destination adapters.
//!
//! The delivery engine treats adapters as opaque capabilities selected by
//! destination type. This crate ships the generic webhook adapter; richer
//! sinks (Jira, PagerDuty, SQS) are registered by the embedder through the
//! same [`AdapterRegistry`](crate::dispatch::AdapterRegistry).

pub mod webhook;

use crate::core::DestinationType;
use crate::dispatch::AdapterRegistry;
use std::sync::Arc;
use std::time::Duration;

pub use webhook::WebhookAdapter;

/// Builds the default registry: every webhook-shaped destination type is
/// served by the generic webhook adapter.
pub fn default_registry(delivery_timeout: Duration) -> anyhow::Result<AdapterRegistry> {
    let webhook: Arc<WebhookAdapter> = Arc::new(WebhookAdapter::new(delivery_timeout)?);
    Ok(AdapterRegistry::new()
        .with(DestinationType::Webhook, webhook.clone())
        .with(DestinationType::Slack, webhook.clone())
        .with(DestinationType::MsTeams, webhook))
}
