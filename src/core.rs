//! Core domain types and service traits for alert delivery
//!
//! This module defines the fundamental data structures and trait contracts
//! that govern component interactions throughout the application.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Sentinel output ID: an alert carrying this in `output_ids` asked to be
/// dropped without any delivery.
pub const SKIP_OUTPUT_ID: &str = "SKIP";

/// Alert severity, ordered from least to most urgent.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    #[default]
    Info,
    Low,
    Medium,
    High,
    Critical,
}

/// A security alert produced by the detection pipeline.
///
/// The delivery engine treats alerts as read-only; the only fields it ever
/// rewrites are `output_ids` and `retry_count`, and then only on the narrowed
/// copy inside a [`RetryEnvelope`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    /// Opaque identifier, stable across retries of the same logical alert.
    pub alert_id: String,
    /// Identifier of the detection that produced this alert.
    #[serde(default)]
    pub analysis_id: String,
    /// Human-readable name of the detection.
    #[serde(default)]
    pub analysis_name: String,
    pub severity: Severity,
    /// When the detection pipeline created the alert.
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Optional remediation notes attached by the detection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runbook: Option<String>,
    /// User-configured destination override list. May contain
    /// [`SKIP_OUTPUT_ID`].
    #[serde(default)]
    pub output_ids: Vec<String>,
    /// Destination overrides set programmatically by the detection logic,
    /// distinct from the user-configured `output_ids`.
    #[serde(default)]
    pub destinations: Vec<String>,
    /// Number of times this alert has been re-enqueued for delivery.
    /// Monotonically non-decreasing over the alert's lifetime.
    #[serde(default)]
    pub retry_count: u32,
    /// Free-form key/value context from the detection.
    #[serde(default)]
    pub context: serde_json::Map<String, serde_json::Value>,
}

impl Alert {
    /// Checks the structural invariants an inbound alert must satisfy.
    pub fn validate(&self) -> Result<(), DeliveryError> {
        if self.alert_id.trim().is_empty() {
            return Err(DeliveryError::Validation("alert_id is empty".to_string()));
        }
        Ok(())
    }

    /// True if the alert explicitly asked not to be delivered anywhere.
    pub fn skip_requested(&self) -> bool {
        self.output_ids.iter().any(|id| id == SKIP_OUTPUT_ID)
    }
}

impl Default for Alert {
    fn default() -> Self {
        Self {
            alert_id: String::new(),
            analysis_id: String::new(),
            analysis_name: String::new(),
            severity: Severity::Info,
            created_at: Utc::now(),
            tags: Vec::new(),
            runbook: None,
            output_ids: Vec::new(),
            destinations: Vec::new(),
            retry_count: 0,
            context: serde_json::Map::new(),
        }
    }
}

/// The kind of external sink a destination delivers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationType {
    Slack,
    PagerDuty,
    Jira,
    MsTeams,
    Sqs,
    Webhook,
}

impl DestinationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DestinationType::Slack => "slack",
            DestinationType::PagerDuty => "pagerduty",
            DestinationType::Jira => "jira",
            DestinationType::MsTeams => "msteams",
            DestinationType::Sqs => "sqs",
            DestinationType::Webhook => "webhook",
        }
    }
}

impl std::fmt::Display for DestinationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type-specific connection settings for a destination. The delivery engine
/// never interprets these beyond handing them to the matching adapter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DestinationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_url: Option<String>,
}

/// A configured delivery target, owned by the external destination directory.
/// The engine only ever holds cached, read-only copies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Destination {
    pub destination_id: String,
    pub destination_type: DestinationType,
    pub display_name: String,
    /// Severities this destination receives by default when an alert carries
    /// no explicit overrides.
    #[serde(default)]
    pub default_for_severity: Vec<Severity>,
    #[serde(default)]
    pub config: DestinationConfig,
}

/// The outcome an adapter reports for a single delivery attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeliveryResponse {
    pub status_code: Option<u16>,
    pub success: bool,
    /// A failed attempt marked permanent is never retried.
    pub permanent: bool,
    pub message: String,
}

/// Immutable record of one (alert, destination) delivery attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchStatus {
    pub alert_id: String,
    pub destination_id: String,
    pub success: bool,
    pub status_code: Option<u16>,
    pub message: String,
    pub needs_retry: bool,
    pub dispatched_at: DateTime<Utc>,
}

impl DispatchStatus {
    /// A failure that must never be retried.
    pub fn terminal(alert_id: &str, destination_id: &str, message: &str) -> Self {
        Self {
            alert_id: alert_id.to_string(),
            destination_id: destination_id.to_string(),
            success: false,
            status_code: None,
            message: message.to_string(),
            needs_retry: false,
            dispatched_at: Utc::now(),
        }
    }

    /// A failure eligible for a delayed retry.
    pub fn transient(alert_id: &str, destination_id: &str, message: &str) -> Self {
        Self {
            needs_retry: true,
            ..Self::terminal(alert_id, destination_id, message)
        }
    }

    /// Classifies an adapter response: a failure is retryable exactly when
    /// the adapter did not mark it permanent.
    pub fn from_response(alert_id: &str, destination_id: &str, response: DeliveryResponse) -> Self {
        Self {
            alert_id: alert_id.to_string(),
            destination_id: destination_id.to_string(),
            success: response.success,
            status_code: response.status_code,
            message: response.message,
            needs_retry: !response.success && !response.permanent,
            dispatched_at: Utc::now(),
        }
    }
}

/// A copy of an alert re-enqueued for another delivery pass, narrowed to the
/// destinations that failed transiently.
///
/// Always constructed as a fresh value; the original alert is never aliased
/// or mutated, so concurrently processed copies of the same alert cannot
/// race.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryEnvelope {
    pub alert: Alert,
}

impl RetryEnvelope {
    /// Builds the retry copy for a single failed destination: `output_ids`
    /// becomes exactly that destination, dynamic destination overrides are
    /// cleared so the narrowed list governs re-resolution, and `retry_count`
    /// is incremented exactly once.
    pub fn narrowed(alert: &Alert, destination_id: &str) -> Self {
        let mut copy = alert.clone();
        copy.output_ids = vec![destination_id.to_string()];
        copy.destinations = Vec::new();
        copy.retry_count = alert.retry_count + 1;
        Self { alert: copy }
    }
}

/// Error taxonomy for the delivery engine.
///
/// `Validation`, `NotFound` and `InvalidInput` are per-request and never
/// abort a batch; `Directory`, `Queue` and `Store` are pass-level
/// infrastructure failures that propagate to the invoking trigger.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DeliveryError {
    #[error("invalid alert payload: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("destination directory fetch failed: {0}")]
    Directory(String),

    #[error("retry queue enqueue failed: {0}")]
    Queue(String),

    #[error("alert store update failed: {0}")]
    Store(String),
}

// =============================================================================
// Service Traits
// =============================================================================

/// Delivers an alert to one kind of destination.
///
/// Adapters are opaque capabilities: the engine selects one by
/// [`DestinationType`] and passes the destination's own config through
/// untouched. An adapter should report failures through
/// [`DeliveryResponse`]; returning `Err` (or panicking) is treated as a
/// contract violation and recorded as a permanent failure.
#[async_trait]
pub trait DestinationAdapter: Send + Sync {
    /// A short name for the adapter, used in logs.
    fn name(&self) -> &str;

    /// Attempts one delivery of `alert` to `destination`.
    async fn deliver(&self, alert: &Alert, destination: &Destination)
        -> Result<DeliveryResponse>;
}

/// The external directory of configured destinations.
#[async_trait]
pub trait DestinationDirectory: Send + Sync {
    /// Fetches the full list of destination configs, secrets included.
    async fn fetch_all(&self) -> Result<Vec<Destination>>;
}

/// The external alert store: the system of record for alerts and their
/// per-destination delivery statuses.
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Loads an alert by ID. `Ok(None)` when no such alert exists.
    async fn get_alert(&self, alert_id: &str) -> Result<Option<Alert>>;

    /// Records the delivery statuses of one dispatch pass for one alert.
    async fn record_statuses(&self, alert_id: &str, statuses: Vec<DispatchStatus>) -> Result<()>;
}

/// The durable at-least-once queue that carries retry envelopes back into
/// the delivery pipeline after a delay.
#[async_trait]
pub trait RetryQueue: Send + Sync {
    /// Enqueues one envelope for redelivery after `delay`.
    async fn enqueue(&self, envelope: &RetryEnvelope, delay: Duration) -> Result<()>;
}
