#![allow(dead_code)]
//! Shared fakes for the integration tests: an in-memory destination
//! directory, alert store, retry queue and a handful of adapters with
//! scriptable behavior.

use alert_relay::core::{
    Alert, AlertStore, DeliveryResponse, Destination, DestinationAdapter, DestinationConfig,
    DestinationDirectory, DestinationType, DispatchStatus, RetryEnvelope, RetryQueue, Severity,
};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn make_alert(id: &str, severity: Severity) -> Alert {
    Alert {
        alert_id: id.to_string(),
        analysis_id: "rule.test".to_string(),
        analysis_name: "Test rule".to_string(),
        severity,
        ..Default::default()
    }
}

pub fn make_destination(id: &str, severities: &[Severity]) -> Destination {
    Destination {
        destination_id: id.to_string(),
        destination_type: DestinationType::Slack,
        display_name: format!("#{id}"),
        default_for_severity: severities.to_vec(),
        config: DestinationConfig::default(),
    }
}

/// Directory fake serving a fixed destination list, with a fetch counter
/// and a failure switch.
pub struct StaticDirectory {
    destinations: Mutex<Vec<Destination>>,
    pub fetches: AtomicUsize,
    pub fail: AtomicBool,
}

impl StaticDirectory {
    pub fn new(destinations: Vec<Destination>) -> Arc<Self> {
        Arc::new(Self {
            destinations: Mutex::new(destinations),
            fetches: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        })
    }

    pub fn set_destinations(&self, destinations: Vec<Destination>) {
        *self.destinations.lock().unwrap() = destinations;
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DestinationDirectory for StaticDirectory {
    async fn fetch_all(&self) -> Result<Vec<Destination>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("directory unavailable");
        }
        Ok(self.destinations.lock().unwrap().clone())
    }
}

/// In-memory alert store recording every status update.
#[derive(Default)]
pub struct MemoryStore {
    alerts: Mutex<HashMap<String, Alert>>,
    recorded: Mutex<HashMap<String, Vec<DispatchStatus>>>,
    pub fail_updates: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert_alert(&self, alert: Alert) {
        self.alerts
            .lock()
            .unwrap()
            .insert(alert.alert_id.clone(), alert);
    }

    pub fn recorded_for(&self, alert_id: &str) -> Vec<DispatchStatus> {
        self.recorded
            .lock()
            .unwrap()
            .get(alert_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn get_alert(&self, alert_id: &str) -> Result<Option<Alert>> {
        Ok(self.alerts.lock().unwrap().get(alert_id).cloned())
    }

    async fn record_statuses(&self, alert_id: &str, statuses: Vec<DispatchStatus>) -> Result<()> {
        if self.fail_updates.load(Ordering::SeqCst) {
            anyhow::bail!("store unavailable");
        }
        self.recorded
            .lock()
            .unwrap()
            .entry(alert_id.to_string())
            .or_default()
            .extend(statuses);
        Ok(())
    }
}

/// Retry queue fake that records envelopes instead of redelivering them.
#[derive(Default)]
pub struct RecordingQueue {
    enqueued: Mutex<Vec<(RetryEnvelope, Duration)>>,
}

impl RecordingQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn recorded(&self) -> Vec<(RetryEnvelope, Duration)> {
        self.enqueued.lock().unwrap().clone()
    }
}

#[async_trait]
impl RetryQueue for RecordingQueue {
    async fn enqueue(&self, envelope: &RetryEnvelope, delay: Duration) -> Result<()> {
        self.enqueued
            .lock()
            .unwrap()
            .push((envelope.clone(), delay));
        Ok(())
    }
}

/// Per-destination scripted behavior for test adapters.
#[derive(Clone, Copy)]
pub enum Behavior {
    Succeed,
    FailTransient,
    FailPermanent,
    Panic,
}

/// Adapter whose response per destination ID is fixed up front.
pub struct ScriptedAdapter {
    script: HashMap<String, Behavior>,
    pub attempts: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn new(script: Vec<(&str, Behavior)>) -> Arc<Self> {
        Arc::new(Self {
            script: script
                .into_iter()
                .map(|(id, behavior)| (id.to_string(), behavior))
                .collect(),
            attempts: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl DestinationAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn deliver(&self, _alert: &Alert, destination: &Destination) -> Result<DeliveryResponse> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match self
            .script
            .get(&destination.destination_id)
            .copied()
            .unwrap_or(Behavior::Succeed)
        {
            Behavior::Succeed => Ok(DeliveryResponse {
                status_code: Some(200),
                success: true,
                permanent: false,
                message: "delivered".to_string(),
            }),
            Behavior::FailTransient => Ok(DeliveryResponse {
                status_code: Some(429),
                success: false,
                permanent: false,
                message: "rate limited".to_string(),
            }),
            Behavior::FailPermanent => Ok(DeliveryResponse {
                status_code: Some(500),
                success: false,
                permanent: true,
                message: "bad configuration".to_string(),
            }),
            Behavior::Panic => panic!("adapter blew up"),
        }
    }
}

/// Adapter that fails transiently a fixed number of times per destination,
/// then succeeds. Used to exercise the retry loop end to end.
pub struct FlakyAdapter {
    failures_before_success: usize,
    seen: Mutex<HashMap<String, usize>>,
    pub attempts: AtomicUsize,
}

impl FlakyAdapter {
    pub fn new(failures_before_success: usize) -> Arc<Self> {
        Arc::new(Self {
            failures_before_success,
            seen: Mutex::new(HashMap::new()),
            attempts: AtomicUsize::new(0),
        })
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DestinationAdapter for FlakyAdapter {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn deliver(&self, _alert: &Alert, destination: &Destination) -> Result<DeliveryResponse> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let mut seen = self.seen.lock().unwrap();
        let count = seen
            .entry(destination.destination_id.clone())
            .and_modify(|c| *c += 1)
            .or_insert(1);
        if *count <= self.failures_before_success {
            Ok(DeliveryResponse {
                status_code: Some(503),
                success: false,
                permanent: false,
                message: "temporarily unavailable".to_string(),
            })
        } else {
            Ok(DeliveryResponse {
                status_code: Some(200),
                success: true,
                permanent: false,
                message: "delivered".to_string(),
            })
        }
    }
}
