//! The main application logic, decoupled from the entry point.
//!
//! `Engine` is the dispatch pipeline itself; `App` wraps it in an inbound
//! consumer loop with batching and graceful shutdown. `AppBuilder` wires the
//! real HTTP collaborators by default and lets tests override every seam.

use crate::{
    adapters,
    config::{BatchConfig, Config},
    core::{
        Alert, AlertStore, DeliveryError, Destination, DestinationDirectory, DispatchStatus,
        RetryEnvelope, RetryQueue,
    },
    directory::{DestinationCache, HttpDirectoryClient},
    dispatch::{AdapterRegistry, Dispatcher, DispatcherConfig},
    recorder,
    resolver::{self, ResolveMode},
    retry::{RetryCoordinator, RetryPolicy},
    store::HttpAlertStore,
};
use anyhow::Result;
use async_channel::{Receiver, Sender};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Outcome counters for one queue-triggered dispatch pass.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BatchSummary {
    /// Messages taken off the inbound queue.
    pub received: usize,
    /// Messages dropped for failing validation (poison messages).
    pub dropped: usize,
    /// Alerts that resolved to at least one destination.
    pub dispatched: usize,
    /// Retry envelopes successfully re-enqueued.
    pub retries_enqueued: usize,
}

/// The alert delivery engine: resolution, fan-out, status recording and
/// retry planning behind two entry points, one per trigger path.
pub struct Engine {
    cache: Arc<DestinationCache>,
    dispatcher: Dispatcher,
    retry: RetryCoordinator,
    store: Arc<dyn AlertStore>,
}

impl Engine {
    /// Queue-triggered dispatch of a batch of raw queue messages.
    ///
    /// Each message body is a JSON-serialized alert. Malformed or invalid
    /// messages are logged and dropped without affecting the rest of the
    /// batch; infrastructure failures (directory fetch, store update)
    /// propagate so the invoking trigger can redeliver the batch.
    pub async fn process_batch(&self, messages: &[String]) -> Result<BatchSummary, DeliveryError> {
        let mut summary = BatchSummary {
            received: messages.len(),
            ..Default::default()
        };

        let mut alerts: Vec<Alert> = Vec::with_capacity(messages.len());
        for message in messages {
            match parse_alert(message) {
                Ok(alert) => alerts.push(alert),
                Err(e) => {
                    warn!(error = %e, "dropping poison message");
                    metrics::counter!("alert_messages_dropped_total").increment(1);
                    summary.dropped += 1;
                }
            }
        }
        if alerts.is_empty() {
            return Ok(summary);
        }

        let destinations = self.cache.get().await?;

        let mut mapping: Vec<(Alert, Vec<Destination>)> = Vec::new();
        for alert in &alerts {
            // Queue mode cannot produce resolution errors, only empty sets.
            match resolver::resolve(alert, &destinations, ResolveMode::Queue) {
                Ok(resolved) if resolved.is_empty() => {
                    debug!(alert_id = %alert.alert_id, "alert resolved to no destinations");
                }
                Ok(resolved) => mapping.push((alert.clone(), resolved)),
                Err(e) => warn!(alert_id = %alert.alert_id, error = %e, "resolution failed"),
            }
        }
        summary.dispatched = mapping.len();

        let statuses = self.dispatcher.dispatch(&mapping).await;
        recorder::record_pass(self.store.as_ref(), statuses.clone()).await?;
        summary.retries_enqueued = self.retry.process(&alerts, &statuses).await;

        info!(
            received = summary.received,
            dropped = summary.dropped,
            dispatched = summary.dispatched,
            retries = summary.retries_enqueued,
            "dispatch pass complete"
        );
        Ok(summary)
    }

    /// Operator-triggered synchronous delivery of a stored alert.
    ///
    /// Loads the alert from the store, force-expires the destination cache
    /// (freshness over latency), resolves strictly and returns the statuses
    /// to the caller. Direct deliveries are not re-enqueued for retry; the
    /// caller sees the outcome and decides.
    pub async fn deliver_direct(
        &self,
        alert_id: &str,
        destination_ids: &[String],
    ) -> Result<Vec<DispatchStatus>, DeliveryError> {
        let alert = self
            .store
            .get_alert(alert_id)
            .await
            .map_err(|e| DeliveryError::Store(e.to_string()))?
            .ok_or_else(|| DeliveryError::NotFound(format!("alert {alert_id}")))?;

        self.cache.force_expire();
        let destinations = self.cache.get().await?;

        let request = if destination_ids.is_empty() {
            alert
        } else {
            // The operator named explicit targets; they replace both
            // override tiers of the stored alert.
            let mut narrowed = alert;
            narrowed.output_ids = destination_ids.to_vec();
            narrowed.destinations = Vec::new();
            narrowed
        };

        let resolved = resolver::resolve(&request, &destinations, ResolveMode::Direct)?;
        if resolved.is_empty() {
            info!(alert_id, "direct delivery resolved to no destinations");
            return Ok(Vec::new());
        }

        let mapping = vec![(request, resolved)];
        let statuses = self.dispatcher.dispatch(&mapping).await;
        recorder::record_pass(self.store.as_ref(), statuses.clone()).await?;
        Ok(statuses)
    }
}

fn parse_alert(message: &str) -> Result<Alert, DeliveryError> {
    let alert: Alert =
        serde_json::from_str(message).map_err(|e| DeliveryError::Validation(e.to_string()))?;
    alert.validate()?;
    Ok(alert)
}

/// Retry queue that feeds envelopes back into the inbound channel after
/// their delay, giving the standalone binary a complete retry loop without
/// an external queue service.
pub struct InProcessRetryQueue {
    tx: Sender<String>,
}

impl InProcessRetryQueue {
    pub fn new(tx: Sender<String>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl RetryQueue for InProcessRetryQueue {
    async fn enqueue(&self, envelope: &RetryEnvelope, delay: Duration) -> Result<()> {
        let body = serde_json::to_string(&envelope.alert)?;
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(body).await.is_err() {
                warn!("inbound channel closed, dropping retry");
            }
        });
        Ok(())
    }
}

/// The running application: an inbound consumer that batches queue messages
/// and runs dispatch passes until shutdown.
pub struct App {
    engine: Arc<Engine>,
    inbound_rx: Receiver<String>,
    batch: BatchConfig,
    shutdown_rx: watch::Receiver<bool>,
}

impl App {
    /// Creates a new `AppBuilder` to construct an `App`.
    pub fn builder(config: Config) -> AppBuilder {
        AppBuilder::new(config)
    }

    /// The engine, for direct (operator-triggered) deliveries.
    pub fn engine(&self) -> Arc<Engine> {
        Arc::clone(&self.engine)
    }

    /// Runs the consumer loop: dispatch when the batch fills, when the
    /// flush timer fires, and once more on shutdown or channel close.
    pub async fn run(mut self) -> Result<()> {
        let mut batch: Vec<String> = Vec::with_capacity(self.batch.size);
        let mut timer = tokio::time::interval(Duration::from_secs(self.batch.flush_seconds.max(1)));
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown_rx.changed() => {
                    info!("shutdown signal received, flushing final batch");
                    self.flush(&mut batch).await;
                    break;
                }
                _ = timer.tick() => {
                    if !batch.is_empty() {
                        debug!(len = batch.len(), "flush timer fired");
                        self.flush(&mut batch).await;
                    }
                }
                message = self.inbound_rx.recv() => {
                    match message {
                        Ok(message) => {
                            batch.push(message);
                            if batch.len() >= self.batch.size {
                                self.flush(&mut batch).await;
                                timer.reset();
                            }
                        }
                        Err(_) => {
                            info!("inbound channel closed, flushing final batch");
                            self.flush(&mut batch).await;
                            break;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn flush(&self, batch: &mut Vec<String>) {
        if batch.is_empty() {
            return;
        }
        let messages: Vec<String> = batch.drain(..).collect();
        // Pass-level failures are logged, not fatal: in a queue-triggered
        // deployment the trigger redelivers the batch.
        if let Err(e) = self.engine.process_batch(&messages).await {
            error!(error = %e, "dispatch pass failed");
        }
    }
}

/// Builder for the main application.
///
/// This pattern allows for a clean separation of concerns between
/// constructing the application's components and running it, and gives
/// tests an override point for every external collaborator.
pub struct AppBuilder {
    config: Config,
    directory_override: Option<Arc<dyn DestinationDirectory>>,
    store_override: Option<Arc<dyn AlertStore>>,
    queue_override: Option<Arc<dyn RetryQueue>>,
    registry_override: Option<AdapterRegistry>,
}

impl AppBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            directory_override: None,
            store_override: None,
            queue_override: None,
            registry_override: None,
        }
    }

    /// Overrides the destination directory client for testing.
    pub fn directory_override(mut self, directory: Arc<dyn DestinationDirectory>) -> Self {
        self.directory_override = Some(directory);
        self
    }

    /// Overrides the alert store client for testing.
    pub fn store_override(mut self, store: Arc<dyn AlertStore>) -> Self {
        self.store_override = Some(store);
        self
    }

    /// Overrides the retry queue for testing.
    pub fn queue_override(mut self, queue: Arc<dyn RetryQueue>) -> Self {
        self.queue_override = Some(queue);
        self
    }

    /// Overrides the adapter registry, e.g. with scripted adapters.
    pub fn registry_override(mut self, registry: AdapterRegistry) -> Self {
        self.registry_override = Some(registry);
        self
    }

    /// Builds the application. Returns the app and the sender side of the
    /// inbound message channel; dropping every sender shuts the app down
    /// after a final flush.
    pub fn build(self, shutdown_rx: watch::Receiver<bool>) -> Result<(App, Sender<String>)> {
        let config = self.config;
        let (inbound_tx, inbound_rx) = async_channel::bounded(config.batch.queue_capacity);

        let directory: Arc<dyn DestinationDirectory> = match self.directory_override {
            Some(directory) => directory,
            None => Arc::new(HttpDirectoryClient::new(config.directory.endpoint.clone())?),
        };
        let store: Arc<dyn AlertStore> = match self.store_override {
            Some(store) => store,
            None => Arc::new(HttpAlertStore::new(config.store.endpoint.clone())?),
        };
        let queue: Arc<dyn RetryQueue> = match self.queue_override {
            Some(queue) => queue,
            None => Arc::new(InProcessRetryQueue::new(inbound_tx.clone())),
        };
        let delivery_timeout = Duration::from_secs(config.dispatch.delivery_timeout_seconds);
        let registry = match self.registry_override {
            Some(registry) => registry,
            None => adapters::default_registry(delivery_timeout)?,
        };

        let cache = Arc::new(DestinationCache::new(
            directory,
            Duration::from_secs(config.outputs_refresh_interval_seconds),
        ));
        let dispatcher = Dispatcher::new(
            Arc::new(registry),
            DispatcherConfig {
                max_in_flight: config.dispatch.max_in_flight,
                delivery_timeout,
                batch_deadline: Duration::from_secs(config.dispatch.batch_deadline_seconds),
            },
        );
        let retry = RetryCoordinator::new(
            queue,
            RetryPolicy {
                max_retry_count: config.max_retry_count,
                min_delay: Duration::from_secs(config.retry.min_delay_seconds),
                max_delay: Duration::from_secs(config.retry.max_delay_seconds),
            },
        );

        let engine = Arc::new(Engine {
            cache,
            dispatcher,
            retry,
            store,
        });

        Ok((
            App {
                engine,
                inbound_rx,
                batch: config.batch,
                shutdown_rx,
            },
            inbound_tx,
        ))
    }
}
