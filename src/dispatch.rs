//! Concurrent fan-out of alerts to their resolved destinations.
//!
//! One delivery task runs per (alert, destination) pair, bounded by a
//! counting semaphore. Results fan in over a channel and the dispatcher
//! returns exactly one status per pair no matter how individual tasks fail:
//! adapter errors, panics, slow calls and a blown batch deadline all
//! degrade to statuses, never to a missing result or a crashed pass.

use crate::core::{
    Alert, Destination, DestinationAdapter, DestinationType, DispatchStatus,
};
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Maps each destination type to the adapter capable of delivering to it.
///
/// Supporting a new sink means registering an adapter here; the dispatcher
/// itself never branches on the type.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<DestinationType, Arc<dyn DestinationAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        destination_type: DestinationType,
        adapter: Arc<dyn DestinationAdapter>,
    ) {
        self.adapters.insert(destination_type, adapter);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(
        mut self,
        destination_type: DestinationType,
        adapter: Arc<dyn DestinationAdapter>,
    ) -> Self {
        self.register(destination_type, adapter);
        self
    }

    pub fn get(&self, destination_type: DestinationType) -> Option<Arc<dyn DestinationAdapter>> {
        self.adapters.get(&destination_type).cloned()
    }
}

/// Tuning knobs for one dispatcher instance.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Upper bound on concurrently running delivery tasks.
    pub max_in_flight: usize,
    /// Per-adapter-call timeout; an elapsed call is a transient failure.
    pub delivery_timeout: Duration,
    /// Deadline for a whole dispatch pass; pairs still outstanding when it
    /// fires are recorded as transient timeouts.
    pub batch_deadline: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_in_flight: num_cpus::get() * 4,
            delivery_timeout: Duration::from_secs(30),
            batch_deadline: Duration::from_secs(120),
        }
    }
}

/// Fans an alert×destination mapping out to concurrent delivery tasks and
/// collects one [`DispatchStatus`] per pair.
pub struct Dispatcher {
    registry: Arc<AdapterRegistry>,
    limiter: Arc<Semaphore>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(registry: Arc<AdapterRegistry>, config: DispatcherConfig) -> Self {
        let limiter = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
        Self {
            registry,
            limiter,
            config,
        }
    }

    /// Delivers every (alert, destination) pair in `mapping` concurrently.
    ///
    /// Returns exactly one status per pair, in no particular order. Tasks
    /// share nothing mutable; each gets its own copy of the alert and
    /// destination.
    pub async fn dispatch(&self, mapping: &[(Alert, Vec<Destination>)]) -> Vec<DispatchStatus> {
        let pairs: Vec<(Arc<Alert>, Destination)> = mapping
            .iter()
            .flat_map(|(alert, destinations)| {
                let alert = Arc::new(alert.clone());
                destinations
                    .iter()
                    .map(move |d| (Arc::clone(&alert), d.clone()))
            })
            .collect();

        let total = pairs.len();
        if total == 0 {
            return Vec::new();
        }
        debug!(pairs = total, "dispatching alert batch");

        let (tx, mut rx) = mpsc::channel::<(usize, DispatchStatus)>(total);
        let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(total);

        for (index, (alert, destination)) in pairs.iter().enumerate() {
            let alert = Arc::clone(alert);
            let destination = destination.clone();
            let registry = Arc::clone(&self.registry);
            let limiter = Arc::clone(&self.limiter);
            let delivery_timeout = self.config.delivery_timeout;
            let tx = tx.clone();

            handles.push(tokio::spawn(async move {
                // The semaphore is never closed, so acquisition only fails
                // if the runtime is shutting down.
                let Ok(_permit) = limiter.acquire_owned().await else {
                    return;
                };
                let status =
                    deliver_one(&registry, &alert, &destination, delivery_timeout).await;
                let _ = tx.send((index, status)).await;
            }));
        }
        drop(tx);

        let mut slots: Vec<Option<DispatchStatus>> = vec![None; total];
        let mut received = 0usize;
        let deadline = tokio::time::sleep(self.config.batch_deadline);
        tokio::pin!(deadline);

        while received < total {
            tokio::select! {
                message = rx.recv() => {
                    match message {
                        Some((index, status)) => {
                            slots[index] = Some(status);
                            received += 1;
                        }
                        // Every sender is gone; remaining slots are filled
                        // below.
                        None => break,
                    }
                }
                _ = &mut deadline => {
                    warn!(
                        outstanding = total - received,
                        "batch deadline exceeded, abandoning outstanding deliveries"
                    );
                    break;
                }
            }
        }

        for handle in handles {
            handle.abort();
        }

        pairs
            .iter()
            .zip(slots)
            .map(|((alert, destination), slot)| {
                slot.unwrap_or_else(|| {
                    DispatchStatus::transient(
                        &alert.alert_id,
                        &destination.destination_id,
                        "dispatch deadline exceeded",
                    )
                })
            })
            .collect()
    }
}

/// Runs a single delivery attempt and converts every possible outcome into
/// a status record.
async fn deliver_one(
    registry: &AdapterRegistry,
    alert: &Alert,
    destination: &Destination,
    delivery_timeout: Duration,
) -> DispatchStatus {
    let alert_id = alert.alert_id.as_str();
    let destination_id = destination.destination_id.as_str();

    let Some(adapter) = registry.get(destination.destination_type) else {
        warn!(
            alert_id,
            destination_id,
            destination_type = %destination.destination_type,
            "no adapter registered for destination type"
        );
        return DispatchStatus::terminal(alert_id, destination_id, "unsupported output type");
    };

    // catch_unwind is a last-resort safety net against adapter contract
    // violations; well-behaved adapters report failure through their
    // response value.
    let attempt = AssertUnwindSafe(adapter.deliver(alert, destination)).catch_unwind();

    let status = match tokio::time::timeout(delivery_timeout, attempt).await {
        Err(_elapsed) => {
            warn!(alert_id, destination_id, "delivery timed out");
            DispatchStatus::transient(alert_id, destination_id, "delivery timed out")
        }
        Ok(Err(_panic)) => {
            error!(
                alert_id,
                destination_id,
                adapter = adapter.name(),
                "adapter panicked while sending alert"
            );
            DispatchStatus::terminal(alert_id, destination_id, "panic sending alert")
        }
        Ok(Ok(Err(e))) => {
            error!(
                alert_id,
                destination_id,
                adapter = adapter.name(),
                error = %e,
                "adapter returned no usable response"
            );
            DispatchStatus::terminal(alert_id, destination_id, "output response is nil")
        }
        Ok(Ok(Ok(response))) => DispatchStatus::from_response(alert_id, destination_id, response),
    };

    if status.success {
        metrics::counter!("alert_deliveries_total").increment(1);
        debug!(alert_id, destination_id, "alert delivered");
    } else {
        metrics::counter!("alert_delivery_failures_total").increment(1);
    }
    status
}
