//! Retry planning and jittered re-enqueue of transiently failed deliveries.
//!
//! After a dispatch pass the coordinator partitions the statuses: successes
//! are done, permanent failures are logged and never seen again, and
//! transient failures become narrowed retry envelopes pushed back onto the
//! queue with a randomized delay. Because every envelope carries
//! `retry_count + 1` and the count is bounded, each alert reaches a terminal
//! state within `max_retry_count + 1` passes.

use crate::core::{Alert, DispatchStatus, RetryEnvelope, RetryQueue};
use itertools::Itertools;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Bounds for the retry protocol.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Per-alert cap on re-enqueues, global across all its destinations.
    pub max_retry_count: u32,
    /// Jitter window for the re-enqueue delay, drawn uniformly per message.
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retry_count: 10,
            min_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Partitions dispatch statuses into terminal outcomes and retry envelopes.
///
/// For each alert under the retry limit, every destination that failed
/// transiently yields one envelope narrowed to exactly that destination with
/// the count incremented once. At or above the limit, remaining transient
/// failures are logged as permanent and nothing is emitted; permanent
/// failures never produce envelopes regardless of the counter.
pub fn plan_retries(
    alerts: &[Alert],
    statuses: &[DispatchStatus],
    max_retry_count: u32,
) -> Vec<RetryEnvelope> {
    let alerts_by_id: HashMap<&str, &Alert> = alerts
        .iter()
        .map(|alert| (alert.alert_id.as_str(), alert))
        .collect();

    let grouped: HashMap<&str, Vec<&DispatchStatus>> = statuses
        .iter()
        .into_group_map_by(|status| status.alert_id.as_str());

    let mut envelopes = Vec::new();
    for (alert_id, group) in grouped {
        let Some(alert) = alerts_by_id.get(alert_id) else {
            warn!(alert_id, "dispatch status references an alert not in this pass");
            continue;
        };

        for status in group {
            if status.success {
                continue;
            }
            if !status.needs_retry {
                error!(
                    alert_id,
                    destination_id = %status.destination_id,
                    status_code = status.status_code,
                    message = %status.message,
                    "permanent delivery failure, will not retry"
                );
                metrics::counter!("alert_permanent_failures_total").increment(1);
                continue;
            }
            if alert.retry_count >= max_retry_count {
                error!(
                    alert_id,
                    destination_id = %status.destination_id,
                    retry_count = alert.retry_count,
                    max_retry_count,
                    "alert exhausted its retries, giving up on destination"
                );
                metrics::counter!("alert_retries_exhausted_total").increment(1);
                continue;
            }
            debug!(
                alert_id,
                destination_id = %status.destination_id,
                retry_count = alert.retry_count + 1,
                "planning retry"
            );
            envelopes.push(RetryEnvelope::narrowed(alert, &status.destination_id));
        }
    }
    envelopes
}

/// Re-enqueues partial failures after each dispatch pass.
pub struct RetryCoordinator {
    queue: Arc<dyn RetryQueue>,
    policy: RetryPolicy,
}

impl RetryCoordinator {
    pub fn new(queue: Arc<dyn RetryQueue>, policy: RetryPolicy) -> Self {
        Self { queue, policy }
    }

    /// Plans and enqueues retries for one dispatch pass. Returns the number
    /// of envelopes actually enqueued.
    ///
    /// Enqueue failures are logged and dropped: retries are best-effort and
    /// the dispatch pipeline must never block on queue backpressure.
    pub async fn process(&self, alerts: &[Alert], statuses: &[DispatchStatus]) -> usize {
        let envelopes = plan_retries(alerts, statuses, self.policy.max_retry_count);
        if envelopes.is_empty() {
            return 0;
        }

        let mut enqueued = 0;
        for envelope in &envelopes {
            let delay = self.jittered_delay();
            match self.queue.enqueue(envelope, delay).await {
                Ok(()) => {
                    metrics::counter!("alert_retries_enqueued_total").increment(1);
                    info!(
                        alert_id = %envelope.alert.alert_id,
                        destination_id = %envelope.alert.output_ids[0],
                        retry_count = envelope.alert.retry_count,
                        delay_secs = delay.as_secs(),
                        "retry enqueued"
                    );
                    enqueued += 1;
                }
                Err(e) => {
                    warn!(
                        alert_id = %envelope.alert.alert_id,
                        error = %e,
                        "dropping retry, enqueue failed"
                    );
                }
            }
        }
        enqueued
    }

    // Uniform jitter spreads retries of a flaky destination out in time
    // instead of hammering it again in lockstep.
    fn jittered_delay(&self) -> Duration {
        let min = self.policy.min_delay.as_secs();
        let max = self.policy.max_delay.as_secs().max(min);
        Duration::from_secs(rand::rng().random_range(min..=max))
    }
}
