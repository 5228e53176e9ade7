//! The cached directory of delivery destinations.
//!
//! The cache holds a TTL-bounded snapshot of every configured destination,
//! fetched lazily from the external destination directory. Refreshes replace
//! the whole snapshot atomically; nothing ever mutates it in place, so
//! concurrent dispatch tasks can read it without locking.

use crate::core::{DeliveryError, Destination, DestinationDirectory};
use anyhow::Result;
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

struct Snapshot {
    destinations: Arc<Vec<Destination>>,
    fetched_at: Instant,
}

/// TTL-bounded, lazily initialized snapshot of all configured destinations.
///
/// Constructed once by the process entry point and shared by reference, so
/// each test can build its own isolated instance.
pub struct DestinationCache {
    directory: Arc<dyn DestinationDirectory>,
    snapshot: ArcSwapOption<Snapshot>,
    refresh_interval: Duration,
    // Serializes refreshes so concurrent callers inside one expiry window
    // trigger exactly one upstream fetch.
    refresh_lock: Mutex<()>,
}

impl DestinationCache {
    pub fn new(directory: Arc<dyn DestinationDirectory>, refresh_interval: Duration) -> Self {
        Self {
            directory,
            snapshot: ArcSwapOption::new(None),
            refresh_interval,
            refresh_lock: Mutex::new(()),
        }
    }

    /// Returns the current destination snapshot, fetching from the directory
    /// if the cache is empty or older than the refresh interval.
    ///
    /// On fetch failure the stale snapshot is left untouched and the error
    /// is returned to the caller.
    pub async fn get(&self) -> Result<Arc<Vec<Destination>>, DeliveryError> {
        if let Some(fresh) = self.load_fresh() {
            return Ok(fresh);
        }

        let _guard = self.refresh_lock.lock().await;
        // Another caller may have refreshed while we waited for the lock.
        if let Some(fresh) = self.load_fresh() {
            return Ok(fresh);
        }

        debug!("destination cache expired, fetching from directory");
        let destinations = self.directory.fetch_all().await.map_err(|e| {
            warn!(error = %e, "destination directory fetch failed, keeping stale snapshot");
            DeliveryError::Directory(e.to_string())
        })?;

        let destinations = Arc::new(destinations);
        self.snapshot.store(Some(Arc::new(Snapshot {
            destinations: Arc::clone(&destinations),
            fetched_at: Instant::now(),
        })));
        metrics::gauge!("destination_cache_size").set(destinations.len() as f64);
        info!(count = destinations.len(), "destination cache refreshed");
        Ok(destinations)
    }

    /// Drops the cached snapshot so the next [`get`](Self::get) fetches a
    /// fresh one. Operator-triggered direct deliveries call this to trade
    /// latency for freshness.
    pub fn force_expire(&self) {
        debug!("destination cache force-expired");
        self.snapshot.store(None);
    }

    fn load_fresh(&self) -> Option<Arc<Vec<Destination>>> {
        let snapshot = self.snapshot.load_full()?;
        if snapshot.fetched_at.elapsed() < self.refresh_interval {
            Some(Arc::clone(&snapshot.destinations))
        } else {
            None
        }
    }
}

/// Directory client that fetches destination configs over HTTP.
pub struct HttpDirectoryClient {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpDirectoryClient {
    pub fn new(endpoint: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { endpoint, client })
    }
}

#[async_trait]
impl DestinationDirectory for HttpDirectoryClient {
    async fn fetch_all(&self) -> Result<Vec<Destination>> {
        let response = self.client.get(&self.endpoint).send().await?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("destination directory returned status {status}");
        }
        Ok(response.json().await?)
    }
}
