//! Per-host minimum-interval gate.
//!
//! Requests to the same host are spaced by at least the interval the caller
//! asks for; requests to different hosts never wait on each other. The gate
//! uses `tokio::time::Instant`, so tests can pause the clock instead of
//! sleeping for real.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument};
use url::Url;

/// Shared politeness gate keyed by lowercase host name.
///
/// Wrap in `Arc` and hand a clone to every [`FetchClient`](super::FetchClient)
/// so sources crawling the same host serialize on one slot.
#[derive(Debug, Default)]
pub struct HostRateLimiter {
    /// Last request time per host. The `Arc` lets us drop the map shard
    /// guard before awaiting on the per-host mutex.
    hosts: DashMap<String, Arc<Mutex<Option<Instant>>>>,
}

impl HostRateLimiter {
    /// Creates an empty limiter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until a request to `url`'s host may proceed, then claims the slot.
    ///
    /// The first request to a host is immediate. A zero `min_interval`
    /// never waits. Returns how long the caller was held back.
    #[instrument(level = "debug", skip(self, url), fields(host))]
    pub async fn acquire(&self, url: &Url, min_interval: Duration) -> Duration {
        let host = host_key(url);
        tracing::Span::current().record("host", host.as_str());

        let slot = self
            .hosts
            .entry(host.clone())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone();

        let mut last = slot.lock().await;
        let mut waited = Duration::ZERO;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < min_interval {
                waited = min_interval - elapsed;
                debug!(%host, delay_ms = waited.as_millis() as u64, "Throttling request");
                tokio::time::sleep(waited).await;
            }
        }
        *last = Some(Instant::now());
        waited
    }
}

/// Lowercase host used as the limiter key; "unknown" for host-less URLs.
pub fn host_key(url: &Url) -> String {
    url.host_str()
        .map(str::to_lowercase)
        .unwrap_or_else(|| "unknown".to_string())
}
