//! Periodic cache refresh task.

use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::cache::InstanceCache;
use crate::error::FetchError;

/// Re-lists instances on a fixed interval.
#[derive(Debug, Clone)]
pub struct Refresher {
    cache: InstanceCache,
    interval: Duration,
}

impl Refresher {
    /// Create a refresher for `cache` ticking every `interval`.
    pub fn new(cache: InstanceCache, interval: Duration) -> Self {
        Self { cache, interval }
    }

    /// Run a single refresh cycle. Failures are logged and returned; the
    /// cache keeps its previous snapshot.
    pub async fn refresh_once(&self) -> Result<(), FetchError> {
        let result = self.cache.refresh().await;
        if let Err(ref e) = result {
            error!(error = %e, "instance cache refresh failed");
        }
        result
    }

    /// Refresh every interval until `shutdown` flips to `true`.
    ///
    /// The first refresh happens one interval after start; the caller is
    /// expected to have populated the cache already.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        if *shutdown.borrow() {
            return;
        }

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;

        info!(interval_secs = self.interval.as_secs(), "cache refresh task started");

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("cache refresh task shutting down");
                        return;
                    }
                }

                _ = interval.tick() => {
                    let _ = self.refresh_once().await;
                }
            }
        }
    }
}
