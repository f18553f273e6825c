//! Stream retention pruner.
//!
//! Deletes stream records older than the retention window (24 hours by
//! default). The shard's trim horizon follows automatically: iterators
//! pointing into pruned territory are served from the earliest surviving
//! record.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::interval;
use tracing::{error, info};

use crate::streams::StreamStore;

/// Background worker enforcing stream record retention.
pub struct StreamPruner {
    streams: Arc<StreamStore>,
    prune_interval: Duration,
}

impl StreamPruner {
    pub fn new(streams: Arc<StreamStore>, prune_interval: Duration) -> Self {
        Self {
            streams,
            prune_interval,
        }
    }

    /// Run until the shutdown signal flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.prune_interval, "Starting stream pruner");
        let mut ticker = interval(self.prune_interval.max(Duration::from_secs(1)));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.streams.prune_expired().await {
                        error!(error = %err, "Stream pruning failed");
                    }
                }
                changed = shutdown.changed() => {
                    // A closed channel means the owner is gone; stop too.
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Stream pruner shutting down");
                        return;
                    }
                }
            }
        }
    }
}
