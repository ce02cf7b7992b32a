// src/core/tasks/cache_maintenance.rs

//! A background task that periodically prunes cache entries whose recorded
//! expiration has passed.
//!
//! The store's own TTL removes most entries; this sweep catches the ones
//! whose metadata advertises an earlier expiration than their KV lifetime.

use crate::core::cache::TransformCache;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Upper bound on deletions per maintenance cycle.
const MAX_PRUNE_PER_CYCLE: usize = 500;

/// The background task struct for the cache expiration sweep.
pub struct CacheMaintenanceTask {
    cache: Arc<TransformCache>,
    interval: Duration,
}

impl CacheMaintenanceTask {
    pub fn new(cache: Arc<TransformCache>, interval: Duration) -> Self {
        Self { cache, interval }
    }

    /// The main run loop. The sweep runs inline here; this task is already
    /// background work, so it never re-dispatches through a deferred handle.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("Cache maintenance task started.");
        let mut interval = tokio::time::interval(self.interval);
        // The first tick fires immediately; skip it so startup stays quiet.
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.cache.perform_maintenance(MAX_PRUNE_PER_CYCLE, None).await {
                        Ok(0) => {}
                        Ok(pruned) => info!(pruned, "cache maintenance cycle finished"),
                        Err(e) => warn!("cache maintenance cycle failed: {e}"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Cache maintenance task shutting down.");
                    return;
                }
            }
        }
    }
}
