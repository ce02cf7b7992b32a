// src/core/tasks/config_refresh.rs

//! The background configuration refresh loop.
//!
//! A single cooperating task: it wakes on the configured interval, asks the
//! facade to refresh, and backs off exponentially while refreshes fail.
//! Callers of the facade always observe the last successful snapshot. The
//! loop never terminates voluntarily; a panic inside a cycle restarts the
//! loop after a fixed delay, and only the shutdown channel ends it.

use crate::core::facade::ConfigFacade;
use futures::FutureExt;
use rand::Rng;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Upper bound on the failure backoff.
const MAX_BACKOFF: Duration = Duration::from_secs(5 * 60);
/// Delay before the loop restarts after a panic.
const RESTART_DELAY: Duration = Duration::from_secs(10);
/// Jitter applied to wake-ups, in milliseconds.
const JITTER_MS: u64 = 1_000;

/// The background task struct for the configuration refresh loop.
pub struct ConfigRefreshTask {
    facade: Arc<ConfigFacade>,
}

impl ConfigRefreshTask {
    pub fn new(facade: Arc<ConfigFacade>) -> Self {
        Self { facade }
    }

    /// The main run loop. Returns only when the shutdown channel fires.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("Config refresh task started.");
        loop {
            let cycles = AssertUnwindSafe(self.run_cycles(&mut shutdown_rx)).catch_unwind();
            match cycles.await {
                Ok(()) => {
                    info!("Config refresh task shutting down.");
                    return;
                }
                Err(_) => {
                    error!(
                        "Config refresh loop panicked; restarting in {}s.",
                        RESTART_DELAY.as_secs()
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(RESTART_DELAY) => {}
                        _ = shutdown_rx.recv() => {
                            info!("Config refresh task shutting down.");
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Runs refresh cycles until shutdown. Returning means shutdown.
    async fn run_cycles(&self, shutdown_rx: &mut broadcast::Receiver<()>) {
        // Initial wake is jittered so a fleet of instances does not refresh
        // in lockstep.
        let initial = jitter_around(self.facade.refresh_interval());
        tokio::select! {
            _ = tokio::time::sleep(initial) => {}
            _ = shutdown_rx.recv() => return,
        }

        loop {
            match self.facade.refresh().await {
                Ok(()) => debug!("config refresh succeeded"),
                Err(e) => warn!(
                    failures = self.facade.consecutive_failures(),
                    "config refresh failed, keeping last-known-good: {e}"
                ),
            }

            let delay = self.next_delay();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.recv() => return,
            }
        }
    }

    /// Base interval while healthy; `min(base * 2^failures + jitter, 5 min)`
    /// while failing.
    fn next_delay(&self) -> Duration {
        let failures = self.facade.consecutive_failures();
        let base = self.facade.refresh_interval();
        if failures == 0 {
            return base;
        }
        let backoff_ms = (base.as_millis() as u64)
            .saturating_mul(2u64.saturating_pow(failures.min(16)))
            .saturating_add(rand::thread_rng().gen_range(0..=JITTER_MS));
        Duration::from_millis(backoff_ms).min(MAX_BACKOFF)
    }
}

/// `base ± 1s`, clamped to at least one second.
fn jitter_around(base: Duration) -> Duration {
    let jitter: i64 = rand::thread_rng().gen_range(-(JITTER_MS as i64)..=(JITTER_MS as i64));
    let target = (base.as_millis() as i64).saturating_add(jitter).max(1_000);
    Duration::from_millis(target as u64)
}
