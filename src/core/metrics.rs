// src/core/metrics.rs

//! Defines and registers Prometheus metrics for service monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{Counter, Gauge, register_counter, register_gauge};

lazy_static! {
    // --- Transform cache counters ---
    /// The total number of successful transform-cache lookups (hot or KV).
    pub static ref CACHE_HITS_TOTAL: Counter =
        register_counter!("refract_cache_hits_total", "Total number of transform cache hits.").unwrap();
    /// The total number of failed transform-cache lookups.
    pub static ref CACHE_MISSES_TOTAL: Counter =
        register_counter!("refract_cache_misses_total", "Total number of transform cache misses.").unwrap();
    /// The total number of transform results written to the KV store.
    pub static ref CACHE_WRITES_TOTAL: Counter =
        register_counter!("refract_cache_writes_total", "Total number of transform results written.").unwrap();
    /// The total number of write candidates rejected by the admission predicate.
    pub static ref CACHE_REJECTED_TOTAL: Counter =
        register_counter!("refract_cache_admission_rejected_total", "Total number of responses rejected at cache admission.").unwrap();
    /// The total number of keys removed by purge and maintenance sweeps.
    pub static ref CACHE_PURGED_TOTAL: Counter =
        register_counter!("refract_cache_purged_keys_total", "Total number of cache keys removed by purge sweeps.").unwrap();

    // --- Config refresh counters ---
    /// The total number of successful configuration refreshes.
    pub static ref CONFIG_REFRESH_SUCCESS_TOTAL: Counter =
        register_counter!("refract_config_refresh_success_total", "Total number of successful config refreshes.").unwrap();
    /// The total number of failed configuration refreshes.
    pub static ref CONFIG_REFRESH_FAILURE_TOTAL: Counter =
        register_counter!("refract_config_refresh_failure_total", "Total number of failed config refreshes.").unwrap();
    /// The current number of consecutive configuration refresh failures.
    pub static ref CONFIG_REFRESH_CONSECUTIVE_FAILURES: Gauge =
        register_gauge!("refract_config_refresh_consecutive_failures", "Current consecutive config refresh failures.").unwrap();
}
