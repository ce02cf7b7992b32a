// src/core/cache/mod.rs

//! The transform-result cache: key generation, a hot in-process LRU,
//! format-aware multi-probe lookup, validated writes, tag- and path-based
//! purging, and the expiration sweep.
//!
//! Cache failures are never fatal to the enclosing request: read failures
//! degrade to misses, write failures are logged and dropped.

pub mod admission;
pub mod key;
mod purge;
pub mod types;

pub use admission::RejectReason;
pub use key::{ClientInfo, FormatSupport, OutputFormat, TransformOptions, fnv1a_32, transform_key};
pub use types::{
    AspectCropInfo, CacheMetadata, CacheRequest, CacheStats, OriginResult, StorageKind,
    TransformResult, TransformedResponse,
};

use crate::config::TransformCacheConfig;
use crate::core::deferred::DeferredWork;
use crate::core::errors::RefractError;
use crate::core::kv::{KvStore, ListOptions, ListPage, PutOptions};
use crate::core::metrics;
use chrono::Utc;
use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use purge::PurgePredicate;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info, warn};

/// Upper bound on the in-flight write dedup set. Crossing it clears the set;
/// duplicate suppression is best-effort and per-instance only.
const INFLIGHT_CAPACITY: usize = 1024;

/// The transform-result cache manager.
pub struct TransformCache {
    kv: Arc<dyn KvStore>,
    config: TransformCacheConfig,
    /// Hot copies keyed by the auto-format key.
    memory: Mutex<LruCache<String, TransformResult>>,
    hits: AtomicU64,
    misses: AtomicU64,
    /// In-flight write dedup: `(url, canonical options)` pairs.
    inflight: DashMap<String, ()>,
}

impl TransformCache {
    pub fn new(kv: Arc<dyn KvStore>, config: TransformCacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.memory_cache_size.max(1)).unwrap();
        Self {
            kv,
            config,
            memory: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            inflight: DashMap::new(),
        }
    }

    pub fn config(&self) -> &TransformCacheConfig {
        &self.config
    }

    fn key_for(&self, request: &CacheRequest, options: &TransformOptions, format: OutputFormat) -> String {
        transform_key(&self.config.prefix, &request.url, options, format)
    }

    /// The KV probe order for a lookup: explicit non-auto format, then
    /// client-supported `avif`/`webp`, then `auto`, then the fixed fallback
    /// sweep, each format probed at most once.
    fn probe_order(&self, options: &TransformOptions) -> Vec<OutputFormat> {
        let mut order: Vec<OutputFormat> = Vec::with_capacity(8);
        let mut push = |format: OutputFormat, order: &mut Vec<OutputFormat>| {
            if !order.contains(&format) {
                order.push(format);
            }
        };

        let requested = options.requested_format();
        if requested != OutputFormat::Auto && requested != OutputFormat::Json {
            push(requested, &mut order);
        }
        if let Some(client) = &options.client_info {
            if client.format_support.avif {
                push(OutputFormat::Avif, &mut order);
            }
            if client.format_support.webp {
                push(OutputFormat::Webp, &mut order);
            }
        }
        push(OutputFormat::Auto, &mut order);
        for format in OutputFormat::FALLBACK_PROBES {
            push(format, &mut order);
        }
        order
    }

    /// Returns whether an artifact exists for the request, probing in the
    /// same order as `get`. Does not touch the hit/miss counters, and any
    /// KV failure reads as absence.
    pub async fn is_cached(&self, request: &CacheRequest, options: &TransformOptions) -> bool {
        if !self.config.enabled {
            return false;
        }
        let auto_key = self.key_for(request, options, OutputFormat::Auto);
        if self.memory.lock().contains(&auto_key) {
            return true;
        }
        for format in self.probe_order(options) {
            let key = self.key_for(request, options, format);
            match self.kv.get_with_metadata(&key).await {
                Ok((Some(_), metadata)) if metadata_is_image(metadata.as_ref()) => return true,
                Ok(_) => {}
                Err(e) => {
                    debug!(%key, "isCached probe failed, treating as absent: {e}");
                }
            }
        }
        false
    }

    /// Format-aware lookup. The stored output format may differ from the one
    /// requested; the probe sequence hides that. Every KV hit is promoted
    /// into the hot LRU under the auto-format key.
    pub async fn get(
        &self,
        request: &CacheRequest,
        options: &TransformOptions,
    ) -> Option<TransformResult> {
        if !self.config.enabled {
            return None;
        }
        let auto_key = self.key_for(request, options, OutputFormat::Auto);

        if let Some(hit) = self.memory.lock().get(&auto_key).cloned() {
            self.record_hit();
            return Some(hit);
        }

        for format in self.probe_order(options) {
            let key = if format == OutputFormat::Auto {
                auto_key.clone()
            } else {
                self.key_for(request, options, format)
            };

            match self.kv.get_with_metadata(&key).await {
                Ok((Some(bytes), Some(raw_metadata))) => {
                    // A hit without a usable image metadata record is a miss.
                    let Ok(metadata) = serde_json::from_value::<CacheMetadata>(raw_metadata)
                    else {
                        continue;
                    };
                    if !metadata.content_type.starts_with("image/") {
                        continue;
                    }
                    let result = TransformResult {
                        bytes,
                        metadata,
                        key,
                    };
                    self.memory.lock().put(auto_key.clone(), result.clone());
                    self.record_hit();
                    if self.config.debug {
                        debug!(format = format.as_str(), key = %result.key, "cache hit");
                    }
                    return Some(result);
                }
                Ok(_) => {
                    if self.config.debug {
                        debug!(format = format.as_str(), "cache probe miss");
                    }
                }
                Err(e) => {
                    debug!(format = format.as_str(), "cache probe failed, treating as miss: {e}");
                }
            }
        }

        self.record_miss();
        None
    }

    /// Validates and stores a transformed response. Rejections are silent;
    /// write failures are logged and never propagate. With
    /// `background_indexing` enabled and a deferred handle supplied, the KV
    /// write happens behind the handle and the caller returns immediately.
    pub async fn put(
        self: &Arc<Self>,
        request: &CacheRequest,
        response: &TransformedResponse,
        origin: &OriginResult,
        options: &TransformOptions,
        deferred: Option<&Arc<dyn DeferredWork>>,
    ) {
        if !self.config.enabled {
            return;
        }

        let dedup = format!("{}|{}", request.url, options.canonical_json());
        if self.inflight.len() >= INFLIGHT_CAPACITY {
            self.inflight.clear();
        }
        if self.inflight.insert(dedup.clone(), ()).is_some() {
            debug!(url = %request.url, "duplicate in-flight cache write suppressed");
            return;
        }

        if let Err(reason) = admission::evaluate(&self.config, request, response, origin, options) {
            metrics::CACHE_REJECTED_TOTAL.inc();
            debug!(url = %request.url, %reason, "response rejected by cache admission");
            self.inflight.remove(&dedup);
            return;
        }

        let stored_format = response
            .content_type()
            .and_then(OutputFormat::from_content_type)
            .or_else(|| match options.requested_format() {
                OutputFormat::Auto | OutputFormat::Json => None,
                explicit => Some(explicit),
            })
            .unwrap_or(OutputFormat::Auto);

        let key = self.key_for(request, options, stored_format);
        let auto_key = self.key_for(request, options, OutputFormat::Auto);
        let metadata = self.build_metadata(request, response, origin, options);
        let value = response.body.clone();
        let ttl = metadata.ttl;

        let this = Arc::clone(self);
        let write = async move {
            let put_opts = PutOptions {
                metadata: serde_json::to_value(&metadata).ok(),
                ttl_seconds: Some(ttl),
            };
            match this.kv.put(&key, value.clone(), put_opts).await {
                Ok(()) => {
                    metrics::CACHE_WRITES_TOTAL.inc();
                    let result = TransformResult {
                        bytes: value,
                        metadata,
                        key,
                    };
                    this.memory.lock().put(auto_key, result);
                }
                Err(e) => error!(%key, "transform cache write failed: {e}"),
            }
            this.inflight.remove(&dedup);
        };

        match deferred {
            Some(handle) if self.config.background_indexing => handle.defer(Box::pin(write)),
            _ => write.await,
        }
    }

    fn build_metadata(
        &self,
        request: &CacheRequest,
        response: &TransformedResponse,
        origin: &OriginResult,
        options: &TransformOptions,
    ) -> CacheMetadata {
        // Admission guarantees an image content type at this point.
        let content_type = response.content_type().unwrap_or("image/unknown").to_string();
        let ttl = self
            .config
            .content_type_ttls
            .get(&content_type)
            .copied()
            .unwrap_or(self.config.default_ttl);
        let timestamp = Utc::now().timestamp_millis();
        let size = response.body.len() as u64;

        let mut tags = response.cache_tags();
        if let Some(segment) = request.first_path_segment()
            && !tags.iter().any(|t| t == segment)
        {
            tags.push(segment.to_string());
        }

        let original_size = origin.effective_size();
        let compression_ratio = original_size
            .filter(|&original| original > 0)
            .map(|original| size as f64 / original as f64);

        let aspect_crop_info = options.is_aspect_crop().then(|| AspectCropInfo {
            aspect: options.aspect.clone().unwrap_or_default(),
            focal: options.focal.clone(),
        });

        CacheMetadata {
            url: request.url.to_string(),
            timestamp,
            ttl,
            expiration: timestamp + (ttl as i64) * 1000,
            content_type,
            size,
            width: options.width,
            height: options.height,
            transform_options: serde_json::to_value(options).unwrap_or_default(),
            tags,
            storage_type: origin.storage_type,
            original_size,
            compression_ratio,
            aspect_crop_info,
        }
    }

    /// Deletes the canonical key and every format-variant key for the same
    /// logical request, and evicts the hot copy. Failures are logged; the
    /// operation is idempotent.
    pub async fn delete(&self, request: &CacheRequest, options: &TransformOptions) {
        let auto_key = self.key_for(request, options, OutputFormat::Auto);
        for format in OutputFormat::KEY_FORMATS {
            let key = self.key_for(request, options, format);
            if let Err(e) = self.kv.delete(&key).await {
                warn!(%key, "cache delete failed: {e}");
            }
        }
        self.memory.lock().pop(&auto_key);
    }

    /// Removes every entry whose metadata tags contain `tag`.
    pub async fn purge_by_tag(
        self: &Arc<Self>,
        tag: &str,
        deferred: Option<&Arc<dyn DeferredWork>>,
    ) -> Result<usize, RefractError> {
        self.run_sweep(PurgePredicate::Tag(tag.to_string()), None, deferred)
            .await
    }

    /// Removes every entry whose metadata URL contains `substring`.
    pub async fn purge_by_path(
        self: &Arc<Self>,
        substring: &str,
        deferred: Option<&Arc<dyn DeferredWork>>,
    ) -> Result<usize, RefractError> {
        self.run_sweep(
            PurgePredicate::PathSubstring(substring.to_string()),
            None,
            deferred,
        )
        .await
    }

    /// Prunes entries whose recorded expiration has passed. The store's own
    /// TTL normally handles this; the sweep catches entries written with
    /// longer KV expirations than their metadata advertises.
    pub async fn perform_maintenance(
        self: &Arc<Self>,
        max_to_prune: usize,
        deferred: Option<&Arc<dyn DeferredWork>>,
    ) -> Result<usize, RefractError> {
        let now_ms = Utc::now().timestamp_millis();
        self.run_sweep(
            PurgePredicate::ExpiredBefore(now_ms),
            (max_to_prune > 0).then_some(max_to_prune),
            deferred,
        )
        .await
    }

    /// Runs a sweep inline, or dispatches it behind the deferred handle when
    /// background indexing is configured. A dispatched sweep returns 0
    /// immediately; the real count is logged on completion.
    async fn run_sweep(
        self: &Arc<Self>,
        predicate: PurgePredicate,
        max_to_prune: Option<usize>,
        deferred: Option<&Arc<dyn DeferredWork>>,
    ) -> Result<usize, RefractError> {
        let prefix = format!("{}:", self.config.prefix);

        if self.config.background_indexing && let Some(handle) = deferred {
            let this = Arc::clone(self);
            handle.defer(Box::pin(async move {
                match purge::sweep(
                    &this.kv,
                    &prefix,
                    &predicate,
                    this.config.purge_delay_ms,
                    max_to_prune,
                )
                .await
                {
                    Ok(count) => {
                        metrics::CACHE_PURGED_TOTAL.inc_by(count as f64);
                        this.memory.lock().clear();
                        info!(count, "background purge sweep finished");
                    }
                    Err(e) => warn!("background purge sweep failed: {e}"),
                }
            }));
            return Ok(0);
        }

        let count = purge::sweep(
            &self.kv,
            &prefix,
            &predicate,
            self.config.purge_delay_ms,
            max_to_prune,
        )
        .await?;
        metrics::CACHE_PURGED_TOTAL.inc_by(count as f64);
        self.memory.lock().clear();
        Ok(count)
    }

    /// One page of raw cache entries, for admin listings.
    pub async fn list_entries(
        &self,
        limit: usize,
        cursor: Option<String>,
    ) -> Result<ListPage, RefractError> {
        self.kv
            .list(ListOptions {
                prefix: format!("{}:", self.config.prefix),
                cursor,
                limit,
            })
            .await
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let memory = self.memory.lock();
        CacheStats {
            enabled: self.config.enabled,
            prefix: self.config.prefix.clone(),
            hits,
            misses,
            hit_rate: if total > 0 {
                hits as f64 / total as f64
            } else {
                0.0
            },
            memory_entries: memory.len(),
            memory_capacity: memory.cap().get(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        metrics::CACHE_HITS_TOTAL.inc();
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::CACHE_MISSES_TOTAL.inc();
    }
}

fn metadata_is_image(metadata: Option<&serde_json::Value>) -> bool {
    metadata
        .and_then(|m| m.get("contentType"))
        .and_then(serde_json::Value::as_str)
        .is_some_and(|ct| ct.starts_with("image/"))
}
