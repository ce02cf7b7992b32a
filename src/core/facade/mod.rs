// src/core/facade/mod.rs

//! The cached configuration facade: a synchronous accessor view over the
//! config API, backed by a hot in-process copy that a background task
//! refreshes.
//!
//! The hot copy is an `Arc<Value>` behind a `parking_lot::RwLock` and is
//! replaced whole on every successful refresh, so readers never observe a
//! half-merged tree. When refreshes fail, callers keep seeing the last
//! successful copy (or the environment-derived fallback before the first
//! success).

pub mod merge;

pub use merge::{apply_emergency_overlay, apply_feature_overlays, deep_merge, merge_snapshot};

use crate::config::{ConfigFacadeConfig, Environment};
use crate::core::config_api::ConfigApi;
use crate::core::errors::RefractError;
use crate::core::metrics;
use crate::core::paths::get_path;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tracing::{info, warn};

pub struct ConfigFacade {
    api: Arc<ConfigApi>,
    environment: Environment,
    refresh_interval: Duration,
    /// The environment-derived snapshot used before the first successful
    /// refresh and to patch holes in merged configs.
    fallback: Value,
    /// The hot copy. Swapped whole, never edited in place.
    current: RwLock<Arc<Value>>,
    consecutive_failures: AtomicU32,
    initialized: AtomicBool,
}

impl ConfigFacade {
    pub fn new(
        api: Arc<ConfigApi>,
        options: &ConfigFacadeConfig,
        environment: Environment,
        env: &HashMap<String, String>,
    ) -> Self {
        let fallback = fallback_from_env(env, environment);
        Self {
            api,
            environment,
            refresh_interval: Duration::from_millis(options.refresh_interval_ms),
            current: RwLock::new(Arc::new(fallback.clone())),
            fallback,
            consecutive_failures: AtomicU32::new(0),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Performs one synchronous refresh and applies the emergency overlay.
    /// A failed refresh keeps the fallback; the facade is usable either way.
    pub async fn initialize(&self) {
        if let Err(e) = self.refresh().await {
            warn!("initial config refresh failed, serving fallback: {e}");
        }
        {
            let mut guard = self.current.write();
            let mut overlaid = (**guard).clone();
            apply_emergency_overlay(&mut overlaid, self.environment);
            *guard = Arc::new(overlaid);
        }
        self.initialized.store(true, Ordering::Release);
        info!(environment = self.environment.as_str(), "config facade initialized");
    }

    /// Loads, merges, and atomically installs a fresh hot copy. Updates the
    /// consecutive-failure counter in both directions.
    pub async fn refresh(&self) -> Result<(), RefractError> {
        match self.load_merged().await {
            Ok(merged) => {
                *self.current.write() = Arc::new(merged);
                self.consecutive_failures.store(0, Ordering::Relaxed);
                metrics::CONFIG_REFRESH_SUCCESS_TOTAL.inc();
                metrics::CONFIG_REFRESH_CONSECUTIVE_FAILURES.set(0.0);
                Ok(())
            }
            Err(e) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                metrics::CONFIG_REFRESH_FAILURE_TOTAL.inc();
                metrics::CONFIG_REFRESH_CONSECUTIVE_FAILURES.set(failures as f64);
                Err(e)
            }
        }
    }

    async fn load_merged(&self) -> Result<Value, RefractError> {
        let snapshot = self
            .api
            .get_current_resolved()
            .await?
            .ok_or_else(|| RefractError::NotFound("no active configuration version".to_string()))?;

        let mut merged = merge_snapshot(&self.fallback, &snapshot);
        apply_feature_overlays(&mut merged, self.environment);
        Ok(merged)
    }

    /// The current hot copy. Cheap to call; the `Arc` pins the snapshot the
    /// caller observed even across a concurrent refresh.
    pub fn get_config(&self) -> Arc<Value> {
        Arc::clone(&self.current.read())
    }

    /// One top-level section of the hot copy.
    pub fn get_section(&self, name: &str) -> Option<Value> {
        self.get_config().get(name).cloned()
    }

    /// Dotted lookup over the hot copy.
    pub fn get_value(&self, path: &str, default: Value) -> Value {
        get_path(&self.get_config(), path)
            .cloned()
            .unwrap_or(default)
    }

    /// Feature flags live under the top-level `features` section of the
    /// merged tree.
    pub fn is_feature_enabled(&self, name: &str) -> bool {
        get_path(&self.get_config(), &format!("features.{name}"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Whether a response for `path` may be served as immutable. True when
    /// `cache.immutableContent.enabled` and any of: a path pattern matches,
    /// the content type contains a configured substring, or the derivative
    /// name is listed.
    pub fn is_immutable_content(
        &self,
        path: &str,
        content_type: Option<&str>,
        derivative: Option<&str>,
    ) -> bool {
        let config = self.get_config();
        let immutable = match get_path(&config, "cache.immutableContent") {
            Some(section) => section,
            None => return false,
        };
        if immutable.get("enabled").and_then(Value::as_bool) != Some(true) {
            return false;
        }

        let normalized = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };

        let path_match = immutable
            .get("paths")
            .and_then(Value::as_array)
            .is_some_and(|patterns| {
                patterns
                    .iter()
                    .filter_map(Value::as_str)
                    .filter_map(glob_to_regex)
                    .any(|re| re.is_match(&normalized))
            });
        if path_match {
            return true;
        }

        let content_type_match = content_type.is_some_and(|ct| {
            immutable
                .get("contentTypes")
                .and_then(Value::as_array)
                .is_some_and(|types| {
                    types
                        .iter()
                        .filter_map(Value::as_str)
                        .any(|fragment| ct.contains(fragment))
                })
        });
        if content_type_match {
            return true;
        }

        derivative.is_some_and(|name| {
            immutable
                .get("derivatives")
                .and_then(Value::as_array)
                .is_some_and(|names| names.iter().any(|d| d.as_str() == Some(name)))
        })
    }
}

/// Converts a glob pattern to an anchored regex: `*` → `.*`, `?` → `.`,
/// `{a,b}` → `(a|b)`; everything else is matched literally.
pub fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut translated = String::with_capacity(pattern.len() + 8);
    translated.push('^');
    let mut brace_depth = 0usize;
    for ch in pattern.chars() {
        match ch {
            '*' => translated.push_str(".*"),
            '?' => translated.push('.'),
            '{' => {
                brace_depth += 1;
                translated.push('(');
            }
            '}' => {
                brace_depth = brace_depth.saturating_sub(1);
                translated.push(')');
            }
            ',' if brace_depth > 0 => translated.push('|'),
            c if "\\.+()[]^$|".contains(c) => {
                translated.push('\\');
                translated.push(c);
            }
            c => translated.push(c),
        }
    }
    translated.push('$');
    Regex::new(&translated).ok()
}

static TRUTHY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^(1|true|yes|on)$").unwrap());

fn env_flag(env: &HashMap<String, String>, name: &str) -> bool {
    env.get(name).is_some_and(|v| TRUTHY.is_match(v))
}

/// Builds the construction-time fallback snapshot from environment
/// variables. It carries every section the merge machinery treats as
/// required, with conservative defaults.
fn fallback_from_env(env: &HashMap<String, String>, environment: Environment) -> Value {
    let ttl_ok = env
        .get("CACHE_TTL_OK")
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(86_400);

    let mut storage = json!({
        "priority": ["r2", "remote", "fallback"],
    });
    if let Some(url) = env.get("REMOTE_URL") {
        storage["remoteUrl"] = json!(url);
    }
    if let Some(url) = env.get("FALLBACK_URL") {
        storage["fallbackUrl"] = json!(url);
    }

    json!({
        "environment": environment.as_str(),
        "features": {
            "forceTransformCache": false,
        },
        "debug": {
            "enabled": env_flag(env, "DEBUG"),
            "forceDebugHeaders": false,
            "allowedEnvironments": ["development"],
        },
        "cache": {
            "enabled": true,
            "ttl": {
                "ok": ttl_ok,
                "clientError": 60,
                "serverError": 10,
            },
            "allowedEnvironments": [],
            "immutableContent": {
                "enabled": false,
                "paths": [],
                "contentTypes": [],
                "derivatives": [],
            },
        },
        "storage": storage,
        "responsive": {
            "breakpoints": [320, 640, 768, 1024, 1440, 1920],
            "quality": 85,
        },
        "derivatives": {},
        "transform": {},
    })
}
