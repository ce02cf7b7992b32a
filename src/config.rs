// src/config.rs

//! Manages service configuration: loading, defaulting, and validation.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;

/// The deployment environment the service runs in. Controls how unresolved
/// environment-variable references are rendered and which overlays apply.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    Staging,
    #[default]
    Development,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Production => "production",
            Environment::Staging => "staging",
            Environment::Development => "development",
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

/// Configuration for the transform-result cache.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TransformCacheConfig {
    /// Master switch for the KV-backed transform cache.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Name of the KV namespace binding that holds transform results.
    #[serde(default = "default_binding")]
    pub binding: String,
    /// Key prefix for every transform cache entry.
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Responses larger than this are never cached, in bytes.
    #[serde(default = "default_max_size")]
    pub max_size: u64,
    /// TTL applied when `content_type_ttls` has no entry, in seconds.
    #[serde(default = "default_ttl")]
    pub default_ttl: u64,
    /// Per-content-type TTL overrides, in seconds.
    #[serde(default)]
    pub content_type_ttls: HashMap<String, u64>,
    /// If true, writes, purges, and maintenance run behind the deferred-work
    /// handle when one is supplied; otherwise they block the caller.
    #[serde(default = "default_true")]
    pub background_indexing: bool,
    /// Sleep between purge deletion batches, in milliseconds.
    #[serde(default = "default_purge_delay")]
    pub purge_delay_ms: u64,
    /// Path substrings that must never be cached.
    #[serde(default)]
    pub disallowed_paths: Vec<String>,
    /// Capacity of the in-process hot LRU.
    #[serde(default = "default_memory_cache_size")]
    pub memory_cache_size: usize,
    /// Emit verbose per-probe logging.
    #[serde(default)]
    pub debug: bool,
}

fn default_true() -> bool {
    true
}
fn default_binding() -> String {
    "TRANSFORM_KV".to_string()
}
fn default_prefix() -> String {
    "transform".to_string()
}
fn default_max_size() -> u64 {
    10 * 1024 * 1024 // 10 MiB
}
fn default_ttl() -> u64 {
    86_400 // 1 day
}
fn default_purge_delay() -> u64 {
    100
}
fn default_memory_cache_size() -> usize {
    100
}

impl Default for TransformCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            binding: default_binding(),
            prefix: default_prefix(),
            max_size: default_max_size(),
            default_ttl: default_ttl(),
            content_type_ttls: HashMap::new(),
            background_indexing: true,
            purge_delay_ms: default_purge_delay(),
            disallowed_paths: Vec::new(),
            memory_cache_size: default_memory_cache_size(),
            debug: false,
        }
    }
}

/// Configuration for the cached configuration facade.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ConfigFacadeConfig {
    /// Base interval between background configuration refreshes, in milliseconds.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_ms: u64,
}

fn default_refresh_interval() -> u64 {
    30_000
}

impl Default for ConfigFacadeConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: default_refresh_interval(),
        }
    }
}

/// Connection settings for the remote KV namespace used in production.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct KvConfig {
    /// Base URL of the KV HTTP endpoint. When absent the service must be
    /// given a store instance directly (tests use the in-memory double).
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Bearer token for the KV endpoint.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub token: Option<String>,
}

/// A raw representation of the config file before validation.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default)]
    environment: Environment,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    transform_cache: TransformCacheConfig,
    #[serde(default)]
    config_facade: ConfigFacadeConfig,
    #[serde(default)]
    kv: KvConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Represents the final, validated service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub environment: Environment,
    pub log_level: String,
    #[serde(default)]
    pub transform_cache: TransformCacheConfig,
    #[serde(default)]
    pub config_facade: ConfigFacadeConfig,
    #[serde(default)]
    pub kv: KvConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            log_level: default_log_level(),
            transform_cache: TransformCacheConfig::default(),
            config_facade: ConfigFacadeConfig::default(),
            kv: KvConfig::default(),
        }
    }
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        let raw: RawConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse TOML from '{path}'"))?;

        let config = Config {
            environment: raw.environment,
            log_level: raw.log_level,
            transform_cache: raw.transform_cache,
            config_facade: raw.config_facade,
            kv: raw.kv,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the resolved configuration to ensure logical consistency.
    pub fn validate(&self) -> Result<()> {
        let cache = &self.transform_cache;
        if cache.prefix.trim().is_empty() {
            return Err(anyhow!("transform_cache.prefix cannot be empty"));
        }
        if cache.prefix.contains(':') {
            return Err(anyhow!(
                "transform_cache.prefix cannot contain ':' (it is the key separator)"
            ));
        }
        if cache.max_size == 0 {
            return Err(anyhow!("transform_cache.max_size cannot be 0"));
        }
        if cache.default_ttl == 0 {
            return Err(anyhow!("transform_cache.default_ttl cannot be 0"));
        }
        if cache.memory_cache_size == 0 {
            return Err(anyhow!("transform_cache.memory_cache_size cannot be 0"));
        }
        for (content_type, ttl) in &cache.content_type_ttls {
            if *ttl == 0 {
                return Err(anyhow!(
                    "transform_cache.content_type_ttls['{content_type}'] cannot be 0"
                ));
            }
        }

        if self.config_facade.refresh_interval_ms < 1_000 {
            return Err(anyhow!(
                "config_facade.refresh_interval_ms must be at least 1000"
            ));
        }

        if let Some(endpoint) = &self.kv.endpoint
            && url::Url::parse(endpoint).is_err()
        {
            return Err(anyhow!("kv.endpoint is not a valid URL: '{endpoint}'"));
        }

        Ok(())
    }
}
