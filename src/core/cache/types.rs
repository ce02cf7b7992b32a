// src/core/cache/types.rs

//! Defines data structures specific to the transform-result cache.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use url::Url;

/// Where the original image was sourced from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    R2,
    #[default]
    Remote,
    Fallback,
}

/// Recorded when an explicit aspect crop was applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AspectCropInfo {
    pub aspect: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focal: Option<String>,
}

/// Metadata stored alongside each cached transform result. Serialized as
/// camelCase JSON into the KV entry's metadata slot, so it is also visible
/// to `list`-based purge sweeps without reading the value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetadata {
    /// The full request URL this artifact was produced for.
    pub url: String,
    /// Write time, epoch milliseconds.
    pub timestamp: i64,
    /// Time-to-live in seconds; also set as the KV expiration.
    pub ttl: u64,
    /// `timestamp + ttl * 1000`, epoch milliseconds.
    pub expiration: i64,
    /// Always begins with `image/`.
    pub content_type: String,
    /// Size of the cached artifact in bytes.
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// The canonicalized transform parameters the artifact was produced with.
    pub transform_options: Value,
    pub tags: Vec<String>,
    pub storage_type: StorageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aspect_crop_info: Option<AspectCropInfo>,
}

/// A cached artifact coupled with its metadata and the KV key it was found
/// under.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformResult {
    pub bytes: Bytes,
    pub metadata: CacheMetadata,
    pub key: String,
}

/// The request-side view the cache needs: the URL and the request headers.
#[derive(Debug, Clone)]
pub struct CacheRequest {
    pub url: Url,
    /// Header names lowercased.
    pub headers: HashMap<String, String>,
}

impl CacheRequest {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            headers: HashMap::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_lowercase(), value.to_string());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    /// First non-empty path segment, used as the default cache tag.
    pub fn first_path_segment(&self) -> Option<&str> {
        self.url
            .path_segments()
            .and_then(|mut segments| segments.find(|s| !s.is_empty()))
    }
}

/// The transformed response a caller wants cached. Only status, headers,
/// and body bytes are read; the cache emits no response of its own.
#[derive(Debug, Clone)]
pub struct TransformedResponse {
    pub status: u16,
    /// Header names lowercased.
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl TransformedResponse {
    pub fn new(status: u16, content_type: &str, body: Bytes) -> Self {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), content_type.to_string());
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_lowercase(), value.to_string());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Tags from the `cache-tag` response header, comma-split and trimmed.
    pub fn cache_tags(&self) -> Vec<String> {
        self.header("cache-tag")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// What the image-transform origin supplied for the request: the original
/// bytes (opaque to the cache) and where they came from.
#[derive(Debug, Clone, Default)]
pub struct OriginResult {
    pub bytes: Option<Bytes>,
    pub content_type: Option<String>,
    pub size: Option<u64>,
    pub original_size: Option<u64>,
    pub storage_type: StorageKind,
}

impl OriginResult {
    /// The size of the untransformed original, preferring the explicit
    /// fields over the buffer length.
    pub fn effective_size(&self) -> Option<u64> {
        self.size
            .or(self.original_size)
            .or_else(|| self.bytes.as_ref().map(|b| b.len() as u64))
    }
}

/// Snapshot of cache activity for admin surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub prefix: String,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub memory_entries: usize,
    pub memory_capacity: usize,
    pub version: &'static str,
}
