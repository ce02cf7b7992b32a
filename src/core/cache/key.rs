// src/core/cache/key.rs

//! Deterministic cache key generation.
//!
//! A key is a pure function of the request URL, the canonicalized transform
//! parameters, and the chosen output format:
//! `<prefix>:<basename>:<param-tokens>:<format>:<hash8>`.

use serde::{Deserialize, Serialize};
use url::Url;

/// Output formats a transform result can be stored under. `Auto` is the
/// canonical variant the hot LRU indexes by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Auto,
    Jpeg,
    Png,
    Webp,
    Avif,
    Gif,
    /// Metadata-only responses; never admitted to the cache.
    Json,
}

impl OutputFormat {
    /// Every format a key can be stored under.
    pub const KEY_FORMATS: [OutputFormat; 6] = [
        OutputFormat::Auto,
        OutputFormat::Jpeg,
        OutputFormat::Png,
        OutputFormat::Webp,
        OutputFormat::Avif,
        OutputFormat::Gif,
    ];

    /// The fixed fallback probe sweep, in order.
    pub const FALLBACK_PROBES: [OutputFormat; 5] = [
        OutputFormat::Jpeg,
        OutputFormat::Png,
        OutputFormat::Gif,
        OutputFormat::Webp,
        OutputFormat::Avif,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Auto => "auto",
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Png => "png",
            OutputFormat::Webp => "webp",
            OutputFormat::Avif => "avif",
            OutputFormat::Gif => "gif",
            OutputFormat::Json => "json",
        }
    }

    /// Maps a response content type onto the format its key is stored under.
    pub fn from_content_type(content_type: &str) -> Option<OutputFormat> {
        match content_type.split(';').next().unwrap_or("").trim() {
            "image/jpeg" | "image/jpg" => Some(OutputFormat::Jpeg),
            "image/png" => Some(OutputFormat::Png),
            "image/webp" => Some(OutputFormat::Webp),
            "image/avif" => Some(OutputFormat::Avif),
            "image/gif" => Some(OutputFormat::Gif),
            _ => None,
        }
    }
}

/// Client capability hints forwarded by the entry layer. Not part of the
/// canonical parameters: two requests differing only in client support must
/// share keys so they can share artifacts.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ClientInfo {
    #[serde(default, rename = "formatSupport")]
    pub format_support: FormatSupport,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct FormatSupport {
    #[serde(default)]
    pub avif: bool,
    #[serde(default)]
    pub webp: bool,
}

/// The canonicalized transform parameters. Field declaration order is the
/// canonical JSON emission order, so serialization is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransformOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<u8>,
    /// Target aspect ratio, e.g. `16:9`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aspect: Option<String>,
    /// Focal point for aspect cropping, e.g. `0.5,0.5`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focal: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<OutputFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blur: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brightness: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contrast: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gamma: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sharpen: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotate: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub derivative: Option<String>,
    #[serde(rename = "__clientInfo", skip_serializing)]
    pub client_info: Option<ClientInfo>,
}

impl TransformOptions {
    pub fn requested_format(&self) -> OutputFormat {
        self.format.unwrap_or_default()
    }

    /// True when any pixel-level manipulation beyond resizing was requested.
    pub fn has_manipulation(&self) -> bool {
        self.blur.is_some()
            || self.brightness.is_some()
            || self.contrast.is_some()
            || self.gamma.is_some()
            || self.sharpen.is_some()
            || self.rotate.is_some()
    }

    /// True when the options request an explicit aspect crop.
    pub fn is_aspect_crop(&self) -> bool {
        self.aspect.is_some() && self.fit.as_deref() == Some("crop")
    }

    /// The deterministic JSON form used for hashing and stored metadata.
    /// `__clientInfo` is excluded: it does not change the artifact.
    pub fn canonical_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Hyphen-joined short param tokens in fixed emission order.
    pub fn param_tokens(&self) -> String {
        let mut tokens: Vec<String> = Vec::new();
        if let Some(w) = self.width {
            tokens.push(format!("w{w}"));
        }
        if let Some(h) = self.height {
            tokens.push(format!("h{h}"));
        }
        if let Some(q) = self.quality {
            tokens.push(format!("q{q}"));
        }
        if let Some(aspect) = &self.aspect {
            tokens.push(format!("r{}", sanitize(aspect)));
        }
        if let Some(focal) = &self.focal {
            tokens.push(format!("p{}", sanitize(focal)));
        }
        if let Some(fit) = &self.fit {
            tokens.push(format!("fit{}", sanitize(fit)));
        }
        if let Some(v) = self.blur {
            tokens.push(format!("blur{v}"));
        }
        if let Some(v) = self.brightness {
            tokens.push(format!("bri{v}"));
        }
        if let Some(v) = self.contrast {
            tokens.push(format!("con{v}"));
        }
        if let Some(v) = self.gamma {
            tokens.push(format!("gam{v}"));
        }
        if let Some(v) = self.sharpen {
            tokens.push(format!("sh{v}"));
        }
        if let Some(v) = self.rotate {
            tokens.push(format!("rot{v}"));
        }
        if let Some(d) = &self.derivative {
            tokens.push(format!("d{}", sanitize(d)));
        }
        tokens.join("-")
    }
}

/// Separator characters inside param values would collide with the token
/// and key separators, so they are mapped to `-`.
fn sanitize(value: &str) -> String {
    value.replace([':', ',', '/'], "-")
}

/// FNV-1a 32-bit over UTF-8 bytes. Offset basis and prime per the reference
/// parameters; multiplication wraps at 32 bits.
pub fn fnv1a_32(input: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for &byte in input {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// Builds the KV key for a request/options/format triple.
pub fn transform_key(
    prefix: &str,
    url: &Url,
    options: &TransformOptions,
    format: OutputFormat,
) -> String {
    let basename = url
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).next_back())
        .unwrap_or("index");

    let raw_search = url
        .query()
        .map(|q| format!("?{q}"))
        .unwrap_or_default();
    let hash_input = format!("{}{}{}", url.path(), raw_search, options.canonical_json());
    let hash = fnv1a_32(hash_input.as_bytes());

    format!(
        "{prefix}:{basename}:{tokens}:{format}:{hash:08x}",
        tokens = options.param_tokens(),
        format = format.as_str(),
    )
}
