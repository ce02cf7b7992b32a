// src/core/cache/admission.rs

//! The write-path admission predicate.
//!
//! A candidate response must clear every rule here before it is written to
//! the KV store. Rejection is silent at the API surface: the caller's
//! request proceeds, the rejection is logged at debug level and counted.
//!
//! The client's `Cache-Control` request header is intentionally not
//! consulted: KV-cached artifacts are server-owned.

use crate::config::TransformCacheConfig;
use crate::core::cache::key::{OutputFormat, TransformOptions};
use crate::core::cache::types::{CacheRequest, OriginResult, TransformedResponse};
use std::fmt;

/// Why a candidate response was not admitted.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    NonOkStatus(u16),
    MissingOriginBody,
    NotAnImage(Option<String>),
    TooLarge { size: u64, max: u64 },
    DisallowedPath(String),
    JsonFormat,
    NotTransformed,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::NonOkStatus(status) => write!(f, "response status {status}"),
            RejectReason::MissingOriginBody => write!(f, "origin supplied no body"),
            RejectReason::NotAnImage(ct) => {
                write!(f, "content type {:?} is not an image", ct.as_deref())
            }
            RejectReason::TooLarge { size, max } => {
                write!(f, "size {size} exceeds maximum {max}")
            }
            RejectReason::DisallowedPath(substr) => {
                write!(f, "path matches disallowed substring '{substr}'")
            }
            RejectReason::JsonFormat => write!(f, "json format responses are not cached"),
            RejectReason::NotTransformed => {
                write!(f, "response is not transformed relative to its origin")
            }
        }
    }
}

/// Evaluates the full admission predicate. `Ok(())` admits the response.
pub fn evaluate(
    config: &TransformCacheConfig,
    request: &CacheRequest,
    response: &TransformedResponse,
    origin: &OriginResult,
    options: &TransformOptions,
) -> Result<(), RejectReason> {
    if response.status != 200 {
        return Err(RejectReason::NonOkStatus(response.status));
    }

    if origin.bytes.as_ref().is_none_or(|b| b.is_empty()) {
        return Err(RejectReason::MissingOriginBody);
    }

    let content_type = response.content_type().map(str::to_string);
    match content_type.as_deref() {
        Some(ct) if ct.starts_with("image/") => {}
        other => return Err(RejectReason::NotAnImage(other.map(str::to_string))),
    }

    let size = response.body.len() as u64;
    if size > config.max_size {
        return Err(RejectReason::TooLarge {
            size,
            max: config.max_size,
        });
    }

    let path = request.url.path();
    if let Some(substr) = config
        .disallowed_paths
        .iter()
        .find(|substr| !substr.is_empty() && path.contains(substr.as_str()))
    {
        return Err(RejectReason::DisallowedPath(substr.clone()));
    }

    if options.requested_format() == OutputFormat::Json {
        return Err(RejectReason::JsonFormat);
    }

    if !actually_transformed(response, origin, options) {
        return Err(RejectReason::NotTransformed);
    }

    Ok(())
}

/// A response is "actually transformed" relative to its origin iff at least
/// one of the following holds:
///   - output bytes shrank below 95% of the original;
///   - the output format differs from the origin format;
///   - an explicit aspect crop was requested;
///   - another manipulation (blur, brightness, contrast, gamma, sharpen,
///     rotate) was requested;
///   - explicit width/height were requested and bytes shrank below 99%.
pub fn actually_transformed(
    response: &TransformedResponse,
    origin: &OriginResult,
    options: &TransformOptions,
) -> bool {
    let output_size = response.body.len() as u64;
    let original_size = origin.effective_size();

    if let Some(original) = original_size
        && original > 0
        && (output_size as f64) < (original as f64) * 0.95
    {
        return true;
    }

    if let (Some(out_ct), Some(orig_ct)) = (response.content_type(), origin.content_type.as_deref())
        && normalize_content_type(out_ct) != normalize_content_type(orig_ct)
    {
        return true;
    }

    if options.is_aspect_crop() {
        return true;
    }

    if options.has_manipulation() {
        return true;
    }

    if (options.width.is_some() || options.height.is_some())
        && let Some(original) = original_size
        && original > 0
        && (output_size as f64) < (original as f64) * 0.99
    {
        return true;
    }

    false
}

fn normalize_content_type(ct: &str) -> &str {
    ct.split(';').next().unwrap_or("").trim()
}
