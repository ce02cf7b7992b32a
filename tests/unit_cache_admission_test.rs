use bytes::Bytes;
use refract::config::TransformCacheConfig;
use refract::core::cache::admission::{RejectReason, actually_transformed, evaluate};
use refract::core::cache::key::{OutputFormat, TransformOptions};
use refract::core::cache::types::{CacheRequest, OriginResult, StorageKind, TransformedResponse};
use refract::core::cache::TransformCache;
use refract::core::kv::MemoryKvStore;
use std::sync::Arc;
use url::Url;

fn request(path_and_query: &str) -> CacheRequest {
    CacheRequest::new(Url::parse(&format!("https://images.example.com{path_and_query}")).unwrap())
}

fn response(status: u16, content_type: &str, size: usize) -> TransformedResponse {
    TransformedResponse::new(status, content_type, Bytes::from(vec![0u8; size]))
}

fn origin(content_type: &str, size: usize) -> OriginResult {
    OriginResult {
        bytes: Some(Bytes::from(vec![0u8; size])),
        content_type: Some(content_type.to_string()),
        size: Some(size as u64),
        original_size: None,
        storage_type: StorageKind::Remote,
    }
}

#[test]
fn test_rejects_non_ok_status() {
    let config = TransformCacheConfig::default();
    let result = evaluate(
        &config,
        &request("/a.jpg"),
        &response(404, "image/jpeg", 100),
        &origin("image/jpeg", 1000),
        &TransformOptions::default(),
    );
    assert_eq!(result, Err(RejectReason::NonOkStatus(404)));
}

#[test]
fn test_rejects_missing_origin_body() {
    let config = TransformCacheConfig::default();
    let mut no_body = origin("image/jpeg", 1000);
    no_body.bytes = None;
    let result = evaluate(
        &config,
        &request("/a.jpg"),
        &response(200, "image/webp", 100),
        &no_body,
        &TransformOptions::default(),
    );
    assert_eq!(result, Err(RejectReason::MissingOriginBody));
}

#[test]
fn test_rejects_non_image_content_type() {
    let config = TransformCacheConfig::default();
    let result = evaluate(
        &config,
        &request("/a.jpg"),
        &response(200, "text/html", 100),
        &origin("image/jpeg", 1000),
        &TransformOptions::default(),
    );
    assert!(matches!(result, Err(RejectReason::NotAnImage(_))));
}

#[test]
fn test_rejects_oversized_response() {
    let config = TransformCacheConfig {
        max_size: 1024,
        ..Default::default()
    };
    let result = evaluate(
        &config,
        &request("/a.jpg"),
        &response(200, "image/webp", 2048),
        &origin("image/jpeg", 100_000),
        &TransformOptions::default(),
    );
    assert_eq!(
        result,
        Err(RejectReason::TooLarge {
            size: 2048,
            max: 1024
        })
    );
}

#[test]
fn test_rejects_disallowed_path() {
    let config = TransformCacheConfig {
        disallowed_paths: vec!["/private/".to_string()],
        ..Default::default()
    };
    let result = evaluate(
        &config,
        &request("/private/a.jpg"),
        &response(200, "image/webp", 100),
        &origin("image/jpeg", 1000),
        &TransformOptions::default(),
    );
    assert_eq!(
        result,
        Err(RejectReason::DisallowedPath("/private/".to_string()))
    );
}

#[test]
fn test_rejects_json_format() {
    let config = TransformCacheConfig::default();
    let opts = TransformOptions {
        format: Some(OutputFormat::Json),
        ..Default::default()
    };
    let result = evaluate(
        &config,
        &request("/a.jpg"),
        &response(200, "image/webp", 100),
        &origin("image/jpeg", 1000),
        &opts,
    );
    assert_eq!(result, Err(RejectReason::JsonFormat));
}

#[test]
fn test_untransformed_echo_is_rejected() {
    // Same format, shrank only to 99.5% of the original, no manipulation.
    let config = TransformCacheConfig::default();
    let result = evaluate(
        &config,
        &request("/photo.jpg"),
        &response(200, "image/jpeg", 995_000),
        &origin("image/jpeg", 1_000_000),
        &TransformOptions::default(),
    );
    assert_eq!(result, Err(RejectReason::NotTransformed));
}

#[test]
fn test_transformed_predicate_branches() {
    let origin_jpeg = origin("image/jpeg", 1_000_000);

    // Shrank below 95%.
    assert!(actually_transformed(
        &response(200, "image/jpeg", 900_000),
        &origin_jpeg,
        &TransformOptions::default(),
    ));

    // Format changed.
    assert!(actually_transformed(
        &response(200, "image/webp", 995_000),
        &origin_jpeg,
        &TransformOptions::default(),
    ));

    // Explicit aspect crop.
    let crop = TransformOptions {
        aspect: Some("1:1".to_string()),
        fit: Some("crop".to_string()),
        ..Default::default()
    };
    assert!(actually_transformed(
        &response(200, "image/jpeg", 1_000_000),
        &origin_jpeg,
        &crop,
    ));

    // Pixel manipulation.
    let blur = TransformOptions {
        blur: Some(5.0),
        ..Default::default()
    };
    assert!(actually_transformed(
        &response(200, "image/jpeg", 1_000_000),
        &origin_jpeg,
        &blur,
    ));

    // Explicit dimensions plus a sub-99% shrink.
    let resized = TransformOptions {
        width: Some(800),
        ..Default::default()
    };
    assert!(actually_transformed(
        &response(200, "image/jpeg", 985_000),
        &origin_jpeg,
        &resized,
    ));

    // Explicit dimensions but essentially no shrink.
    assert!(!actually_transformed(
        &response(200, "image/jpeg", 999_000),
        &origin_jpeg,
        &resized,
    ));
}

#[tokio::test]
async fn test_put_of_untransformed_echo_writes_nothing() {
    let kv = Arc::new(MemoryKvStore::new());
    let cache = Arc::new(TransformCache::new(
        kv.clone(),
        TransformCacheConfig::default(),
    ));

    let req = request("/photo.jpg");
    let opts = TransformOptions::default();
    cache
        .put(
            &req,
            &response(200, "image/jpeg", 995_000),
            &origin("image/jpeg", 1_000_000),
            &opts,
            None,
        )
        .await;

    assert!(kv.is_empty());
    assert!(!cache.is_cached(&req, &opts).await);
}
