use bytes::Bytes;
use refract::config::TransformCacheConfig;
use refract::core::cache::key::TransformOptions;
use refract::core::cache::types::{CacheRequest, OriginResult, StorageKind, TransformedResponse};
use refract::core::cache::TransformCache;
use refract::core::deferred::{DeferredWork, TokioDeferred};
use refract::core::kv::{KvStore, MemoryKvStore, PutOptions};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

fn request(path: &str) -> CacheRequest {
    CacheRequest::new(Url::parse(&format!("https://images.example.com{path}")).unwrap())
}

fn transformed_response(tags: &str) -> TransformedResponse {
    TransformedResponse::new(200, "image/webp", Bytes::from(vec![1u8; 10_000]))
        .with_header("cache-tag", tags)
}

fn origin() -> OriginResult {
    OriginResult {
        bytes: Some(Bytes::from(vec![1u8; 100_000])),
        content_type: Some("image/jpeg".to_string()),
        size: Some(100_000),
        original_size: None,
        storage_type: StorageKind::Remote,
    }
}

/// A cache with instant purge batches so tests stay fast.
fn cache_with(kv: Arc<MemoryKvStore>) -> Arc<TransformCache> {
    let config = TransformCacheConfig {
        purge_delay_ms: 0,
        ..Default::default()
    };
    Arc::new(TransformCache::new(kv, config))
}

async fn seed_tagged_entries(cache: &Arc<TransformCache>) {
    let opts = TransformOptions::default();
    for (path, tags) in [
        ("/hero/banner.jpg", "hero,home"),
        ("/hero/splash.jpg", "hero"),
        ("/misc/other.jpg", "other"),
    ] {
        cache
            .put(&request(path), &transformed_response(tags), &origin(), &opts, None)
            .await;
    }
}

#[tokio::test]
async fn test_purge_by_tag_removes_exactly_the_tagged_entries() {
    let kv = Arc::new(MemoryKvStore::new());
    let cache = cache_with(kv.clone());
    seed_tagged_entries(&cache).await;
    assert_eq!(kv.len(), 3);

    let purged = cache.purge_by_tag("hero", None).await.unwrap();
    assert_eq!(purged, 2);

    let page = cache.list_entries(100, None).await.unwrap();
    assert_eq!(page.keys.len(), 1);
    let surviving_tags = page.keys[0]
        .metadata
        .as_ref()
        .and_then(|m| m.get("tags"))
        .cloned()
        .unwrap();
    assert!(
        surviving_tags
            .as_array()
            .unwrap()
            .iter()
            .any(|t| t.as_str() == Some("other"))
    );
}

#[tokio::test]
async fn test_purge_by_tag_misses_return_zero() {
    let kv = Arc::new(MemoryKvStore::new());
    let cache = cache_with(kv.clone());
    seed_tagged_entries(&cache).await;

    let purged = cache.purge_by_tag("absent-tag", None).await.unwrap();
    assert_eq!(purged, 0);
    assert_eq!(kv.len(), 3);
}

#[tokio::test]
async fn test_purge_by_path_substring() {
    let kv = Arc::new(MemoryKvStore::new());
    let cache = cache_with(kv.clone());

    let opts = TransformOptions::default();
    for path in ["/products/shoe.jpg", "/products/hat.jpg", "/blog/post.jpg"] {
        cache
            .put(&request(path), &transformed_response("x"), &origin(), &opts, None)
            .await;
    }

    let purged = cache.purge_by_path("/products/", None).await.unwrap();
    assert_eq!(purged, 2);
    assert_eq!(kv.len(), 1);
}

#[tokio::test]
async fn test_maintenance_prunes_expired_metadata() {
    let kv = Arc::new(MemoryKvStore::new());
    let cache = cache_with(kv.clone());

    // A live entry through the normal write path.
    cache
        .put(
            &request("/live.jpg"),
            &transformed_response("x"),
            &origin(),
            &TransformOptions::default(),
            None,
        )
        .await;

    // An entry whose recorded expiration is long past, planted directly.
    kv.put(
        "transform:stale.jpg::auto:00000000",
        Bytes::from_static(b"stale"),
        PutOptions {
            metadata: Some(json!({
                "url": "https://images.example.com/stale.jpg",
                "timestamp": 1_000,
                "ttl": 60,
                "expiration": 61_000,
                "contentType": "image/jpeg",
                "size": 5,
                "transformOptions": {},
                "tags": [],
                "storageType": "remote",
            })),
            ttl_seconds: None,
        },
    )
    .await
    .unwrap();

    let pruned = cache.perform_maintenance(100, None).await.unwrap();
    assert_eq!(pruned, 1);
    assert_eq!(kv.len(), 1);
    assert!(kv.get("transform:stale.jpg::auto:00000000").await.unwrap().is_none());
}

#[tokio::test]
async fn test_background_purge_returns_immediately_and_completes() {
    let kv = Arc::new(MemoryKvStore::new());
    let cache = cache_with(kv.clone());
    seed_tagged_entries(&cache).await;

    let handle: Arc<dyn DeferredWork> = Arc::new(TokioDeferred);
    let reported = cache.purge_by_tag("hero", Some(&handle)).await.unwrap();
    // The sweep runs behind the handle; the count is not yet known.
    assert_eq!(reported, 0);

    for _ in 0..100 {
        if kv.len() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(kv.len(), 1);
}
