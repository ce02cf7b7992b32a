use bytes::Bytes;
use indexmap::IndexMap;
use refract::config::{ConfigFacadeConfig, Environment, TransformCacheConfig};
use refract::core::cache::TransformCache;
use refract::core::config_api::ConfigApi;
use refract::core::config_store::{
    CommitMeta, ConfigModule, ConfigSnapshot, ConfigVersionStore, ModuleMeta, SnapshotMeta,
};
use refract::core::facade::ConfigFacade;
use refract::core::kv::{KvStore, MemoryKvStore, PutOptions};
use refract::core::tasks::cache_maintenance::CacheMaintenanceTask;
use refract::core::tasks::config_refresh::ConfigRefreshTask;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

fn seed_snapshot() -> ConfigSnapshot {
    let core = ConfigModule {
        meta: ModuleMeta {
            name: "core".to_string(),
            version: "1.0.0".to_string(),
            description: "Core settings".to_string(),
            schema: json!({}),
            defaults: json!({}),
            module_dependencies: None,
        },
        config: json!({ "features": { "smartCrop": true } }),
    };
    ConfigSnapshot {
        meta: SnapshotMeta {
            version: String::new(),
            last_updated: String::new(),
            active_modules: vec!["core".to_string()],
        },
        modules: IndexMap::from([("core".to_string(), core)]),
    }
}

#[tokio::test]
async fn test_refresh_task_stops_on_shutdown() {
    refract::logging::init("warn");
    let kv = Arc::new(MemoryKvStore::new());
    let store = Arc::new(ConfigVersionStore::new(kv));
    store
        .store(
            seed_snapshot(),
            CommitMeta {
                author: "test".to_string(),
                comment: "seed".to_string(),
                modules: vec![],
                tags: None,
            },
        )
        .await
        .unwrap();

    let api = Arc::new(ConfigApi::new(
        store,
        HashMap::new(),
        Environment::Development,
    ));
    let facade = Arc::new(ConfigFacade::new(
        api,
        &ConfigFacadeConfig {
            refresh_interval_ms: 1_000,
        },
        Environment::Development,
        &HashMap::new(),
    ));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let task = ConfigRefreshTask::new(facade);
    let handle = tokio::spawn(task.run(shutdown_rx));

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("refresh task did not shut down")
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_refresh_task_picks_up_new_versions() {
    let kv = Arc::new(MemoryKvStore::new());
    let store = Arc::new(ConfigVersionStore::new(kv));
    store
        .store(
            seed_snapshot(),
            CommitMeta {
                author: "test".to_string(),
                comment: "seed".to_string(),
                modules: vec![],
                tags: None,
            },
        )
        .await
        .unwrap();

    let api = Arc::new(ConfigApi::new(
        store.clone(),
        HashMap::new(),
        Environment::Development,
    ));
    let facade = Arc::new(ConfigFacade::new(
        api,
        &ConfigFacadeConfig {
            refresh_interval_ms: 1_000,
        },
        Environment::Development,
        &HashMap::new(),
    ));
    facade.initialize().await;
    assert!(facade.is_feature_enabled("smartCrop"));
    assert!(!facade.is_feature_enabled("autoWebp"));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(ConfigRefreshTask::new(facade.clone()).run(shutdown_rx));

    store
        .update_module(
            "core",
            json!({ "features": { "smartCrop": true, "autoWebp": true } }),
            CommitMeta {
                author: "test".to_string(),
                comment: "enable autoWebp".to_string(),
                modules: vec![],
                tags: None,
            },
        )
        .await
        .unwrap();

    // Paused time: sleeping drives the task through its jittered first wake
    // and at least one refresh cycle.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(facade.is_feature_enabled("autoWebp"));

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("refresh task did not shut down")
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_maintenance_task_prunes_expired_entries() {
    let kv = Arc::new(MemoryKvStore::new());
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

    let cache = Arc::new(TransformCache::new(
        kv.clone(),
        TransformCacheConfig {
            purge_delay_ms: 0,
            ..Default::default()
        },
    ));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let task = CacheMaintenanceTask::new(cache, Duration::from_millis(100));
    let handle = tokio::spawn(task.run(shutdown_rx));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(kv.is_empty());

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("maintenance task did not shut down")
        .unwrap();
}
