use indexmap::IndexMap;
use refract::config::{ConfigFacadeConfig, Environment};
use refract::core::config_api::ConfigApi;
use refract::core::config_store::{
    CommitMeta, ConfigModule, ConfigSnapshot, ConfigVersionStore, ModuleMeta, SnapshotMeta,
};
use refract::core::facade::ConfigFacade;
use refract::core::kv::{FaultInjectingKvStore, KvStore, MemoryKvStore};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;

fn module(name: &str, config: Value) -> ConfigModule {
    ConfigModule {
        meta: ModuleMeta {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            description: format!("{name} module"),
            schema: json!({}),
            defaults: json!({}),
            module_dependencies: None,
        },
        config,
    }
}

fn snapshot_with(modules: Vec<(&str, Value)>) -> ConfigSnapshot {
    let names: Vec<String> = modules.iter().map(|(n, _)| n.to_string()).collect();
    ConfigSnapshot {
        meta: SnapshotMeta {
            version: String::new(),
            last_updated: String::new(),
            active_modules: names,
        },
        modules: modules
            .into_iter()
            .map(|(name, config)| (name.to_string(), module(name, config)))
            .collect::<IndexMap<String, ConfigModule>>(),
    }
}

fn commit() -> CommitMeta {
    CommitMeta {
        author: "test".to_string(),
        comment: "seed".to_string(),
        modules: vec![],
        tags: None,
    }
}

fn facade_over(kv: Arc<dyn KvStore>) -> (Arc<ConfigVersionStore>, Arc<ConfigFacade>) {
    let store = Arc::new(ConfigVersionStore::new(kv));
    let api = Arc::new(ConfigApi::new(
        store.clone(),
        HashMap::new(),
        Environment::Development,
    ));
    let facade = Arc::new(ConfigFacade::new(
        api,
        &ConfigFacadeConfig::default(),
        Environment::Development,
        &HashMap::new(),
    ));
    (store, facade)
}

#[tokio::test]
async fn test_initialize_on_empty_store_keeps_overlaid_fallback() {
    let (_store, facade) = facade_over(Arc::new(MemoryKvStore::new()));
    facade.initialize().await;

    assert!(facade.is_initialized());
    assert_eq!(facade.consecutive_failures(), 1);

    // Fallback plus the emergency overlay.
    let config = facade.get_config();
    assert_eq!(config["cache"]["enabled"], json!(true));
    assert_eq!(config["features"]["forceTransformCache"], json!(true));
    assert!(
        config["cache"]["allowedEnvironments"]
            .as_array()
            .unwrap()
            .iter()
            .any(|v| v.as_str() == Some("development"))
    );
}

#[tokio::test]
async fn test_refresh_merges_sectioned_modules() {
    let kv = Arc::new(MemoryKvStore::new());
    let (store, facade) = facade_over(kv);

    store
        .store(
            snapshot_with(vec![
                ("cache", json!({ "ttl": { "ok": 1200 } })),
                (
                    "storage",
                    json!({ "remote": { "url": "https://origin.example.com" } }),
                ),
                (
                    "transform",
                    json!({
                        "quality": 80,
                        "derivatives": { "thumbnail": { "width": 150 } },
                    }),
                ),
                ("core", json!({ "features": { "smartCrop": true } })),
            ]),
            commit(),
        )
        .await
        .unwrap();

    facade.refresh().await.unwrap();
    let config = facade.get_config();

    assert_eq!(config["cache"]["ttl"]["ok"], json!(1200));
    // Nested storage URL synthesized into the flat alias.
    assert_eq!(
        config["storage"]["remoteUrl"],
        json!("https://origin.example.com")
    );
    // Derivatives lifted to the top level; the rest stays sectioned.
    assert_eq!(config["derivatives"]["thumbnail"]["width"], json!(150));
    assert_eq!(config["transform"]["quality"], json!(80));
    // Core merges at the root.
    assert!(facade.is_feature_enabled("smartCrop"));
    // Fallback sections survive the merge.
    assert!(config.get("responsive").is_some());
}

#[tokio::test]
async fn test_storage_flat_alias_synthesizes_nested_form() {
    let kv = Arc::new(MemoryKvStore::new());
    let (store, facade) = facade_over(kv);

    store
        .store(
            snapshot_with(vec![(
                "storage",
                json!({ "fallbackUrl": "https://backup.example.com" }),
            )]),
            commit(),
        )
        .await
        .unwrap();

    facade.refresh().await.unwrap();
    assert_eq!(
        facade.get_value("storage.fallback.url", Value::Null),
        json!("https://backup.example.com")
    );
}

#[tokio::test]
async fn test_critical_fields_patched_from_fallback() {
    let kv = Arc::new(MemoryKvStore::new());
    let (store, facade) = facade_over(kv);

    store
        .store(
            snapshot_with(vec![
                ("cache", json!({ "ttl": { "ok": "not-a-number" } })),
                ("storage", json!({ "priority": "broken" })),
            ]),
            commit(),
        )
        .await
        .unwrap();

    facade.refresh().await.unwrap();
    let config = facade.get_config();

    assert_eq!(config["cache"]["ttl"]["ok"], json!(86_400));
    assert!(config["storage"]["priority"].is_array());
    assert!(config.get("responsive").is_some());
}

#[tokio::test]
async fn test_force_flags_overlay_after_merge() {
    let kv = Arc::new(MemoryKvStore::new());
    let (store, facade) = facade_over(kv);

    store
        .store(
            snapshot_with(vec![(
                "core",
                json!({
                    "features": { "forceTransformCache": true },
                    "cache": { "enabled": false },
                    "debug": { "forceDebugHeaders": true, "enabled": false },
                }),
            )]),
            commit(),
        )
        .await
        .unwrap();

    facade.refresh().await.unwrap();
    let config = facade.get_config();

    assert_eq!(config["cache"]["enabled"], json!(true));
    assert_eq!(config["debug"]["enabled"], json!(true));
    for section in ["cache", "debug"] {
        assert!(
            config[section]["allowedEnvironments"]
                .as_array()
                .unwrap()
                .iter()
                .any(|v| v.as_str() == Some("development")),
            "{section} should allow the current environment"
        );
    }
}

#[tokio::test]
async fn test_refresh_failures_keep_last_known_good_copy() {
    let kv = Arc::new(MemoryKvStore::new());
    let flaky = Arc::new(FaultInjectingKvStore::new(kv));
    let (store, facade) = facade_over(flaky.clone());

    store
        .store(
            snapshot_with(vec![("cache", json!({ "ttl": { "ok": 500 } }))]),
            commit(),
        )
        .await
        .unwrap();
    facade.initialize().await;
    assert_eq!(facade.consecutive_failures(), 0);
    let last_good = facade.get_config();
    assert_eq!(last_good["cache"]["ttl"]["ok"], json!(500));

    // Three consecutive failing cycles: the copy must not move.
    flaky.fail_next_reads(3);
    for expected in 1..=3u32 {
        assert!(facade.refresh().await.is_err());
        assert_eq!(facade.consecutive_failures(), expected);
        assert!(Arc::ptr_eq(&last_good, &facade.get_config()));
    }

    // A successful cycle replaces the copy atomically and resets the counter.
    store
        .update_module("cache", json!({ "ttl": { "ok": 123 } }), CommitMeta {
            author: "test".to_string(),
            comment: "bump".to_string(),
            modules: vec![],
            tags: None,
        })
        .await
        .unwrap();
    facade.refresh().await.unwrap();
    assert_eq!(facade.consecutive_failures(), 0);
    assert_eq!(facade.get_value("cache.ttl.ok", Value::Null), json!(123));
}

#[tokio::test]
async fn test_is_immutable_content_matching() {
    let kv = Arc::new(MemoryKvStore::new());
    let (store, facade) = facade_over(kv);

    store
        .store(
            snapshot_with(vec![(
                "cache",
                json!({
                    "immutableContent": {
                        "enabled": true,
                        "paths": ["/static/*", "/{img,assets}/*"],
                        "contentTypes": ["image/svg"],
                        "derivatives": ["logo"],
                    }
                }),
            )]),
            commit(),
        )
        .await
        .unwrap();
    facade.refresh().await.unwrap();

    assert!(facade.is_immutable_content("/static/app.css", None, None));
    // Leading slash is normalized on.
    assert!(facade.is_immutable_content("static/app.css", None, None));
    // Brace alternation.
    assert!(facade.is_immutable_content("/img/x.jpg", None, None));
    assert!(facade.is_immutable_content("/assets/x.jpg", None, None));
    assert!(!facade.is_immutable_content("/other/x.jpg", None, None));
    // Content-type substring.
    assert!(facade.is_immutable_content("/other/x.svg", Some("image/svg+xml"), None));
    // Derivative name.
    assert!(facade.is_immutable_content("/other/x.jpg", None, Some("logo")));
    assert!(!facade.is_immutable_content("/other/x.jpg", None, Some("banner")));
}

#[tokio::test]
async fn test_is_immutable_content_disabled() {
    let kv = Arc::new(MemoryKvStore::new());
    let (store, facade) = facade_over(kv);

    store
        .store(
            snapshot_with(vec![(
                "cache",
                json!({
                    "immutableContent": { "enabled": false, "paths": ["/static/*"] }
                }),
            )]),
            commit(),
        )
        .await
        .unwrap();
    facade.refresh().await.unwrap();

    assert!(!facade.is_immutable_content("/static/app.css", None, None));
}

#[tokio::test]
async fn test_get_section_and_value_accessors() {
    let kv = Arc::new(MemoryKvStore::new());
    let (store, facade) = facade_over(kv);

    store
        .store(
            snapshot_with(vec![("cache", json!({ "ttl": { "ok": 777 } }))]),
            commit(),
        )
        .await
        .unwrap();
    facade.refresh().await.unwrap();

    let section = facade.get_section("cache").unwrap();
    assert_eq!(section["ttl"]["ok"], json!(777));
    assert_eq!(facade.get_value("cache.ttl.ok", json!(0)), json!(777));
    assert_eq!(facade.get_value("cache.missing", json!("d")), json!("d"));
    assert!(facade.get_section("nonexistent").is_none());
}
