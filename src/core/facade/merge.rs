// src/core/facade/merge.rs

//! Deep-merge semantics for combining the fallback snapshot with module
//! snapshots loaded from the KV store.
//!
//! Objects merge key-by-key; arrays and scalars replace. Modules apply in
//! ascending priority so `image-resizer` wins, then `core`, `cache`,
//! `transform`, `storage`. Sectioned modules (`cache`, `storage`,
//! `transform`) merge into their section of the tree; `core` and
//! `image-resizer` merge at the root. The `transform` module's
//! `derivatives` map is lifted to the top level.

use crate::config::Environment;
use crate::core::config_store::ConfigSnapshot;
use crate::core::paths::{get_path, set_path};
use serde_json::{Map, Value, json};

/// Module application order, lowest priority first.
const MODULE_PRIORITY: [&str; 5] = ["storage", "transform", "cache", "core", "image-resizer"];

/// Sections that must exist after a merge; missing ones are patched whole
/// from the fallback.
const REQUIRED_SECTIONS: [&str; 6] = [
    "cache",
    "storage",
    "responsive",
    "features",
    "debug",
    "derivatives",
];

/// Recursively merges `overlay` into `base`: objects key-by-key, everything
/// else replaces.
pub fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, overlay_child) in overlay_map {
                match base_map.get_mut(key) {
                    Some(base_child) => deep_merge(base_child, overlay_child),
                    None => {
                        base_map.insert(key.clone(), overlay_child.clone());
                    }
                }
            }
        }
        (base_slot, overlay_value) => *base_slot = overlay_value.clone(),
    }
}

/// Produces the merged hot-config tree for a snapshot over the fallback.
pub fn merge_snapshot(fallback: &Value, snapshot: &ConfigSnapshot) -> Value {
    let mut merged = fallback.clone();

    for module_name in MODULE_PRIORITY {
        let Some(module) = snapshot.modules.get(module_name) else {
            continue;
        };
        apply_module(&mut merged, module_name, &module.config);
    }

    if let Some(storage) = merged.get_mut("storage") {
        synthesize_storage_aliases(storage);
    }

    patch_required_sections(&mut merged, fallback);
    patch_critical_fields(&mut merged, fallback);

    merged
}

fn apply_module(merged: &mut Value, module_name: &str, config: &Value) {
    match module_name {
        // Root-level modules override the whole tree.
        "core" | "image-resizer" => deep_merge(merged, config),
        "transform" => {
            let mut remainder = config.clone();
            if let Some(derivatives) = remainder
                .as_object_mut()
                .and_then(|map| map.shift_remove("derivatives"))
            {
                let slot = ensure_section(merged, "derivatives");
                deep_merge(slot, &derivatives);
            }
            let slot = ensure_section(merged, "transform");
            deep_merge(slot, &remainder);
        }
        section => {
            let slot = ensure_section(merged, section);
            deep_merge(slot, config);
        }
    }
}

fn ensure_section<'a>(merged: &'a mut Value, name: &str) -> &'a mut Value {
    if !merged.is_object() {
        *merged = Value::Object(Map::new());
    }
    merged
        .as_object_mut()
        .unwrap()
        .entry(name.to_string())
        .or_insert_with(|| Value::Object(Map::new()))
}

/// Synthesizes the flat storage aliases from the nested form and vice
/// versa: `remoteUrl` ⇄ `remote.url`, `remoteAuth` ⇄ `remote.auth`, and the
/// same for `fallback`.
pub fn synthesize_storage_aliases(storage: &mut Value) {
    for (flat_url, flat_auth, nested) in [
        ("remoteUrl", "remoteAuth", "remote"),
        ("fallbackUrl", "fallbackAuth", "fallback"),
    ] {
        for (flat, nested_path) in [
            (flat_url, format!("{nested}.url")),
            (flat_auth, format!("{nested}.auth")),
        ] {
            // Empty strings count as unset so defaults never shadow real values.
            let flat_value = storage.get(flat).cloned().filter(non_empty);
            let nested_value = get_path(storage, &nested_path).cloned().filter(non_empty);
            match (flat_value, nested_value) {
                (Some(value), None) => set_path(storage, &nested_path, value),
                (None, Some(value)) => {
                    if let Some(map) = storage.as_object_mut() {
                        map.insert(flat.to_string(), value);
                    }
                }
                _ => {}
            }
        }
    }
}

fn non_empty(value: &Value) -> bool {
    value.as_str() != Some("")
}

fn patch_required_sections(merged: &mut Value, fallback: &Value) {
    for section in REQUIRED_SECTIONS {
        if merged.get(section).is_none()
            && let Some(fallback_section) = fallback.get(section)
        {
            set_path(merged, section, fallback_section.clone());
        }
    }
}

/// Critical-field validation: rather than discarding a merged tree that
/// fails it, each offending field is patched individually from the
/// fallback.
fn patch_critical_fields(merged: &mut Value, fallback: &Value) {
    let ttl_ok_valid = get_path(merged, "cache.ttl.ok").is_some_and(Value::is_number);
    if !ttl_ok_valid
        && let Some(value) = get_path(fallback, "cache.ttl.ok")
    {
        set_path(merged, "cache.ttl.ok", value.clone());
    }

    let priority_valid = get_path(merged, "storage.priority").is_some_and(Value::is_array);
    if !priority_valid
        && let Some(value) = get_path(fallback, "storage.priority")
    {
        set_path(merged, "storage.priority", value.clone());
    }

    if merged.get("responsive").is_none() {
        let patched = fallback
            .get("responsive")
            .cloned()
            .unwrap_or_else(|| json!({}));
        set_path(merged, "responsive", patched);
    }
}

/// Post-merge feature-flag overlay: force flags unconditionally enable
/// their subsystem and allow the current environment.
pub fn apply_feature_overlays(merged: &mut Value, environment: Environment) {
    if get_path(merged, "features.forceTransformCache").and_then(Value::as_bool) == Some(true) {
        set_path(merged, "cache.enabled", Value::Bool(true));
        push_allowed_environment(merged, "cache.allowedEnvironments", environment);
    }
    if get_path(merged, "debug.forceDebugHeaders").and_then(Value::as_bool) == Some(true) {
        set_path(merged, "debug.enabled", Value::Bool(true));
        push_allowed_environment(merged, "debug.allowedEnvironments", environment);
    }
}

/// The emergency overlay applied at initialization: critical features are
/// force-enabled so a bad stored config cannot disable the serving path.
pub fn apply_emergency_overlay(merged: &mut Value, environment: Environment) {
    set_path(merged, "cache.enabled", Value::Bool(true));
    set_path(merged, "features.forceTransformCache", Value::Bool(true));
    push_allowed_environment(merged, "cache.allowedEnvironments", environment);
}

fn push_allowed_environment(merged: &mut Value, path: &str, environment: Environment) {
    let name = environment.as_str();
    match get_path(merged, path) {
        Some(Value::Array(existing)) => {
            if !existing.iter().any(|v| v.as_str() == Some(name)) {
                let mut updated = existing.clone();
                updated.push(Value::String(name.to_string()));
                set_path(merged, path, Value::Array(updated));
            }
        }
        _ => set_path(merged, path, json!([name])),
    }
}
