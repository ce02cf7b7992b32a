// src/core/paths.rs

//! Dotted-path utilities over JSON trees.
//!
//! Flatten/unflatten underpin both version diffing and dotted value lookup,
//! so they live here as pure helpers with their own test suite.

use indexmap::IndexMap;
use serde_json::{Map, Value};

/// Flattens a JSON tree into `dot.path -> leaf` entries.
///
/// Array elements are addressed by index (`items.0.name`). Empty objects and
/// arrays are kept as leaves so that flatten/unflatten round-trips them.
pub fn flatten(value: &Value) -> IndexMap<String, Value> {
    let mut out = IndexMap::new();
    flatten_into(value, String::new(), &mut out);
    out
}

fn flatten_into(value: &Value, prefix: String, out: &mut IndexMap<String, Value>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                let path = join(&prefix, key);
                flatten_into(child, path, out);
            }
        }
        Value::Array(items) if !items.is_empty() => {
            for (index, child) in items.iter().enumerate() {
                let path = join(&prefix, &index.to_string());
                flatten_into(child, path, out);
            }
        }
        leaf => {
            out.insert(prefix, leaf.clone());
        }
    }
}

fn join(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{prefix}.{segment}")
    }
}

/// Rebuilds a JSON tree from flattened `dot.path -> leaf` entries.
///
/// A level whose keys are exactly the contiguous integers `0..n` is rebuilt
/// as an array; everything else becomes an object.
pub fn unflatten(entries: &IndexMap<String, Value>) -> Value {
    if let Some(root) = entries.get("") {
        return root.clone();
    }
    let mut root = Value::Object(Map::new());
    for (path, leaf) in entries {
        set_path(&mut root, path, leaf.clone());
    }
    rebuild_arrays(root)
}

fn rebuild_arrays(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let rebuilt: Map<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, rebuild_arrays(v)))
                .collect();
            if !rebuilt.is_empty() && is_index_map(&rebuilt) {
                let mut items: Vec<(usize, Value)> = rebuilt
                    .into_iter()
                    .map(|(k, v)| (k.parse::<usize>().unwrap(), v))
                    .collect();
                items.sort_by_key(|(i, _)| *i);
                Value::Array(items.into_iter().map(|(_, v)| v).collect())
            } else {
                Value::Object(rebuilt)
            }
        }
        Value::Array(items) => Value::Array(items.into_iter().map(rebuild_arrays).collect()),
        leaf => leaf,
    }
}

fn is_index_map(map: &Map<String, Value>) -> bool {
    let mut indices: Vec<usize> = Vec::with_capacity(map.len());
    for key in map.keys() {
        match key.parse::<usize>() {
            Ok(i) => indices.push(i),
            Err(_) => return false,
        }
    }
    indices.sort_unstable();
    indices.iter().enumerate().all(|(want, got)| want == *got)
}

/// Traverses a JSON tree by dotted path. Array segments must be numeric.
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Writes a value at a dotted path, creating intermediate objects as needed.
/// Existing non-object intermediates are replaced.
pub fn set_path(target: &mut Value, path: &str, value: Value) {
    let mut current = target;
    let segments: Vec<&str> = path.split('.').collect();
    for (i, segment) in segments.iter().enumerate() {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let map = current.as_object_mut().unwrap();
        if i == segments.len() - 1 {
            map.insert(segment.to_string(), value);
            return;
        }
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

/// Returns the union of dotted paths whose leaf values differ between two
/// trees, including paths present on only one side.
pub fn diff_paths(before: &Value, after: &Value) -> Vec<String> {
    let flat_before = flatten(before);
    let flat_after = flatten(after);

    let mut changed = Vec::new();
    for (path, value) in &flat_after {
        match flat_before.get(path) {
            Some(previous) if previous == value => {}
            _ => changed.push(path.clone()),
        }
    }
    for path in flat_before.keys() {
        if !flat_after.contains_key(path) {
            changed.push(path.clone());
        }
    }
    changed
}
