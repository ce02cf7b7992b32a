use indexmap::IndexMap;
use refract::core::paths::{diff_paths, flatten, get_path, set_path, unflatten};
use serde_json::{Value, json};

#[test]
fn test_flatten_objects_and_arrays() {
    let tree = json!({
        "a": { "b": 1, "c": [true, { "d": "x" }] },
        "e": null,
    });
    let flat = flatten(&tree);

    assert_eq!(flat.get("a.b"), Some(&json!(1)));
    assert_eq!(flat.get("a.c.0"), Some(&json!(true)));
    assert_eq!(flat.get("a.c.1.d"), Some(&json!("x")));
    assert_eq!(flat.get("e"), Some(&json!(null)));
    assert_eq!(flat.len(), 4);
}

#[test]
fn test_flatten_keeps_empty_containers_as_leaves() {
    let tree = json!({ "a": {}, "b": [] });
    let flat = flatten(&tree);
    assert_eq!(flat.get("a"), Some(&json!({})));
    assert_eq!(flat.get("b"), Some(&json!([])));
}

#[test]
fn test_unflatten_rebuilds_arrays() {
    let mut entries = IndexMap::new();
    entries.insert("items.0".to_string(), json!("a"));
    entries.insert("items.1".to_string(), json!("b"));
    entries.insert("name".to_string(), json!("x"));

    let tree = unflatten(&entries);
    assert_eq!(tree, json!({ "items": ["a", "b"], "name": "x" }));
}

#[test]
fn test_unflatten_sparse_indices_stay_objects() {
    let mut entries = IndexMap::new();
    entries.insert("items.0".to_string(), json!("a"));
    entries.insert("items.2".to_string(), json!("c"));

    let tree = unflatten(&entries);
    assert_eq!(tree, json!({ "items": { "0": "a", "2": "c" } }));
}

#[test]
fn test_flatten_unflatten_round_trip() {
    let tree = json!({
        "modules": {
            "core": {
                "config": { "logging": { "level": "info" }, "flags": [1, 2, 3] }
            }
        },
        "active": ["core"],
    });
    assert_eq!(unflatten(&flatten(&tree)), tree);
}

#[test]
fn test_get_path() {
    let tree = json!({ "a": { "b": [10, { "c": 20 }] } });
    assert_eq!(get_path(&tree, "a.b.0"), Some(&json!(10)));
    assert_eq!(get_path(&tree, "a.b.1.c"), Some(&json!(20)));
    assert_eq!(get_path(&tree, "a.missing"), None);
    assert_eq!(get_path(&tree, "a.b.9"), None);
    assert_eq!(get_path(&tree, "a.b.x"), None);
}

#[test]
fn test_set_path_creates_intermediates() {
    let mut tree = json!({});
    set_path(&mut tree, "a.b.c", json!(1));
    assert_eq!(tree, json!({ "a": { "b": { "c": 1 } } }));

    set_path(&mut tree, "a.b.d", json!(2));
    assert_eq!(tree, json!({ "a": { "b": { "c": 1, "d": 2 } } }));

    // Non-object intermediates are replaced.
    set_path(&mut tree, "a.b.c.deep", json!(3));
    assert_eq!(get_path(&tree, "a.b.c.deep"), Some(&json!(3)));
}

#[test]
fn test_diff_paths_includes_removals() {
    let before = json!({ "a": 1, "b": { "c": 2 }, "gone": true });
    let after = json!({ "a": 1, "b": { "c": 3 }, "new": false });

    let mut changed = diff_paths(&before, &after);
    changed.sort();
    assert_eq!(changed, vec!["b.c", "gone", "new"]);
}

#[test]
fn test_diff_paths_identical_trees_is_empty() {
    let tree = json!({ "a": { "b": [1, 2] } });
    assert!(diff_paths(&tree, &tree).is_empty());
}

#[test]
fn test_scalar_root() {
    let flat = flatten(&json!(42));
    assert_eq!(flat.get(""), Some(&json!(42)));
    assert_eq!(unflatten(&flat), json!(42));
}

#[test]
fn test_diff_scalar_values_of_different_types() {
    // 1 (number) vs "1" (string) must register as a change.
    let before = json!({ "a": 1 });
    let after = json!({ "a": "1" });
    assert_eq!(diff_paths(&before, &after), vec!["a".to_string()]);

    let values: Vec<Value> = vec![json!(0), json!(false), json!(null), json!("")];
    for (i, left) in values.iter().enumerate() {
        for (j, right) in values.iter().enumerate() {
            let changed = diff_paths(&json!({ "v": left }), &json!({ "v": right }));
            assert_eq!(changed.is_empty(), i == j);
        }
    }
}
