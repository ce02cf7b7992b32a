use proptest::prelude::*;
use refract::core::cache::key::{OutputFormat, TransformOptions, fnv1a_32, transform_key};
use refract::core::config_store::canonical_json;
use refract::core::paths::{flatten, unflatten};
use serde_json::{Map, Value, json};
use url::Url;

fn leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        "[a-z ]{0,8}".prop_map(|s| json!(s)),
    ]
}

/// JSON trees with non-numeric object keys, so array rebuilding stays
/// unambiguous.
fn tree() -> impl Strategy<Value = Value> {
    leaf().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

proptest! {
    #[test]
    fn prop_flatten_unflatten_identity(value in tree()) {
        let flat = flatten(&value);
        prop_assert_eq!(unflatten(&flat), value);
    }

    #[test]
    fn prop_every_flattened_path_resolves(value in tree()) {
        let flat = flatten(&value);
        for (path, leaf) in &flat {
            if path.is_empty() {
                // Scalar root: the whole value is the leaf.
                prop_assert_eq!(leaf, &value);
            } else {
                prop_assert_eq!(refract::core::paths::get_path(&value, path), Some(leaf));
            }
        }
    }

    #[test]
    fn prop_fnv1a_is_deterministic(input in any::<Vec<u8>>()) {
        prop_assert_eq!(fnv1a_32(&input), fnv1a_32(&input.clone()));
    }

    #[test]
    fn prop_transform_key_is_pure(
        path in "[a-z]{1,10}\\.(jpg|png)",
        width in proptest::option::of(1u32..4000),
        height in proptest::option::of(1u32..4000),
        quality in proptest::option::of(1u8..100),
    ) {
        let url = Url::parse(&format!("https://example.com/{path}")).unwrap();
        let opts = TransformOptions { width, height, quality, ..Default::default() };
        let twin = opts.clone();

        let first = transform_key("transform", &url, &opts, OutputFormat::Auto);
        let second = transform_key("transform", &url, &twin, OutputFormat::Auto);
        prop_assert_eq!(&first, &second);

        // Shape: five colon-separated segments ending in 8 hex digits.
        let segments: Vec<&str> = first.split(':').collect();
        prop_assert_eq!(segments.len(), 5);
        prop_assert_eq!(segments[4].len(), 8);
    }

    #[test]
    fn prop_canonical_json_ignores_insertion_order(
        pairs in prop::collection::btree_map("[a-z]{1,6}", 0i64..100, 1..6)
    ) {
        let mut forward = Map::new();
        for (k, v) in &pairs {
            forward.insert(k.clone(), json!(v));
        }
        let mut reverse = Map::new();
        for (k, v) in pairs.iter().rev() {
            reverse.insert(k.clone(), json!(v));
        }
        prop_assert_eq!(
            canonical_json(&Value::Object(forward)),
            canonical_json(&Value::Object(reverse))
        );
    }
}
