// src/core/config_api/env_resolve.rs

//! `${NAME}` environment-reference resolution inside configuration values.
//!
//! Unresolvable references degrade differently by deployment environment:
//! production masks sensitive-looking names as `[MISSING_SECRET]` and blanks
//! the rest, while non-production keeps the name visible as `[ENV:NAME]` so
//! misconfigurations are findable.

use crate::config::Environment;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

static ENV_REF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

static SENSITIVE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)key|secret|token|password|credential|auth|api[-_]?key|private").unwrap()
});

/// Replaces every `${NAME}` in a string from the environment map.
pub fn resolve_str(input: &str, env: &HashMap<String, String>, environment: Environment) -> String {
    ENV_REF_RE
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            match env.get(name) {
                Some(value) => value.clone(),
                None => missing_placeholder(name, environment),
            }
        })
        .into_owned()
}

fn missing_placeholder(name: &str, environment: Environment) -> String {
    if environment.is_production() {
        if SENSITIVE_RE.is_match(name) {
            "[MISSING_SECRET]".to_string()
        } else {
            String::new()
        }
    } else {
        format!("[ENV:{name}]")
    }
}

/// Resolves references in every string leaf of a JSON tree.
pub fn resolve_tree(value: &Value, env: &HashMap<String, String>, environment: Environment) -> Value {
    match value {
        Value::String(s) => Value::String(resolve_str(s, env, environment)),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_tree(v, env, environment)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| resolve_tree(v, env, environment))
                .collect(),
        ),
        leaf => leaf.clone(),
    }
}
