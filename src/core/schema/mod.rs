// src/core/schema/mod.rs

//! A runtime JSON-schema walker.
//!
//! Schemas are compiled into a closed set of rule variants and walked
//! against candidate documents; no code generation is involved. Errors
//! accumulate with dotted-path locations and human-readable messages.
//!
//! `validate_snapshot` is the entry point the version store calls before
//! any snapshot is written: per-module schema validation plus the
//! cross-module dependency checks.

pub mod formats;

pub use formats::FormatKind;

use crate::core::config_store::ConfigSnapshot;
use indexmap::IndexMap;
use regex::Regex;
use serde_json::Value;
use std::fmt;

/// A single validation finding.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    /// Dotted location; empty string is the document root.
    pub path: String,
    pub message: String,
    pub params: Option<Value>,
}

impl ValidationError {
    fn new(path: &str, message: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            message: message.into(),
            params: None,
        }
    }

    fn with_params(path: &str, message: impl Into<String>, params: Value) -> Self {
        Self {
            path: path.to_string(),
            message: message.into(),
            params: Some(params),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "(root): {}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// The outcome of a validation pass. Errors are fatal; warnings are not.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error(s)", self.errors.len())?;
        if let Some(first) = self.errors.first() {
            write!(f, ", first: {first}")?;
        }
        Ok(())
    }
}

/// JSON type names a `type` keyword can demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Object,
    Array,
    String,
    Number,
    Integer,
    Boolean,
    Null,
}

impl TypeKind {
    fn parse(name: &str) -> Option<TypeKind> {
        match name {
            "object" => Some(TypeKind::Object),
            "array" => Some(TypeKind::Array),
            "string" => Some(TypeKind::String),
            "number" => Some(TypeKind::Number),
            "integer" => Some(TypeKind::Integer),
            "boolean" => Some(TypeKind::Boolean),
            "null" => Some(TypeKind::Null),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            TypeKind::Object => "object",
            TypeKind::Array => "array",
            TypeKind::String => "string",
            TypeKind::Number => "number",
            TypeKind::Integer => "integer",
            TypeKind::Boolean => "boolean",
            TypeKind::Null => "null",
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            TypeKind::Object => value.is_object(),
            TypeKind::Array => value.is_array(),
            TypeKind::String => value.is_string(),
            TypeKind::Number => value.is_number(),
            TypeKind::Integer => value.as_f64().is_some_and(|n| n.fract() == 0.0),
            TypeKind::Boolean => value.is_boolean(),
            TypeKind::Null => value.is_null(),
        }
    }
}

#[derive(Debug, Default)]
pub struct NumberRule {
    minimum: Option<f64>,
    maximum: Option<f64>,
    exclusive_minimum: Option<f64>,
    exclusive_maximum: Option<f64>,
    multiple_of: Option<f64>,
}

#[derive(Debug, Default)]
pub struct StringRule {
    min_length: Option<usize>,
    max_length: Option<usize>,
    pattern: Option<(String, Regex)>,
}

#[derive(Debug)]
pub enum ItemsRule {
    /// Every element validates against one schema.
    Single(Box<CompiledSchema>),
    /// Positional schemas; extra elements fall to `additional_items`.
    Tuple(Vec<CompiledSchema>),
}

#[derive(Debug)]
pub enum AdditionalRule {
    Allowed(bool),
    Schema(Box<CompiledSchema>),
}

#[derive(Debug, Default)]
pub struct ArrayRule {
    min_items: Option<usize>,
    max_items: Option<usize>,
    unique_items: bool,
    items: Option<ItemsRule>,
    additional_items: Option<AdditionalRule>,
    contains: Option<Box<CompiledSchema>>,
}

#[derive(Debug, Default)]
pub struct ObjectRule {
    properties: IndexMap<String, CompiledSchema>,
    additional_properties: Option<AdditionalRule>,
}

/// The closed set of rule variants a schema compiles into.
#[derive(Debug)]
pub enum SchemaRule {
    Type(Vec<TypeKind>),
    Required(Vec<String>),
    Enum(Vec<Value>),
    Const(Value),
    Number(NumberRule),
    String(StringRule),
    Array(ArrayRule),
    Object(ObjectRule),
    AnyOf(Vec<CompiledSchema>),
    OneOf(Vec<CompiledSchema>),
    AllOf(Vec<CompiledSchema>),
    Format(FormatKind),
}

/// A schema document compiled to its rule list. Unknown keywords are
/// ignored, matching the permissive walker this replaces.
#[derive(Debug, Default)]
pub struct CompiledSchema {
    rules: Vec<SchemaRule>,
}

impl CompiledSchema {
    pub fn compile(schema: &Value) -> CompiledSchema {
        let Some(map) = schema.as_object() else {
            // Boolean schemas: `true` (and anything non-object) accepts all.
            return CompiledSchema::default();
        };
        let mut rules = Vec::new();

        if let Some(type_spec) = map.get("type") {
            let kinds: Vec<TypeKind> = match type_spec {
                Value::String(name) => TypeKind::parse(name).into_iter().collect(),
                Value::Array(names) => names
                    .iter()
                    .filter_map(Value::as_str)
                    .filter_map(TypeKind::parse)
                    .collect(),
                _ => Vec::new(),
            };
            if !kinds.is_empty() {
                rules.push(SchemaRule::Type(kinds));
            }
        }

        if let Some(required) = map.get("required").and_then(Value::as_array) {
            let names: Vec<String> = required
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect();
            if !names.is_empty() {
                rules.push(SchemaRule::Required(names));
            }
        }

        if let Some(allowed) = map.get("enum").and_then(Value::as_array) {
            rules.push(SchemaRule::Enum(allowed.clone()));
        }

        if let Some(expected) = map.get("const") {
            rules.push(SchemaRule::Const(expected.clone()));
        }

        let number = NumberRule {
            minimum: map.get("minimum").and_then(Value::as_f64),
            maximum: map.get("maximum").and_then(Value::as_f64),
            exclusive_minimum: map.get("exclusiveMinimum").and_then(Value::as_f64),
            exclusive_maximum: map.get("exclusiveMaximum").and_then(Value::as_f64),
            multiple_of: map.get("multipleOf").and_then(Value::as_f64),
        };
        if number.minimum.is_some()
            || number.maximum.is_some()
            || number.exclusive_minimum.is_some()
            || number.exclusive_maximum.is_some()
            || number.multiple_of.is_some()
        {
            rules.push(SchemaRule::Number(number));
        }

        let string = StringRule {
            min_length: map.get("minLength").and_then(Value::as_u64).map(|n| n as usize),
            max_length: map.get("maxLength").and_then(Value::as_u64).map(|n| n as usize),
            pattern: map
                .get("pattern")
                .and_then(Value::as_str)
                .and_then(|raw| Regex::new(raw).ok().map(|re| (raw.to_string(), re))),
        };
        if string.min_length.is_some() || string.max_length.is_some() || string.pattern.is_some() {
            rules.push(SchemaRule::String(string));
        }

        let items = map.get("items").map(|items_spec| match items_spec {
            Value::Array(tuple) => ItemsRule::Tuple(tuple.iter().map(Self::compile).collect()),
            single => ItemsRule::Single(Box::new(Self::compile(single))),
        });
        let array = ArrayRule {
            min_items: map.get("minItems").and_then(Value::as_u64).map(|n| n as usize),
            max_items: map.get("maxItems").and_then(Value::as_u64).map(|n| n as usize),
            unique_items: map
                .get("uniqueItems")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            items,
            additional_items: map.get("additionalItems").map(compile_additional),
            contains: map
                .get("contains")
                .map(|schema| Box::new(Self::compile(schema))),
        };
        if array.min_items.is_some()
            || array.max_items.is_some()
            || array.unique_items
            || array.items.is_some()
            || array.additional_items.is_some()
            || array.contains.is_some()
        {
            rules.push(SchemaRule::Array(array));
        }

        let object = ObjectRule {
            properties: map
                .get("properties")
                .and_then(Value::as_object)
                .map(|props| {
                    props
                        .iter()
                        .map(|(name, schema)| (name.clone(), Self::compile(schema)))
                        .collect()
                })
                .unwrap_or_default(),
            additional_properties: map.get("additionalProperties").map(compile_additional),
        };
        if !object.properties.is_empty() || object.additional_properties.is_some() {
            rules.push(SchemaRule::Object(object));
        }

        for (keyword, variant) in [
            ("anyOf", SchemaRule::AnyOf as fn(Vec<CompiledSchema>) -> SchemaRule),
            ("oneOf", SchemaRule::OneOf),
            ("allOf", SchemaRule::AllOf),
        ] {
            if let Some(branches) = map.get(keyword).and_then(Value::as_array) {
                rules.push(variant(branches.iter().map(Self::compile).collect()));
            }
        }

        if let Some(format) = map
            .get("format")
            .and_then(Value::as_str)
            .and_then(FormatKind::parse)
        {
            rules.push(SchemaRule::Format(format));
        }

        CompiledSchema { rules }
    }

    /// Validates a document, returning every accumulated error.
    pub fn validate(&self, value: &Value) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        self.check(value, "", &mut errors);
        errors
    }

    fn matches(&self, value: &Value) -> bool {
        self.validate(value).is_empty()
    }

    fn check(&self, value: &Value, path: &str, errors: &mut Vec<ValidationError>) {
        for rule in &self.rules {
            match rule {
                SchemaRule::Type(kinds) => {
                    if !kinds.iter().any(|kind| kind.matches(value)) {
                        let expected: Vec<&str> = kinds.iter().map(TypeKind::name).collect();
                        errors.push(ValidationError::with_params(
                            path,
                            format!("expected type {}", expected.join(" or ")),
                            serde_json::json!({ "expected": expected }),
                        ));
                    }
                }
                SchemaRule::Required(names) => {
                    if let Some(map) = value.as_object() {
                        for name in names {
                            if !map.contains_key(name) {
                                errors.push(ValidationError::new(
                                    &join_path(path, name),
                                    "required property is missing",
                                ));
                            }
                        }
                    }
                }
                SchemaRule::Enum(allowed) => {
                    if !allowed.contains(value) {
                        errors.push(ValidationError::with_params(
                            path,
                            "value is not one of the allowed values",
                            serde_json::json!({ "allowed": allowed }),
                        ));
                    }
                }
                SchemaRule::Const(expected) => {
                    if value != expected {
                        errors.push(ValidationError::with_params(
                            path,
                            "value does not equal the expected constant",
                            serde_json::json!({ "expected": expected }),
                        ));
                    }
                }
                SchemaRule::Number(rule) => self.check_number(rule, value, path, errors),
                SchemaRule::String(rule) => self.check_string(rule, value, path, errors),
                SchemaRule::Array(rule) => self.check_array(rule, value, path, errors),
                SchemaRule::Object(rule) => self.check_object(rule, value, path, errors),
                SchemaRule::AnyOf(branches) => {
                    if !branches.iter().any(|branch| branch.matches(value)) {
                        errors.push(ValidationError::new(
                            path,
                            "value does not match any of the allowed schemas",
                        ));
                    }
                }
                SchemaRule::OneOf(branches) => {
                    let matched = branches
                        .iter()
                        .filter(|branch| branch.matches(value))
                        .count();
                    if matched != 1 {
                        errors.push(ValidationError::with_params(
                            path,
                            format!("value must match exactly one schema, matched {matched}"),
                            serde_json::json!({ "matched": matched }),
                        ));
                    }
                }
                SchemaRule::AllOf(branches) => {
                    for branch in branches {
                        branch.check(value, path, errors);
                    }
                }
                SchemaRule::Format(format) => {
                    if let Some(s) = value.as_str()
                        && !format.check(s)
                    {
                        errors.push(ValidationError::new(
                            path,
                            format!("value is not a valid {}", format.name()),
                        ));
                    }
                }
            }
        }
    }

    fn check_number(
        &self,
        rule: &NumberRule,
        value: &Value,
        path: &str,
        errors: &mut Vec<ValidationError>,
    ) {
        let Some(n) = value.as_f64() else {
            return;
        };
        if let Some(min) = rule.minimum
            && n < min
        {
            errors.push(ValidationError::new(path, format!("value is below minimum {min}")));
        }
        if let Some(max) = rule.maximum
            && n > max
        {
            errors.push(ValidationError::new(path, format!("value is above maximum {max}")));
        }
        if let Some(min) = rule.exclusive_minimum
            && n <= min
        {
            errors.push(ValidationError::new(
                path,
                format!("value must be greater than {min}"),
            ));
        }
        if let Some(max) = rule.exclusive_maximum
            && n >= max
        {
            errors.push(ValidationError::new(
                path,
                format!("value must be less than {max}"),
            ));
        }
        if let Some(step) = rule.multiple_of
            && step > 0.0
            && (n / step).fract().abs() > f64::EPSILON
        {
            errors.push(ValidationError::new(
                path,
                format!("value is not a multiple of {step}"),
            ));
        }
    }

    fn check_string(
        &self,
        rule: &StringRule,
        value: &Value,
        path: &str,
        errors: &mut Vec<ValidationError>,
    ) {
        let Some(s) = value.as_str() else {
            return;
        };
        let chars = s.chars().count();
        if let Some(min) = rule.min_length
            && chars < min
        {
            errors.push(ValidationError::new(
                path,
                format!("string is shorter than {min} characters"),
            ));
        }
        if let Some(max) = rule.max_length
            && chars > max
        {
            errors.push(ValidationError::new(
                path,
                format!("string is longer than {max} characters"),
            ));
        }
        if let Some((raw, re)) = &rule.pattern
            && !re.is_match(s)
        {
            errors.push(ValidationError::with_params(
                path,
                format!("string does not match pattern '{raw}'"),
                serde_json::json!({ "pattern": raw }),
            ));
        }
    }

    fn check_array(
        &self,
        rule: &ArrayRule,
        value: &Value,
        path: &str,
        errors: &mut Vec<ValidationError>,
    ) {
        let Some(items) = value.as_array() else {
            return;
        };
        if let Some(min) = rule.min_items
            && items.len() < min
        {
            errors.push(ValidationError::new(
                path,
                format!("array has fewer than {min} items"),
            ));
        }
        if let Some(max) = rule.max_items
            && items.len() > max
        {
            errors.push(ValidationError::new(
                path,
                format!("array has more than {max} items"),
            ));
        }
        if rule.unique_items {
            for (i, item) in items.iter().enumerate() {
                if items[..i].contains(item) {
                    errors.push(ValidationError::new(
                        &join_path(path, &i.to_string()),
                        "array items must be unique",
                    ));
                }
            }
        }
        match &rule.items {
            Some(ItemsRule::Single(schema)) => {
                for (i, item) in items.iter().enumerate() {
                    schema.check(item, &join_path(path, &i.to_string()), errors);
                }
            }
            Some(ItemsRule::Tuple(schemas)) => {
                for (i, item) in items.iter().enumerate() {
                    match schemas.get(i) {
                        Some(schema) => schema.check(item, &join_path(path, &i.to_string()), errors),
                        None => match &rule.additional_items {
                            Some(AdditionalRule::Allowed(false)) => {
                                errors.push(ValidationError::new(
                                    &join_path(path, &i.to_string()),
                                    "additional items are not allowed",
                                ));
                            }
                            Some(AdditionalRule::Schema(schema)) => {
                                schema.check(item, &join_path(path, &i.to_string()), errors);
                            }
                            _ => {}
                        },
                    }
                }
            }
            None => {}
        }
        if let Some(contains) = &rule.contains
            && !items.iter().any(|item| contains.matches(item))
        {
            errors.push(ValidationError::new(
                path,
                "array contains no item matching the required schema",
            ));
        }
    }

    fn check_object(
        &self,
        rule: &ObjectRule,
        value: &Value,
        path: &str,
        errors: &mut Vec<ValidationError>,
    ) {
        let Some(map) = value.as_object() else {
            return;
        };
        for (name, schema) in &rule.properties {
            if let Some(child) = map.get(name) {
                schema.check(child, &join_path(path, name), errors);
            }
        }
        if let Some(additional) = &rule.additional_properties {
            for (name, child) in map {
                if rule.properties.contains_key(name) {
                    continue;
                }
                match additional {
                    AdditionalRule::Allowed(false) => {
                        errors.push(ValidationError::new(
                            &join_path(path, name),
                            "additional properties are not allowed",
                        ));
                    }
                    AdditionalRule::Schema(schema) => {
                        schema.check(child, &join_path(path, name), errors);
                    }
                    AdditionalRule::Allowed(true) => {}
                }
            }
        }
    }
}

fn compile_additional(spec: &Value) -> AdditionalRule {
    match spec {
        Value::Bool(allowed) => AdditionalRule::Allowed(*allowed),
        schema => AdditionalRule::Schema(Box::new(CompiledSchema::compile(schema))),
    }
}

fn join_path(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{prefix}.{segment}")
    }
}

/// Validates a snapshot before storage: each module's config against its
/// declared schema, then the cross-module dependency checks. A missing
/// dependency is fatal; a dependency that exists but is absent from
/// `activeModules` is a warning, as is a satisfied module missing from
/// `activeModules`.
pub fn validate_snapshot(snapshot: &ConfigSnapshot) -> ValidationReport {
    let mut report = ValidationReport::default();

    for (name, module) in &snapshot.modules {
        if module.meta.schema.as_object().is_none_or(|m| m.is_empty()) {
            continue;
        }
        let compiled = CompiledSchema::compile(&module.meta.schema);
        for mut error in compiled.validate(&module.config) {
            let config_root = format!("modules.{name}.config");
            error.path = if error.path.is_empty() {
                config_root
            } else {
                format!("{config_root}.{}", error.path)
            };
            report.errors.push(error);
        }
    }

    for (name, module) in &snapshot.modules {
        let Some(dependencies) = &module.meta.module_dependencies else {
            continue;
        };
        let mut satisfied = true;
        for dependency in dependencies {
            if !snapshot.modules.contains_key(dependency) {
                satisfied = false;
                report.errors.push(ValidationError::new(
                    &format!("modules.{name}._meta.moduleDependencies"),
                    format!("depends on missing module '{dependency}'"),
                ));
            } else if !snapshot.meta.active_modules.contains(dependency) {
                report.warnings.push(ValidationError::new(
                    &format!("modules.{name}._meta.moduleDependencies"),
                    format!("dependency '{dependency}' is not in activeModules"),
                ));
            }
        }
        if satisfied && !snapshot.meta.active_modules.contains(name) {
            report.warnings.push(ValidationError::new(
                &format!("modules.{name}"),
                "module satisfies its dependencies but is not in activeModules",
            ));
        }
    }

    report
}
