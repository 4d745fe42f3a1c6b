// SPDX-License-Identifier: MIT

//! Registry of named, pure data transforms
//!
//! Transforms are deterministic functions from `(input, options)` to output
//! with no side effects. An unknown transform name is an error, never a
//! silent no-op.

use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::engine::error::EngineError;

type TransformFn = fn(&Value, &Value) -> Result<Value, EngineError>;

/// Named transform lookup used by `transform`-type steps
pub struct TransformRegistry {
    transforms: HashMap<String, TransformFn>,
}

impl TransformRegistry {
    /// Registry pre-loaded with the built-in transforms
    pub fn builtin() -> Self {
        let mut registry = Self {
            transforms: HashMap::new(),
        };
        registry.register("sanitize", sanitize);
        registry.register("to_number", to_number);
        registry.register("pick", pick);
        registry.register("merge", merge);
        registry.register("uppercase", uppercase);
        registry.register("lowercase", lowercase);
        registry
    }

    pub fn register(&mut self, name: &str, transform: TransformFn) {
        self.transforms.insert(name.to_string(), transform);
    }

    /// Apply the named transform to the input
    pub fn apply(&self, name: &str, input: &Value, options: &Value) -> Result<Value, EngineError> {
        let transform = self
            .transforms
            .get(name)
            .ok_or_else(|| EngineError::Transform(format!("unknown transform '{}'", name)))?;
        transform(input, options)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.transforms.contains_key(name)
    }
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Trim strings and strip ASCII control characters, recursively
fn sanitize(input: &Value, _options: &Value) -> Result<Value, EngineError> {
    Ok(map_strings(input, &|s| {
        s.trim().chars().filter(|c| !c.is_control()).collect()
    }))
}

/// Parse string fields into numbers. With `options.fields` only those keys
/// are converted; otherwise every convertible string is.
fn to_number(input: &Value, options: &Value) -> Result<Value, EngineError> {
    let fields: Option<Vec<&str>> = options
        .get("fields")
        .and_then(|f| f.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect());

    match input {
        Value::Object(obj) => {
            let mut out = Map::new();
            for (k, v) in obj {
                let wanted = fields
                    .as_ref()
                    .map(|f| f.contains(&k.as_str()))
                    .unwrap_or(true);
                let converted = match v {
                    Value::String(s) if wanted => match s.parse::<f64>() {
                        Ok(n) => serde_json::Number::from_f64(n)
                            .map(Value::Number)
                            .unwrap_or_else(|| v.clone()),
                        Err(_) => v.clone(),
                    },
                    _ => v.clone(),
                };
                out.insert(k.clone(), converted);
            }
            Ok(Value::Object(out))
        }
        Value::String(s) => s
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| EngineError::Transform(format!("'{}' is not a number", s))),
        other => Ok(other.clone()),
    }
}

/// Keep only the keys listed in `options.fields`
fn pick(input: &Value, options: &Value) -> Result<Value, EngineError> {
    let fields = options
        .get("fields")
        .and_then(|f| f.as_array())
        .ok_or_else(|| EngineError::Transform("pick requires an options.fields array".to_string()))?;

    let obj = input
        .as_object()
        .ok_or_else(|| EngineError::Transform("pick requires an object input".to_string()))?;

    let mut out = Map::new();
    for field in fields.iter().filter_map(|v| v.as_str()) {
        if let Some(value) = obj.get(field) {
            out.insert(field.to_string(), value.clone());
        }
    }
    Ok(Value::Object(out))
}

/// Shallow-merge `options.with` into the input object
fn merge(input: &Value, options: &Value) -> Result<Value, EngineError> {
    let with = options
        .get("with")
        .and_then(|w| w.as_object())
        .ok_or_else(|| EngineError::Transform("merge requires an options.with object".to_string()))?;

    let mut out = input
        .as_object()
        .cloned()
        .ok_or_else(|| EngineError::Transform("merge requires an object input".to_string()))?;
    for (k, v) in with {
        out.insert(k.clone(), v.clone());
    }
    Ok(Value::Object(out))
}

/// Uppercase every string value, recursively
fn uppercase(input: &Value, _options: &Value) -> Result<Value, EngineError> {
    Ok(map_strings(input, &|s| s.to_uppercase()))
}

/// Lowercase every string value, recursively
fn lowercase(input: &Value, _options: &Value) -> Result<Value, EngineError> {
    Ok(map_strings(input, &|s| s.to_lowercase()))
}

fn map_strings(value: &Value, f: &dyn Fn(&str) -> String) -> Value {
    match value {
        Value::String(s) => Value::String(f(s)),
        Value::Array(arr) => Value::Array(arr.iter().map(|v| map_strings(v, f)).collect()),
        Value::Object(obj) => Value::Object(
            obj.iter()
                .map(|(k, v)| (k.clone(), map_strings(v, f)))
                .collect(),
        ),
        other => other.clone(),
    }
}
