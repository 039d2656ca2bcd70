//! Draft-07 normalization into a provider-ready schema (spec §3 "Schema",
//! §4.4 "Normalization"). The user's on-disk schema is never mutated: this
//! operates on an in-memory clone.

use std::path::Path;

use serde_json::{Map, Value};

use crate::error::{CoreError, CoreResult};

pub const DEFAULT_MAX_DEPTH: usize = 5;
pub const DEFAULT_MAX_PROPERTIES: usize = 100;

const FORBIDDEN_KEYWORDS: &[&str] = &["$ref", "oneOf", "anyOf", "allOf", "not", "if", "then", "else"];

#[derive(Debug, Clone)]
pub struct NormalizeLimits {
    pub max_depth: usize,
    pub max_properties: usize,
}

impl Default for NormalizeLimits {
    fn default() -> Self {
        Self { max_depth: DEFAULT_MAX_DEPTH, max_properties: DEFAULT_MAX_PROPERTIES }
    }
}

/// Normalize `schema` (already loaded/unwrapped) into a provider-ready
/// schema, returning the transformed document plus a human-readable list of
/// the transforms applied (surfaced in dry-run output).
pub fn normalize(schema: &Value, schema_path: &Path, limits: &NormalizeLimits) -> CoreResult<(Value, Vec<String>)> {
    let mut out = schema.clone();
    let mut transforms = Vec::new();

    check_forbidden(&out, "/", schema_path)?;

    {
        let Some(obj) = out.as_object_mut() else {
            return Err(CoreError::SchemaIncompatible {
                path: schema_path.to_path_buf(),
                reason: "schema root is not an object".to_string(),
            });
        };
        match obj.get("type") {
            None => {
                obj.insert("type".to_string(), Value::String("object".to_string()));
                transforms.push("inserted root type=\"object\"".to_string());
            }
            Some(Value::String(t)) if t == "object" => {}
            Some(other) => {
                return Err(CoreError::SchemaIncompatible {
                    path: schema_path.to_path_buf(),
                    reason: format!("root type must be \"object\", found {other}"),
                });
            }
        }
    }

    normalize_node(&mut out, "/", 1, limits, schema_path, &mut transforms)?;

    Ok((out, transforms))
}

fn check_forbidden(node: &Value, pointer: &str, schema_path: &Path) -> CoreResult<()> {
    if let Value::Object(obj) = node {
        for kw in FORBIDDEN_KEYWORDS {
            if obj.contains_key(*kw) {
                return Err(CoreError::SchemaIncompatible {
                    path: schema_path.to_path_buf(),
                    reason: format!("unsupported keyword '{kw}' at {pointer}"),
                });
            }
        }
        for (key, value) in obj {
            check_forbidden(value, &format!("{pointer}{key}/"), schema_path)?;
        }
    } else if let Value::Array(items) = node {
        for (i, item) in items.iter().enumerate() {
            check_forbidden(item, &format!("{pointer}{i}/"), schema_path)?;
        }
    }
    Ok(())
}

fn normalize_node(
    node: &mut Value,
    pointer: &str,
    depth: usize,
    limits: &NormalizeLimits,
    schema_path: &Path,
    transforms: &mut Vec<String>,
) -> CoreResult<()> {
    if depth > limits.max_depth {
        return Err(CoreError::SchemaIncompatible {
            path: schema_path.to_path_buf(),
            reason: format!("schema depth exceeds limit {} at {pointer}", limits.max_depth),
        });
    }

    let Value::Object(obj) = node else { return Ok(()) };

    obj.remove("format");

    let is_object_type = matches!(obj.get("type"), Some(Value::String(t)) if t == "object");

    if is_object_type || obj.contains_key("properties") {
        let property_keys: Vec<String> = obj
            .get("properties")
            .and_then(Value::as_object)
            .map(|p| p.keys().cloned().collect())
            .unwrap_or_default();

        if property_keys.len() > limits.max_properties {
            return Err(CoreError::SchemaIncompatible {
                path: schema_path.to_path_buf(),
                reason: format!("property count {} exceeds limit {} at {pointer}", property_keys.len(), limits.max_properties),
            });
        }

        let needs_additional_properties = obj.get("additionalProperties") != Some(&Value::Bool(false));
        if needs_additional_properties {
            obj.insert("additionalProperties".to_string(), Value::Bool(false));
            transforms.push(format!("set additionalProperties=false at {pointer}"));
        }

        let required_matches = matches!(
            obj.get("required"),
            Some(Value::Array(items)) if items.len() == property_keys.len()
                && property_keys.iter().all(|k| items.contains(&Value::String(k.clone())))
        );
        if !required_matches {
            obj.insert(
                "required".to_string(),
                Value::Array(property_keys.iter().cloned().map(Value::String).collect()),
            );
            transforms.push(format!("set required=properties at {pointer}"));
        }

        if let Some(Value::Object(properties)) = obj.get_mut("properties") {
            let mut entries: Vec<(String, Value)> = properties.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            for (key, mut value) in entries.drain(..) {
                normalize_node(&mut value, &format!("{pointer}{key}/"), depth + 1, limits, schema_path, transforms)?;
                properties.insert(key, value);
            }
        }
    }

    if let Some(items) = obj.get_mut("items") {
        normalize_node(items, &format!("{pointer}items/"), depth + 1, limits, schema_path, transforms)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> NormalizeLimits {
        NormalizeLimits::default()
    }

    #[test]
    fn adds_additional_properties_and_required() {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {"a": {"type": "integer"}, "b": {"type": "string"}}
        });
        let (normalized, transforms) = normalize(&schema, Path::new("s.json"), &limits()).unwrap();
        assert_eq!(normalized["additionalProperties"], false);
        let required: Vec<&str> = normalized["required"].as_array().unwrap().iter().map(|v| v.as_str().unwrap()).collect();
        assert_eq!(required.len(), 2);
        assert!(!transforms.is_empty());
    }

    #[test]
    fn normalization_is_idempotent() {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {"a": {"type": "object", "properties": {"b": {"type": "integer"}}}}
        });
        let (first, _) = normalize(&schema, Path::new("s.json"), &limits()).unwrap();
        let (second, transforms_second) = normalize(&first, Path::new("s.json"), &limits()).unwrap();
        assert_eq!(first, second);
        assert!(transforms_second.is_empty());
    }

    #[test]
    fn rejects_one_of_at_root() {
        let schema = serde_json::json!({"oneOf": [{"type": "object"}]});
        let err = normalize(&schema, Path::new("s.json"), &limits()).unwrap_err();
        assert!(matches!(err, CoreError::SchemaIncompatible { .. }));
    }

    #[test]
    fn rejects_excess_depth() {
        let mut schema = serde_json::json!({"type": "string"});
        for _ in 0..7 {
            schema = serde_json::json!({"type": "object", "properties": {"next": schema}});
        }
        let err = normalize(&schema, Path::new("s.json"), &limits()).unwrap_err();
        assert!(matches!(err, CoreError::SchemaIncompatible { .. }));
    }
}
