//! The fixed global catalog (spec §4.3 "Global catalog").

use std::sync::Arc;

use minijinja::value::Value;
use minijinja::Error as MjError;

use crate::tokenizer::Tokenizer;

use super::filters::failure;

pub fn estimate_tokens(tokenizer: &Arc<dyn Tokenizer>, text: String, model: Option<String>) -> u64 {
    let active = match &model {
        Some(name) => crate::tokenizer::create_tokenizer(Some(name)),
        None => Arc::clone(tokenizer),
    };
    active.count_tokens(&text) as u64
}

pub fn format_json(value: Value, indent: Option<u64>) -> Result<String, MjError> {
    let json = serde_json::to_value(&value).map_err(|e| failure("format_json", e.to_string()))?;
    let indent = indent.unwrap_or(2) as usize;
    let buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(" ".repeat(indent).as_bytes());
    let mut ser = serde_json::Serializer::with_formatter(buf, formatter);
    use serde::Serialize;
    json.serialize(&mut ser).map_err(|e| failure("format_json", e.to_string()))?;
    String::from_utf8(ser.into_inner()).map_err(|e| failure("format_json", e.to_string()))
}

pub fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub fn debug(value: Value) -> String {
    tracing::debug!(target: "promptforge::template", value = %value, "template debug()");
    String::new()
}

pub fn type_of(value: Value) -> String {
    format!("{:?}", value.kind()).to_lowercase()
}

pub fn dir_of(value: Value) -> Result<Vec<String>, MjError> {
    match value.try_iter() {
        Ok(iter) => Ok(iter.map(|v| v.to_string()).collect()),
        Err(_) => Ok(Vec::new()),
    }
}

pub fn len_of(value: Value) -> Result<u64, MjError> {
    value.len().map(|n| n as u64).ok_or_else(|| failure("len_of", format!("{value} has no length")))
}

pub fn validate_json(value: Value, schema: Value) -> Result<bool, MjError> {
    let instance = serde_json::to_value(&value).map_err(|e| failure("validate_json", e.to_string()))?;
    let schema_json = serde_json::to_value(&schema).map_err(|e| failure("validate_json", e.to_string()))?;
    let compiled = match jsonschema::validator_for(&schema_json) {
        Ok(v) => v,
        Err(_) => return Ok(false),
    };
    Ok(compiled.is_valid(&instance))
}

pub fn format_error(error: Value) -> String {
    if let (Some(kind), Some(message)) = (error.get_attr("kind").ok(), error.get_attr("message").ok()) {
        if !kind.is_undefined() && !message.is_undefined() {
            return format!("{kind}: {message}");
        }
    }
    error.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_of_reports_kind() {
        let v = Value::from(42i64);
        assert_eq!(type_of(v), "number");
    }

    #[test]
    fn len_of_sequence() {
        let v = Value::from_serialize(&serde_json::json!([1, 2, 3]));
        assert_eq!(len_of(v).unwrap(), 3);
    }

    #[test]
    fn len_of_scalar_errors() {
        let v = Value::from(1i64);
        assert!(len_of(v).is_err());
    }
}
