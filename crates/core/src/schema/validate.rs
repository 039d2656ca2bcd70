//! Draft-07 validation of the parsed output against the user's *original*
//! (non-normalized) schema (spec §4.4 "Validation").

use serde_json::Value;

use crate::error::{CoreError, CoreResult};

/// Validate `value` against `original_schema`. On failure the returned
/// `OutputSchemaError` carries a clone of `value` so the caller can still
/// surface the object for diagnostics instead of discarding it.
pub fn validate(value: &Value, original_schema: &Value) -> CoreResult<()> {
    let compiled = jsonschema::validator_for(original_schema).map_err(|e| CoreError::OutputSchemaError {
        path: "$".to_string(),
        reason: format!("invalid schema: {e}"),
        value: value.clone(),
    })?;

    match compiled.validate(value) {
        Ok(()) => Ok(()),
        Err(err) => Err(CoreError::OutputSchemaError {
            path: err.instance_path.to_string(),
            reason: err.to_string(),
            value: value.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_matching_value() {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {"a": {"type": "integer"}},
            "required": ["a"],
            "additionalProperties": false
        });
        let value = serde_json::json!({"a": 1});
        assert!(validate(&value, &schema).is_ok());
    }

    #[test]
    fn reports_mismatch() {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {"a": {"type": "integer"}},
            "required": ["a"],
            "additionalProperties": false
        });
        let value = serde_json::json!({"a": "not an integer"});
        let err = validate(&value, &schema).unwrap_err();
        match err {
            CoreError::OutputSchemaError { value: preserved, .. } => assert_eq!(preserved, value),
            other => panic!("expected OutputSchemaError, got {other:?}"),
        }
    }
}
