//! Schema & output pipeline (spec §4.4): load a draft-07 schema subset,
//! normalize it for structured-output submission, extract a JSON object
//! from a provider response (recovering from duplicated output), validate
//! the extracted object against the original schema, and — when needed —
//! drive the two-pass sentinel workaround for file-bearing responses.

mod extract;
mod loader;
mod normalize;
mod sentinel;
mod validate;

pub use extract::extract;
pub use loader::load;
pub use normalize::{normalize, NormalizeLimits, DEFAULT_MAX_DEPTH, DEFAULT_MAX_PROPERTIES};
pub use sentinel::{run as run_sentinel, SentinelOutcome};
pub use validate::validate;

use std::path::Path;

use serde_json::Value;

use crate::error::CoreResult;

/// The schema as loaded, plus its structured-output-ready normalized form.
pub struct PreparedSchema {
    pub original: Value,
    pub normalized: Value,
    pub warnings: Vec<String>,
}

pub fn prepare(path: &Path, limits: &NormalizeLimits) -> CoreResult<PreparedSchema> {
    let original = load(path)?;
    let (normalized, warnings) = normalize(&original, path, limits)?;
    Ok(PreparedSchema { original, normalized, warnings })
}

/// Extract and validate a provider response body against the original
/// (non-normalized) schema. Returns the parsed object and whether recovery
/// from duplicated output was needed (spec §4.4, §8 Scenario D).
pub fn extract_and_validate(body: &str, original_schema: &Value) -> CoreResult<(Value, bool)> {
    let (value, recovered) = extract(body)?;
    validate(&value, original_schema)?;
    Ok((value, recovered))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn prepare_loads_and_normalizes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"type": "object", "properties": {{"name": {{"type": "string"}}}}}}"#).unwrap();
        let prepared = prepare(file.path(), &NormalizeLimits::default()).unwrap();
        assert_eq!(prepared.normalized["additionalProperties"], false);
        assert_eq!(prepared.original["additionalProperties"], Value::Null);
    }

    #[test]
    fn extract_and_validate_roundtrip() {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {"name": {"type": "string"}},
            "required": ["name"]
        });
        let (value, recovered) = extract_and_validate(r#"{"name": "ok"}"#, &schema).unwrap();
        assert_eq!(value["name"], "ok");
        assert!(!recovered);
    }

    #[test]
    fn extract_and_validate_preserves_value_on_schema_failure() {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {"name": {"type": "string"}},
            "required": ["name"]
        });
        let err = extract_and_validate(r#"{"name": 42}"#, &schema).unwrap_err();
        match err {
            crate::error::CoreError::OutputSchemaError { value, .. } => assert_eq!(value["name"], 42),
            other => panic!("expected OutputSchemaError, got {other:?}"),
        }
    }
}
