//! Schema loading (spec §4.4 "Schema loading").

use std::path::Path;

use serde_json::Value;

use crate::error::{CoreError, CoreResult};

/// Load and (if necessary) unwrap a schema document from disk. A document
/// with a wrapping `"schema"` key is unwrapped; the root must be an object.
pub fn load(path: &Path) -> CoreResult<Value> {
    let text = std::fs::read_to_string(path).map_err(|e| CoreError::Io { path: path.to_path_buf(), source: e })?;
    let raw: Value = serde_json::from_str(&text).map_err(|e| CoreError::SchemaIncompatible {
        path: path.to_path_buf(),
        reason: format!("invalid JSON: {e}"),
    })?;

    let unwrapped = match raw {
        Value::Object(ref map) if map.len() == 1 && map.contains_key("schema") => map["schema"].clone(),
        other => other,
    };

    if !unwrapped.is_object() {
        return Err(CoreError::SchemaIncompatible {
            path: path.to_path_buf(),
            reason: "schema root is not an object".to_string(),
        });
    }

    Ok(unwrapped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwraps_schema_key() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("s.json");
        std::fs::write(&path, r#"{"schema": {"type": "object", "properties": {}}}"#).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded["type"], "object");
    }

    #[test]
    fn rejects_non_object_root() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("s.json");
        std::fs::write(&path, r#"["not", "an", "object"]"#).unwrap();
        let err = load(&path).unwrap_err();
        assert!(matches!(err, CoreError::SchemaIncompatible { .. }));
    }
}
