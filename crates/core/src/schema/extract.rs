//! Robust JSON extraction (spec §4.4 "Robust JSON extraction (required)").
//!
//! Providers occasionally emit the structured payload twice, concatenated.
//! Recovery is deliberately narrow (spec §9 "JSON duplication recovery"):
//! only an exact duplication of the first balanced object is accepted.

use serde_json::Value;

use crate::error::{CoreError, CoreResult};

/// Parse the model's raw response body into a JSON value. Returns
/// `(value, recovered)`; `recovered` is `true` when the body had to be
/// repaired by dropping a duplicated suffix.
pub fn extract(body: &str) -> CoreResult<(Value, bool)> {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        return Ok((value, false));
    }

    let trimmed_start = body.len() - body.trim_start().len();
    let Some((start, end)) = find_first_balanced_object(body) else {
        return Err(parse_error(body, trimmed_start));
    };

    let prefix = &body[start..end];
    let prefix_value: Value = serde_json::from_str(prefix).map_err(|_| parse_error(body, start))?;

    let suffix = body[end..].trim();
    if suffix.is_empty() {
        return Err(parse_error(body, start));
    }
    let suffix_value: Value = match serde_json::from_str(suffix) {
        Ok(v) => v,
        Err(_) => return Err(parse_error(body, end)),
    };

    if suffix_value == prefix_value {
        Ok((prefix_value, true))
    } else {
        Err(parse_error(body, end))
    }
}

fn parse_error(body: &str, position: usize) -> CoreError {
    let start = position.min(body.len());
    let end = (start + 80).min(body.len());
    CoreError::OutputParseError { position: start, excerpt: body[start..end].to_string() }
}

/// Scan for the first balanced `{...}` object, tracking string literals and
/// escapes so braces inside strings don't affect nesting depth. Returns the
/// byte range `[start, end)` (end exclusive, past the closing brace).
fn find_first_balanced_object(body: &str) -> Option<(usize, usize)> {
    let bytes = body.as_bytes();
    let start = body.find('{')?;

    let mut depth: i64 = 0;
    let mut in_string = false;
    let mut escape = false;
    let mut i = start;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if in_string {
            if escape {
                escape = false;
            } else if c == '\\' {
                escape = true;
            } else if c == '"' {
                in_string = false;
            }
        } else {
            match c {
                '"' => in_string = true,
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some((start, i + 1));
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_body() {
        let (value, recovered) = extract(r#"{"a":1,"b":2}"#).unwrap();
        assert_eq!(value, serde_json::json!({"a": 1, "b": 2}));
        assert!(!recovered);
    }

    #[test]
    fn recovers_exact_duplication() {
        let body = r#"{"a":1,"b":2}{"a":1,"b":2}"#;
        let (value, recovered) = extract(body).unwrap();
        assert_eq!(value, serde_json::json!({"a": 1, "b": 2}));
        assert!(recovered);
    }

    #[test]
    fn rejects_non_duplicate_suffix() {
        let body = r#"{"a":1,"b":2}{"a":1,"b":3}"#;
        let err = extract(body).unwrap_err();
        assert!(matches!(err, CoreError::OutputParseError { .. }));
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_the_scanner() {
        let body = r#"{"note":"uses a { brace }"}"#;
        let (value, recovered) = extract(body).unwrap();
        assert_eq!(value["note"], "uses a { brace }");
        assert!(!recovered);
    }

    #[test]
    fn garbage_yields_output_parse_error() {
        let err = extract("not json at all").unwrap_err();
        assert!(matches!(err, CoreError::OutputParseError { .. }));
    }
}
