//! The fixed filter catalog (spec §4.3 "Filter catalog"). Every filter is
//! pure and deterministic; filters that cannot make sense of their input
//! raise a `FilterError`, surfaced by [`super::render::filter_error`].

use std::collections::BTreeMap;

use minijinja::value::Value;
use minijinja::Error as MjError;
use serde_json::Value as Json;

pub(super) fn failure(filter: &str, reason: impl Into<String>) -> MjError {
    MjError::new(
        minijinja::ErrorKind::InvalidOperation,
        format!("filter '{filter}': {}", reason.into()),
    )
}

fn to_json_value(filter: &str, value: &Value) -> Result<Json, MjError> {
    serde_json::to_value(value).map_err(|e| failure(filter, e.to_string()))
}

fn from_json_value(value: Json) -> Value {
    Value::from_serialize(&value)
}

// ---- Text filters ----------------------------------------------------

pub fn word_count(text: String) -> u64 {
    text.split_whitespace().count() as u64
}

pub fn char_count(text: String) -> u64 {
    text.chars().count() as u64
}

pub fn remove_comments(text: String) -> String {
    let without_block = strip_block_comments(&text);
    without_block
        .lines()
        .map(strip_line_comment)
        .collect::<Vec<_>>()
        .join("\n")
}

fn strip_line_comment(line: &str) -> &str {
    let mut cut = line.len();
    let mut in_string: Option<char> = None;
    let bytes = line.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match in_string {
            Some(q) => {
                if c == '\\' {
                    i += 1;
                } else if c == q {
                    in_string = None;
                }
            }
            None => {
                if c == '"' || c == '\'' {
                    in_string = Some(c);
                } else if c == '#' {
                    cut = i;
                    break;
                } else if c == '/' && bytes.get(i + 1) == Some(&b'/') {
                    cut = i;
                    break;
                }
            }
        }
        i += 1;
    }
    &line[..cut]
}

fn strip_block_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("/*") {
        out.push_str(&rest[..start]);
        match rest[start..].find("*/") {
            Some(end) => rest = &rest[start + end + 2..],
            None => return out,
        }
    }
    out.push_str(rest);
    out
}

pub fn normalize(text: String) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn strip_markdown(text: String) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        let mut line = line.trim_start();
        line = line.trim_start_matches(|c: char| c == '#').trim_start();
        let line = line.trim_start_matches("- ").trim_start_matches("* ").trim_start_matches("+ ");
        let mut chars = line.chars().peekable();
        let mut buf = String::new();
        while let Some(c) = chars.next() {
            match c {
                '*' | '_' | '`' => {}
                '[' => {
                    // [text](url) -> text
                    let mut text_part = String::new();
                    let mut closed = false;
                    for c2 in chars.by_ref() {
                        if c2 == ']' {
                            closed = true;
                            break;
                        }
                        text_part.push(c2);
                    }
                    if closed && chars.peek() == Some(&'(') {
                        chars.next();
                        for c2 in chars.by_ref() {
                            if c2 == ')' {
                                break;
                            }
                        }
                        buf.push_str(&text_part);
                    } else {
                        buf.push('[');
                        buf.push_str(&text_part);
                        if closed {
                            buf.push(']');
                        }
                    }
                }
                other => buf.push(other),
            }
        }
        out.push_str(&buf);
        out.push('\n');
    }
    out.trim_end_matches('\n').to_string()
}

pub fn wrap(text: String, width: u64) -> String {
    let width = width.max(1) as usize;
    let mut lines = Vec::new();
    for paragraph in text.split('\n') {
        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            if current.is_empty() {
                current.push_str(word);
            } else if current.len() + 1 + word.len() <= width {
                current.push(' ');
                current.push_str(word);
            } else {
                lines.push(std::mem::take(&mut current));
                current.push_str(word);
            }
        }
        lines.push(current);
    }
    lines.join("\n")
}

pub fn indent(text: String, n: u64) -> String {
    let prefix = " ".repeat(n as usize);
    text.lines().map(|l| format!("{prefix}{l}")).collect::<Vec<_>>().join("\n")
}

pub fn dedent(text: String) -> String {
    let common = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);
    text.lines().map(|l| if l.len() >= common { &l[common..] } else { l.trim_start() }).collect::<Vec<_>>().join("\n")
}

pub fn escape_special(text: String) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

// ---- Data filters ------------------------------------------------------

pub fn to_json(value: Value) -> Result<String, MjError> {
    let json = to_json_value("to_json", &value)?;
    serde_json::to_string(&json).map_err(|e| failure("to_json", e.to_string()))
}

pub fn from_json(text: String) -> Result<Value, MjError> {
    let json: Json = serde_json::from_str(&text).map_err(|e| failure("from_json", e.to_string()))?;
    Ok(from_json_value(json))
}

fn as_array(filter: &str, value: &Value) -> Result<Vec<Json>, MjError> {
    match to_json_value(filter, value)? {
        Json::Array(items) => Ok(items),
        other => Err(failure(filter, format!("expected a sequence, got {other}"))),
    }
}

pub fn sort_by(value: Value, key: String) -> Result<Value, MjError> {
    let mut items = as_array("sort_by", &value)?;
    items.sort_by(|a, b| field(a, &key).to_string().cmp(&field(b, &key).to_string()));
    Ok(from_json_value(Json::Array(items)))
}

fn field<'a>(item: &'a Json, key: &str) -> &'a Json {
    static NULL: Json = Json::Null;
    item.get(key).unwrap_or(&NULL)
}

pub fn group_by(value: Value, key: String) -> Result<Value, MjError> {
    let items = as_array("group_by", &value)?;
    let mut groups: Vec<(String, Vec<Json>)> = Vec::new();
    for item in items {
        let group_key = field(&item, &key).to_string();
        if let Some(entry) = groups.iter_mut().find(|(k, _)| *k == group_key) {
            entry.1.push(item);
        } else {
            groups.push((group_key, vec![item]));
        }
    }
    let mut map = serde_json::Map::new();
    for (k, v) in groups {
        map.insert(k, Json::Array(v));
    }
    Ok(from_json_value(Json::Object(map)))
}

pub fn filter_by(value: Value, key: String, target: Value) -> Result<Value, MjError> {
    let items = as_array("filter_by", &value)?;
    let target = to_json_value("filter_by", &target)?;
    let filtered: Vec<Json> = items.into_iter().filter(|item| *field(item, &key) == target).collect();
    Ok(from_json_value(Json::Array(filtered)))
}

pub fn extract_field(value: Value, key: String) -> Result<Value, MjError> {
    let items = as_array("extract_field", &value)?;
    let extracted: Vec<Json> = items.iter().map(|item| field(item, &key).clone()).collect();
    Ok(from_json_value(Json::Array(extracted)))
}

pub fn unique(value: Value) -> Result<Value, MjError> {
    let items = as_array("unique", &value)?;
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for item in items {
        let key = item.to_string();
        if seen.insert(key) {
            out.push(item);
        }
    }
    Ok(from_json_value(Json::Array(out)))
}

pub fn frequency(value: Value) -> Result<Value, MjError> {
    let items = as_array("frequency", &value)?;
    let mut counts: Vec<(String, u64)> = Vec::new();
    for item in items {
        let key = item.to_string();
        if let Some(entry) = counts.iter_mut().find(|(k, _)| *k == key) {
            entry.1 += 1;
        } else {
            counts.push((key, 1));
        }
    }
    let mut map = serde_json::Map::new();
    for (k, v) in counts {
        let unquoted = serde_json::from_str::<Json>(&k).unwrap_or(Json::String(k.clone()));
        let display = match unquoted {
            Json::String(s) => s,
            other => other.to_string(),
        };
        map.insert(display, Json::from(v));
    }
    Ok(from_json_value(Json::Object(map)))
}

pub fn aggregate(value: Value) -> Result<Value, MjError> {
    let items = as_array("aggregate", &value)?;
    let mut numbers = Vec::with_capacity(items.len());
    for item in &items {
        match item.as_f64() {
            Some(n) => numbers.push(n),
            None => return Err(failure("aggregate", format!("non-numeric item: {item}"))),
        }
    }
    if numbers.is_empty() {
        let mut map = serde_json::Map::new();
        map.insert("count".into(), Json::from(0));
        return Ok(from_json_value(Json::Object(map)));
    }
    let count = numbers.len();
    let sum: f64 = numbers.iter().sum();
    let avg = sum / count as f64;
    let min = numbers.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = numbers.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    let mut map = serde_json::Map::new();
    map.insert("count".into(), Json::from(count));
    map.insert("sum".into(), json_number(sum));
    map.insert("avg".into(), json_number(avg));
    map.insert("min".into(), json_number(min));
    map.insert("max".into(), json_number(max));
    Ok(from_json_value(Json::Object(map)))
}

fn json_number(n: f64) -> Json {
    serde_json::Number::from_f64(n).map(Json::Number).unwrap_or(Json::Null)
}

// ---- Table filters -------------------------------------------------

fn render_rows(headers: &[String], rows: &[Vec<String>]) -> String {
    let mut out = String::new();
    out.push_str("| ");
    out.push_str(&headers.join(" | "));
    out.push_str(" |\n|");
    for _ in headers {
        out.push_str(" --- |");
    }
    out.push('\n');
    for row in rows {
        out.push_str("| ");
        out.push_str(&row.join(" | "));
        out.push_str(" |\n");
    }
    out.trim_end().to_string()
}

pub fn table(value: Value) -> Result<String, MjError> {
    let items = as_array("table", &value)?;
    let mut headers: Vec<String> = Vec::new();
    for item in &items {
        if let Json::Object(obj) = item {
            for key in obj.keys() {
                if !headers.contains(key) {
                    headers.push(key.clone());
                }
            }
        } else {
            return Err(failure("table", "expected a sequence of objects"));
        }
    }
    let rows: Vec<Vec<String>> = items
        .iter()
        .map(|item| headers.iter().map(|h| field(item, h).to_string().trim_matches('"').to_string()).collect())
        .collect();
    Ok(render_rows(&headers, &rows))
}

pub fn align_table(value: Value) -> Result<String, MjError> {
    let items = as_array("align_table", &value)?;
    let mut headers: Vec<String> = Vec::new();
    for item in &items {
        if let Json::Object(obj) = item {
            for key in obj.keys() {
                if !headers.contains(key) {
                    headers.push(key.clone());
                }
            }
        }
    }
    let rows: Vec<Vec<String>> = items
        .iter()
        .map(|item| headers.iter().map(|h| field(item, h).to_string().trim_matches('"').to_string()).collect())
        .collect();

    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.len());
        }
    }

    let mut out = String::new();
    out.push_str("| ");
    out.push_str(
        &headers.iter().zip(&widths).map(|(h, w)| format!("{:<width$}", h, width = w)).collect::<Vec<_>>().join(" | "),
    );
    out.push_str(" |\n|");
    for w in &widths {
        out.push_str(&format!(" {} |", "-".repeat(*w)));
    }
    out.push('\n');
    for row in &rows {
        out.push_str("| ");
        out.push_str(
            &row.iter().zip(&widths).map(|(c, w)| format!("{:<width$}", c, width = w)).collect::<Vec<_>>().join(" | "),
        );
        out.push_str(" |\n");
    }
    Ok(out.trim_end().to_string())
}

pub fn dict_to_table(value: Value) -> Result<String, MjError> {
    let json = to_json_value("dict_to_table", &value)?;
    let Json::Object(obj) = json else {
        return Err(failure("dict_to_table", "expected a mapping"));
    };
    let rows: Vec<Vec<String>> =
        obj.iter().map(|(k, v)| vec![k.clone(), v.to_string().trim_matches('"').to_string()]).collect();
    Ok(render_rows(&["key".to_string(), "value".to_string()], &rows))
}

pub fn list_to_table(value: Value) -> Result<String, MjError> {
    let items = as_array("list_to_table", &value)?;
    if items.iter().all(|i| matches!(i, Json::Array(_))) {
        let rows: Vec<Vec<String>> = items
            .iter()
            .map(|i| match i {
                Json::Array(inner) => inner.iter().map(|v| v.to_string().trim_matches('"').to_string()).collect(),
                _ => unreachable!(),
            })
            .collect();
        let width = rows.first().map(|r| r.len()).unwrap_or(0);
        let headers: Vec<String> = (0..width).map(|i| format!("col{i}")).collect();
        Ok(render_rows(&headers, &rows))
    } else {
        let rows: Vec<Vec<String>> = items.iter().map(|i| vec![i.to_string().trim_matches('"').to_string()]).collect();
        Ok(render_rows(&["value".to_string()], &rows))
    }
}

pub fn auto_table(value: Value) -> Result<String, MjError> {
    let json = to_json_value("auto_table", &value)?;
    match &json {
        Json::Object(_) => dict_to_table(value),
        Json::Array(items) if items.iter().all(|i| matches!(i, Json::Object(_))) => table(value),
        Json::Array(_) => list_to_table(value),
        other => Err(failure("auto_table", format!("cannot tabulate {other}"))),
    }
}

// ---- Code filters -------------------------------------------------

pub fn format_code(code: String, language: Option<String>) -> String {
    let lang = language.unwrap_or_default();
    format!("```{lang}\n{}\n```", code.trim_end())
}

pub fn strip_comments(code: String) -> String {
    let without_block = strip_block_comments(&code);
    without_block
        .lines()
        .map(|line| {
            if let Some(idx) = line.find("//") {
                &line[..idx]
            } else {
                line
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[allow(unused)]
type Map = BTreeMap<String, Json>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_and_char_count() {
        assert_eq!(word_count("one two three".to_string()), 3);
        assert_eq!(char_count("abc".to_string()), 3);
    }

    #[test]
    fn normalize_collapses_whitespace() {
        assert_eq!(normalize("  a   b\tc \n".to_string()), "a b c");
    }

    #[test]
    fn remove_comments_handles_three_styles() {
        let src = "keep # drop\nkeep2 // drop2\n/* block\nskip */keep3";
        let out = remove_comments(src.to_string());
        assert_eq!(out, "keep \nkeep2 \nkeep3");
    }

    #[test]
    fn aggregate_rejects_non_numeric() {
        let v = Value::from_serialize(&serde_json::json!([1, "x", 3]));
        let err = aggregate(v).unwrap_err();
        assert!(err.to_string().contains("aggregate"));
    }

    #[test]
    fn aggregate_computes_stats() {
        let v = Value::from_serialize(&serde_json::json!([1, 2, 3]));
        let result = aggregate(v).unwrap();
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["count"], 3);
        assert_eq!(json["sum"], 6.0);
    }

    #[test]
    fn unique_preserves_first_occurrence() {
        let v = Value::from_serialize(&serde_json::json!([1, 2, 1, 3, 2]));
        let result = unique(v).unwrap();
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json, serde_json::json!([1, 2, 3]));
    }
}
