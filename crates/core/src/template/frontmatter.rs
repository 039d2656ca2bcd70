//! YAML frontmatter extraction (spec §4.3 "Frontmatter").

use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Default)]
pub struct Frontmatter {
    pub system_prompt: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub max_output_tokens: Option<u64>,
    /// Unknown keys, preserved and forwarded to the runner as `extra_config`.
    pub extra_config: Map<String, JsonValue>,
}

#[derive(Debug, Deserialize, Default)]
struct RawFrontmatter {
    system_prompt: Option<String>,
    model: Option<String>,
    temperature: Option<f64>,
    max_output_tokens: Option<u64>,
    #[serde(flatten)]
    extra: Map<String, JsonValue>,
}

/// Split an optional leading `---`-delimited YAML block from the template
/// body. Returns `(frontmatter, body)`; `body` has the frontmatter block
/// (including its delimiters) stripped.
pub fn extract(source: &str) -> CoreResult<(Frontmatter, String)> {
    let trimmed_start = source.trim_start_matches('\u{feff}');
    if !trimmed_start.trim_start().starts_with("---") {
        return Ok((Frontmatter::default(), source.to_string()));
    }

    let after_first = match trimmed_start.trim_start().strip_prefix("---") {
        Some(rest) => rest,
        None => return Ok((Frontmatter::default(), source.to_string())),
    };
    // The first line after `---` must be empty (a bare newline) for this to
    // be a frontmatter block rather than a `---` used as body content.
    let after_first = after_first.strip_prefix('\r').unwrap_or(after_first);
    let after_first = match after_first.strip_prefix('\n') {
        Some(rest) => rest,
        None => return Ok((Frontmatter::default(), source.to_string())),
    };

    let end_marker = after_first.find("\n---").map(|idx| idx + 1);
    let Some(end_idx) = end_marker else {
        return Ok((Frontmatter::default(), source.to_string()));
    };

    let yaml_block = &after_first[..end_idx];
    let rest = &after_first[end_idx..];
    let rest = rest.strip_prefix("---").unwrap_or(rest);
    let rest = rest.strip_prefix('\r').unwrap_or(rest);
    let body = rest.strip_prefix('\n').unwrap_or(rest);

    let raw: RawFrontmatter = if yaml_block.trim().is_empty() {
        RawFrontmatter::default()
    } else {
        serde_yaml::from_str(yaml_block).map_err(|e| CoreError::TemplateRenderError {
            location: "frontmatter".to_string(),
            reason: format!("invalid YAML frontmatter: {e}"),
        })?
    };

    Ok((
        Frontmatter {
            system_prompt: raw.system_prompt,
            model: raw.model,
            temperature: raw.temperature,
            max_output_tokens: raw.max_output_tokens,
            extra_config: raw.extra,
        },
        body.to_string(),
    ))
}
