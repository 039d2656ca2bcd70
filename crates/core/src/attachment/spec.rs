//! Attachment spec grammar (spec §4.2 "Attachment spec grammar").
//!
//! Textual form: `[target[,target...]:]alias=path` or `[target...:]path`
//! (alias omitted -> derived from the path's basename). `target` is one of
//! `prompt`, `code_exec`, `retrieval`, `user_data`; the default target set
//! when the prefix is omitted is `{prompt}`.

use std::path::PathBuf;

use super::{Kind, Target};
use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone)]
pub struct AttachmentSpec {
    pub targets: Vec<Target>,
    pub alias: Option<String>,
    pub path: PathBuf,
    pub kind: Kind,
    pub pattern: Option<String>,
    pub recursive: bool,
    pub explicit_name: bool,
}

/// Parse one `file`/`dir`/`collection` binding value as supplied on the
/// command surface (§6). `kind` is fixed by which CLI option was used.
pub fn parse_spec(
    kind: Kind,
    raw: &str,
    pattern: Option<String>,
    recursive: bool,
) -> CoreResult<AttachmentSpec> {
    if raw.trim().is_empty() {
        return Err(CoreError::InvalidSpec { reason: "empty attachment spec".into() });
    }

    let (target_prefix, rest) = split_target_prefix(raw);
    let targets = parse_targets(target_prefix)?;
    if targets.is_empty() {
        return Err(CoreError::InvalidSpec { reason: "attachment has no targets".into() });
    }

    let (alias, path_str) = match rest.split_once('=') {
        Some((alias, path)) => (Some(alias.to_string()), path),
        None => (None, rest),
    };

    if let Some(ref alias) = alias {
        if !super::is_valid_alias(alias) {
            return Err(CoreError::InvalidSpec {
                reason: format!("invalid alias '{alias}'"),
            });
        }
    }

    if path_str.trim().is_empty() {
        return Err(CoreError::InvalidSpec { reason: "attachment spec has no path".into() });
    }

    if kind == Kind::File && (pattern.is_some() || recursive) {
        return Err(CoreError::InvalidSpec {
            reason: "pattern/recursive are only valid for dir attachments".into(),
        });
    }

    Ok(AttachmentSpec {
        targets,
        explicit_name: alias.is_some(),
        alias,
        path: PathBuf::from(path_str),
        kind,
        pattern,
        recursive,
    })
}

/// Split an optional `target[,target...]:` prefix from the remainder. A
/// prefix is only recognized if every comma-separated segment before the
/// first `:` parses as a known target name — this avoids misreading a
/// Windows-style drive-letter path (`C:\...`) as a target prefix.
fn split_target_prefix(raw: &str) -> (Option<&str>, &str) {
    if let Some(idx) = raw.find(':') {
        let candidate = &raw[..idx];
        if candidate.split(',').all(|t| Target::parse(t.trim()).is_some()) && !candidate.is_empty()
        {
            return (Some(candidate), &raw[idx + 1..]);
        }
    }
    (None, raw)
}

fn parse_targets(prefix: Option<&str>) -> CoreResult<Vec<Target>> {
    match prefix {
        None => Ok(vec![Target::Prompt]),
        Some(s) => {
            let mut targets = Vec::new();
            for part in s.split(',') {
                let part = part.trim();
                let target = Target::parse(part).ok_or_else(|| CoreError::InvalidSpec {
                    reason: format!("unknown target '{part}'"),
                })?;
                if !targets.contains(&target) {
                    targets.push(target);
                }
            }
            Ok(targets)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_target_is_prompt() {
        let spec = parse_spec(Kind::File, "doc=notes.txt", None, false).unwrap();
        assert_eq!(spec.targets, vec![Target::Prompt]);
        assert_eq!(spec.alias.as_deref(), Some("doc"));
        assert_eq!(spec.path, PathBuf::from("notes.txt"));
    }

    #[test]
    fn explicit_single_target() {
        let spec = parse_spec(Kind::File, "code_exec:data=data.csv", None, false).unwrap();
        assert_eq!(spec.targets, vec![Target::CodeExec]);
        assert_eq!(spec.alias.as_deref(), Some("data"));
    }

    #[test]
    fn combined_targets() {
        let spec = parse_spec(Kind::File, "code_exec,retrieval:doc=a.csv", None, false).unwrap();
        assert_eq!(spec.targets, vec![Target::CodeExec, Target::Retrieval]);
    }

    #[test]
    fn bare_path_without_alias() {
        let spec = parse_spec(Kind::File, "notes.txt", None, false).unwrap();
        assert_eq!(spec.alias, None);
        assert!(!spec.explicit_name);
    }

    #[test]
    fn windows_drive_letter_is_not_a_target_prefix() {
        let spec = parse_spec(Kind::File, "doc=C:/Users/me/notes.txt", None, false).unwrap();
        assert_eq!(spec.targets, vec![Target::Prompt]);
        assert_eq!(spec.path, PathBuf::from("C:/Users/me/notes.txt"));
    }

    #[test]
    fn empty_target_set_rejected() {
        // An unknown target makes the whole spec invalid rather than silently
        // falling through to an (also invalid) empty target set.
        let err = parse_spec(Kind::File, "bogus:doc=notes.txt", None, false).unwrap_err();
        assert!(matches!(err, CoreError::InvalidSpec { .. }));
    }

    #[test]
    fn pattern_on_file_kind_rejected() {
        let err =
            parse_spec(Kind::File, "doc=notes.txt", Some("*.rs".into()), false).unwrap_err();
        assert!(matches!(err, CoreError::InvalidSpec { .. }));
    }
}
