//! Attachment & Routing Model (spec §3, §4.2, C2).

mod cache;
mod registry;
mod spec;

pub use cache::ContentCache;
pub use registry::{AttachmentRegistry, CollectionRef, DirRef, FileRef};
pub(crate) use registry::RefData;
pub use spec::{parse_spec, AttachmentSpec};

use std::path::PathBuf;

use serde::Serialize;

/// One of the four tool targets an attachment's content may be routed to
/// (spec §3, §4.2 "Target-tool routing").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    Prompt,
    CodeExec,
    Retrieval,
    UserData,
}

impl Target {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "prompt" => Some(Self::Prompt),
            "code_exec" | "code-exec" => Some(Self::CodeExec),
            "retrieval" => Some(Self::Retrieval),
            "user_data" | "user-data" => Some(Self::UserData),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prompt => "prompt",
            Self::CodeExec => "code_exec",
            Self::Retrieval => "retrieval",
            Self::UserData => "user_data",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    File,
    Dir,
    Collection,
}

/// A user-declared binding of a filesystem path to an alias and a set of
/// target tools (spec §3 "Attachment").
#[derive(Debug, Clone, Serialize)]
pub struct Attachment {
    pub alias: String,
    pub path: PathBuf,
    pub kind: Kind,
    pub targets: Vec<Target>,
    pub pattern: Option<String>,
    pub recursive: bool,
    pub explicit_name: bool,
}

impl Attachment {
    pub fn has_target(&self, target: Target) -> bool {
        self.targets.contains(&target)
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*` (spec §3 invariant).
pub fn is_valid_alias(alias: &str) -> bool {
    let mut chars = alias.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Derive an alias from a file/dir basename: non-alphanumeric -> `_`,
/// digit-leading -> prefixed with `_` (spec §4.2 "Alias derivation").
pub fn derive_alias(basename: &str) -> String {
    let mut out: String = basename
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if out.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false) {
        out.insert(0, '_');
    }
    if out.is_empty() {
        out.push('_');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_validity() {
        assert!(is_valid_alias("doc"));
        assert!(is_valid_alias("_x1"));
        assert!(!is_valid_alias("1x"));
        assert!(!is_valid_alias("a-b"));
        assert!(!is_valid_alias(""));
    }

    #[test]
    fn alias_derivation_matches_scenario_c() {
        // Scenario C: "data.csv" -> "data_csv"
        assert_eq!(derive_alias("data.csv"), "data_csv");
        assert_eq!(derive_alias("9lives.txt"), "_9lives_txt");
    }
}
