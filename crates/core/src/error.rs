//! Error taxonomy for the core pipeline (spec §7).
//!
//! One variant per error kind. Variants carry the path/field/reason needed
//! for the single-line user summary; `exit_code` maps each kind to the
//! process exit status from §4.5.

use std::path::PathBuf;

use serde_json::Value;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("path denied: {path} ({reason})")]
    PathDenied { path: PathBuf, reason: String },

    #[error("invalid path: {path} ({reason})")]
    PathInvalid { path: PathBuf, reason: String },

    #[error("symlink loop at {path}")]
    SymlinkLoop { path: PathBuf },

    #[error("alias conflict: {alias}")]
    AliasConflict { alias: String },

    #[error("unknown alias: {alias}")]
    UnknownAlias { alias: String },

    #[error("invalid attachment spec: {reason}")]
    InvalidSpec { reason: String },

    #[error("content not available for '{alias}': not routed to prompt")]
    ContentNotAvailable { alias: String },

    #[error("undefined template variable: {name}")]
    TemplateUndefined { name: String },

    #[error("template render error at {location}: {reason}")]
    TemplateRenderError { location: String, reason: String },

    #[error("filter error in '{filter}': {reason}")]
    FilterError { filter: String, reason: String },

    #[error("schema incompatible ({path}): {reason}")]
    SchemaIncompatible { path: PathBuf, reason: String },

    #[error("could not parse model output at byte {position}: {excerpt}")]
    OutputParseError { position: usize, excerpt: String },

    /// `value` is the parsed-but-invalid object, kept so callers can still
    /// surface it for diagnostics (spec §4.4 "Validation": "the object is
    /// still returned for diagnostics").
    #[error("output failed schema validation at {path}: {reason}")]
    OutputSchemaError { path: String, reason: String, value: Value },

    #[error("provider error ({code}): {message}")]
    ProviderError { code: String, message: String, retryable: bool },

    #[error("timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("canceled by user")]
    CanceledByUser,

    #[error("limit exceeded: {what}")]
    LimitExceeded { what: String },

    #[error("io error on {path}: {source}")]
    Io { path: PathBuf, #[source] source: std::io::Error },
}

impl CoreError {
    /// Process exit code per spec §4.5.
    pub fn exit_code(&self) -> i32 {
        match self {
            CoreError::AliasConflict { .. }
            | CoreError::InvalidSpec { .. }
            | CoreError::UnknownAlias { .. } => 1,
            CoreError::TemplateUndefined { .. }
            | CoreError::TemplateRenderError { .. }
            | CoreError::FilterError { .. } => 2,
            CoreError::SchemaIncompatible { .. } | CoreError::OutputSchemaError { .. } => 3,
            CoreError::ProviderError { .. } => 4,
            CoreError::Timeout { .. } => 5,
            CoreError::CanceledByUser => 6,
            CoreError::PathDenied { .. } | CoreError::PathInvalid { .. } | CoreError::SymlinkLoop { .. } => 7,
            CoreError::OutputParseError { .. } => 4,
            CoreError::ContentNotAvailable { .. } => 2,
            CoreError::LimitExceeded { .. } => 1,
            CoreError::Io { .. } => 1,
        }
    }

    /// Stable kind string for the structured diagnostic block (§7).
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::PathDenied { .. } => "PathDenied",
            CoreError::PathInvalid { .. } => "PathInvalid",
            CoreError::SymlinkLoop { .. } => "SymlinkLoop",
            CoreError::AliasConflict { .. } => "AliasConflict",
            CoreError::UnknownAlias { .. } => "UnknownAlias",
            CoreError::InvalidSpec { .. } => "InvalidSpec",
            CoreError::ContentNotAvailable { .. } => "ContentNotAvailable",
            CoreError::TemplateUndefined { .. } => "TemplateUndefined",
            CoreError::TemplateRenderError { .. } => "TemplateRenderError",
            CoreError::FilterError { .. } => "FilterError",
            CoreError::SchemaIncompatible { .. } => "SchemaIncompatible",
            CoreError::OutputParseError { .. } => "OutputParseError",
            CoreError::OutputSchemaError { .. } => "OutputSchemaError",
            CoreError::ProviderError { .. } => "ProviderError",
            CoreError::Timeout { .. } => "Timeout",
            CoreError::CanceledByUser => "CanceledByUser",
            CoreError::LimitExceeded { .. } => "LimitExceeded",
            CoreError::Io { .. } => "Io",
        }
    }
}
