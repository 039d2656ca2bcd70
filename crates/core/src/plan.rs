//! `ExecutionPlan` and its building blocks (spec §3 "ExecutionPlan", §4.5
//! "Limits"). The plan itself is produced by [`crate::runner::build_plan`];
//! this module only holds the data shapes.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value as JsonValue};

use crate::attachment::{AttachmentRegistry, Kind, Target};
use crate::path_security::SecurityMode;
use crate::schema::PreparedSchema;

/// Limits enforced before and during execution (spec §4.5 "Limits").
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_file_size: Option<u64>,
    pub timeout: Duration,
    pub max_retries: u32,
    pub max_cost: Option<f64>,
}

impl Default for Limits {
    fn default() -> Self {
        Self { max_file_size: None, timeout: Duration::from_secs(300), max_retries: 3, max_cost: None }
    }
}

/// Which model-side tools are enabled for this run (spec §6 "Tools").
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ToolFlags {
    pub code_exec: bool,
    pub retrieval: bool,
    /// Corresponds to `ci-download`: triggers the sentinel two-pass when set
    /// (spec §4.4, §6).
    pub ci_download: bool,
}

/// One `file`/`dir`/`collection` attachment binding exactly as supplied on
/// the command surface (spec §6 "File bindings"), before path validation.
#[derive(Debug, Clone)]
pub struct RawAttachment {
    pub kind: Kind,
    /// The raw spec text, e.g. `"code_exec:data=data.csv"`.
    pub raw: String,
    pub pattern: Option<String>,
    pub recursive: bool,
}

/// The user's invocation translated into CLI-agnostic form (spec §6
/// "Command surface (abstract)"). The CLI crate is responsible for parsing
/// its own flags into this shape.
#[derive(Debug, Clone, Default)]
pub struct RawInvocation {
    pub template_path: PathBuf,
    pub schema_path: PathBuf,
    pub attachments: Vec<RawAttachment>,
    pub vars: BTreeMap<String, String>,
    pub json_vars: BTreeMap<String, JsonValue>,
    pub security_mode: Option<SecurityMode>,
    pub base_dir: Option<PathBuf>,
    pub allow_dirs: Vec<PathBuf>,
    pub allow_files: Vec<PathBuf>,
    pub allow_list_file: Option<PathBuf>,
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub max_output_tokens: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
    pub max_file_size: Option<u64>,
    pub max_cost: Option<f64>,
    pub enable_code_exec: bool,
    pub enable_retrieval: bool,
    pub ci_download: bool,
    pub output_file: Option<PathBuf>,
    pub run_summary_json: Option<PathBuf>,
    pub dry_run: bool,
    pub dry_run_json: bool,
    pub download_dir: Option<PathBuf>,
}

/// Derived record produced by plan construction (spec §3 "ExecutionPlan").
pub struct ExecutionPlan {
    pub template_path: PathBuf,
    pub schema_path: PathBuf,
    pub registry: AttachmentRegistry,
    pub vars: BTreeMap<String, String>,
    pub json_vars: BTreeMap<String, JsonValue>,
    pub model: String,
    pub temperature: f64,
    pub max_output_tokens: Option<u64>,
    pub system_prompt: Option<String>,
    pub security_mode: SecurityMode,
    pub tools: ToolFlags,
    pub output_file: Option<PathBuf>,
    pub limits: Limits,
    pub download_dir: PathBuf,
    pub extra_config: Map<String, JsonValue>,
    pub schema: PreparedSchema,
    /// The template body with frontmatter stripped, ready for final render.
    pub template_body: String,
    /// Validation-render outcome recorded during plan construction (step 7).
    pub token_estimate: u64,
    pub token_best_effort: bool,
    pub upload_summary: BTreeMap<Target, (usize, u64)>,
    pub warnings: Vec<String>,
}

impl ExecutionPlan {
    /// Whether the two-pass sentinel workaround applies to this plan (spec
    /// §4.4 "Two-pass sentinel workaround" — all three conditions required).
    pub fn needs_sentinel(&self) -> bool {
        self.tools.code_exec
            && self.tools.ci_download
            && self.registry.files_for(Target::CodeExec).into_iter().next().is_some()
    }
}
