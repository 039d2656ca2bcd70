//! `RunSummary` (spec §3 "RunSummary", §4.5, §8 scenario expectations).

use std::collections::BTreeMap;

use serde::Serialize;

use crate::attachment::Target;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    DryRun,
    Live,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationOutcome {
    Valid,
    Recovered,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ToolFileCount {
    pub count: usize,
    pub total_bytes: u64,
}

/// Produced at the end of a run (spec §3 "RunSummary").
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub mode: ExecutionMode,
    pub exit_code: i32,
    pub elapsed_ms: u64,
    pub input_token_estimate: u64,
    pub input_token_best_effort: bool,
    pub output_tokens: Option<u64>,
    pub cost_estimate: Option<f64>,
    pub per_tool_files: BTreeMap<Target, ToolFileCount>,
    pub retries: u32,
    pub validation_outcome: ValidationOutcome,
    pub sentinel_mode: bool,
    pub warnings: Vec<String>,
}

impl RunSummary {
    pub fn dry_run(
        elapsed_ms: u64,
        input_token_estimate: u64,
        input_token_best_effort: bool,
        per_tool_files: BTreeMap<Target, ToolFileCount>,
        cost_estimate: Option<f64>,
        warnings: Vec<String>,
    ) -> Self {
        Self {
            mode: ExecutionMode::DryRun,
            exit_code: 0,
            elapsed_ms,
            input_token_estimate,
            input_token_best_effort,
            output_tokens: None,
            cost_estimate,
            per_tool_files,
            retries: 0,
            validation_outcome: ValidationOutcome::Valid,
            sentinel_mode: false,
            warnings,
        }
    }
}
