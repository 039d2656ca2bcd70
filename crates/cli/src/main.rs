//! PromptForge binary — thin CLI shell over the [`promptforge_core`] library
//! crate, matching the abstract command surface in spec §6.

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::Parser;
use serde_json::Value as JsonValue;
use tracing::{error, info};

use promptforge_core::attachment::Kind;
use promptforge_core::config::Config;
use promptforge_core::path_security::SecurityMode;
use promptforge_core::plan::{RawAttachment, RawInvocation};
use promptforge_core::{build_plan, dry_run, live_run, CoreError};

#[derive(Parser)]
#[command(name = "promptforge", version, about = "Template + JSON Schema -> validated structured output from an LLM", long_about = None)]
struct Cli {
    /// Prompt template file.
    template_path: PathBuf,

    /// JSON Schema file describing the desired output object.
    schema_path: PathBuf,

    /// A file attachment: `[target[,target...]:]alias=path` (repeatable).
    #[arg(long = "file", value_name = "[TARGETS:]ALIAS=PATH")]
    file: Vec<String>,

    /// A directory attachment: `[target:]alias=path` (repeatable).
    #[arg(long = "dir", value_name = "[TARGETS:]ALIAS=PATH")]
    dir: Vec<String>,

    /// A glob pattern applied to the most recently given `--dir` (default `**/*` recursive, `*` otherwise).
    #[arg(long = "dir-pattern")]
    dir_pattern: Vec<String>,

    /// Recurse into subdirectories for the most recently given `--dir`.
    #[arg(long = "dir-recursive")]
    dir_recursive: Vec<bool>,

    /// A collection attachment built from a list file: `[target:]alias=list_file` (repeatable).
    #[arg(long = "collection", value_name = "[TARGETS:]ALIAS=LIST_FILE")]
    collection: Vec<String>,

    /// A scalar template variable: `name=value` (repeatable).
    #[arg(long = "var", value_name = "NAME=VALUE")]
    var: Vec<String>,

    /// A JSON-valued template variable: `name=json_literal` (repeatable).
    #[arg(long = "json-var", value_name = "NAME=JSON")]
    json_var: Vec<String>,

    /// Path-security mode.
    #[arg(long = "security-mode", value_enum, default_value = "warn")]
    security_mode: SecurityModeArg,

    /// Base directory for path-security checks (default: current directory).
    #[arg(long = "base-dir")]
    base_dir: Option<PathBuf>,

    /// An additional allowed directory under `strict`/`warn` mode (repeatable).
    #[arg(long = "allow-dir")]
    allow_dir: Vec<PathBuf>,

    /// An additional allowed file under `strict`/`warn` mode (repeatable).
    #[arg(long = "allow-file")]
    allow_file: Vec<PathBuf>,

    /// A file listing additional allowed paths, one per line.
    #[arg(long = "allow-list-file")]
    allow_list_file: Option<PathBuf>,

    /// Model identifier.
    #[arg(long)]
    model: Option<String>,

    /// Decoding temperature.
    #[arg(long)]
    temperature: Option<f64>,

    /// Maximum output tokens requested from the model.
    #[arg(long = "max-output-tokens")]
    max_output_tokens: Option<u64>,

    /// Per-call timeout in seconds.
    #[arg(long)]
    timeout: Option<u64>,

    /// Maximum retries on transport/provider errors.
    #[arg(long = "max-retries")]
    max_retries: Option<u32>,

    /// Maximum bytes readable from a single attachment file.
    #[arg(long = "max-file-size")]
    max_file_size: Option<u64>,

    /// Abort before any provider call if the pre-call cost estimate exceeds this.
    #[arg(long = "max-cost")]
    max_cost: Option<f64>,

    /// Enable the code-execution tool.
    #[arg(long = "enable-code-exec")]
    enable_code_exec: bool,

    /// Enable the retrieval tool.
    #[arg(long = "enable-retrieval")]
    enable_retrieval: bool,

    /// Force the two-pass sentinel workaround for file-bearing responses.
    #[arg(long = "ci-download")]
    ci_download: bool,

    /// Write the validated object here instead of stdout.
    #[arg(long = "output-file")]
    output_file: Option<PathBuf>,

    /// Write the run summary as JSON to this path instead of the diagnostic stream.
    #[arg(long = "run-summary-json")]
    run_summary_json: Option<PathBuf>,

    /// Plan and render only; never contact the provider.
    #[arg(long = "dry-run")]
    dry_run: bool,

    /// Emit the dry-run report as JSON instead of a human-readable summary.
    #[arg(long = "dry-run-json")]
    dry_run_json: bool,

    /// Optional `.promptforge.toml` configuration file.
    #[arg(long = "config-file")]
    config_file: Option<PathBuf>,

    /// Directory sentinel-pass downloads are written to.
    #[arg(long = "download-dir")]
    download_dir: Option<PathBuf>,

    /// Replay responses from a JSON fixture instead of calling a real
    /// provider (SPEC_FULL.md §12 "Supplemented features").
    #[arg(long = "llm-fixture")]
    llm_fixture: Option<PathBuf>,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum SecurityModeArg {
    Permissive,
    Warn,
    Strict,
}

impl From<SecurityModeArg> for SecurityMode {
    fn from(mode: SecurityModeArg) -> Self {
        match mode {
            SecurityModeArg::Permissive => SecurityMode::Permissive,
            SecurityModeArg::Warn => SecurityMode::Warn,
            SecurityModeArg::Strict => SecurityMode::Strict,
        }
    }
}

fn parse_kv(items: &[String], flag: &str) -> anyhow::Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    for item in items {
        let (key, value) = item.split_once('=').ok_or_else(|| anyhow::anyhow!("{flag} expects NAME=VALUE, got '{item}'"))?;
        out.insert(key.to_string(), value.to_string());
    }
    Ok(out)
}

fn parse_json_vars(items: &[String]) -> anyhow::Result<BTreeMap<String, JsonValue>> {
    let mut out = BTreeMap::new();
    for item in items {
        let (key, literal) = item.split_once('=').ok_or_else(|| anyhow::anyhow!("--json-var expects NAME=JSON, got '{item}'"))?;
        let value: JsonValue = serde_json::from_str(literal)
            .map_err(|e| anyhow::anyhow!("--json-var {key}: invalid JSON literal: {e}"))?;
        out.insert(key.to_string(), value);
    }
    Ok(out)
}

fn build_raw_invocation(cli: &Cli) -> anyhow::Result<RawInvocation> {
    let mut attachments = Vec::new();
    for raw in &cli.file {
        attachments.push(RawAttachment { kind: Kind::File, raw: raw.clone(), pattern: None, recursive: false });
    }
    for (i, raw) in cli.dir.iter().enumerate() {
        attachments.push(RawAttachment {
            kind: Kind::Dir,
            raw: raw.clone(),
            pattern: cli.dir_pattern.get(i).cloned(),
            recursive: cli.dir_recursive.get(i).copied().unwrap_or(false),
        });
    }
    for raw in &cli.collection {
        attachments.push(RawAttachment { kind: Kind::Collection, raw: raw.clone(), pattern: None, recursive: false });
    }

    Ok(RawInvocation {
        template_path: cli.template_path.clone(),
        schema_path: cli.schema_path.clone(),
        attachments,
        vars: parse_kv(&cli.var, "--var")?,
        json_vars: parse_json_vars(&cli.json_var)?,
        security_mode: Some(cli.security_mode.into()),
        base_dir: cli.base_dir.clone(),
        allow_dirs: cli.allow_dir.clone(),
        allow_files: cli.allow_file.clone(),
        allow_list_file: cli.allow_list_file.clone(),
        model: cli.model.clone(),
        temperature: cli.temperature,
        max_output_tokens: cli.max_output_tokens,
        timeout_secs: cli.timeout,
        max_retries: cli.max_retries,
        max_file_size: cli.max_file_size,
        max_cost: cli.max_cost,
        enable_code_exec: cli.enable_code_exec,
        enable_retrieval: cli.enable_retrieval,
        ci_download: cli.ci_download,
        output_file: cli.output_file.clone(),
        run_summary_json: cli.run_summary_json.clone(),
        dry_run: cli.dry_run,
        dry_run_json: cli.dry_run_json,
        download_dir: cli.download_dir.clone(),
    })
}

fn write_run_summary(path: Option<&PathBuf>, summary: &impl serde::Serialize) {
    let text = serde_json::to_string_pretty(summary).expect("RunSummary always serializes");
    match path {
        Some(path) => {
            if let Err(e) = std::fs::write(path, &text) {
                error!(path = %path.display(), error = %e, "failed to write run summary");
            }
        }
        None => eprintln!("{text}"),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("promptforge=info".parse().unwrap()))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let exit_code = run(cli).await;
    std::process::exit(exit_code);
}

async fn run(cli: Cli) -> i32 {
    let raw = match build_raw_invocation(&cli) {
        Ok(raw) => raw,
        Err(e) => {
            error!(error = %e, "invalid invocation");
            return 1;
        }
    };

    let config = match Config::load(cli.config_file.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(kind = e.kind(), error = %e, "failed to load configuration");
            return e.exit_code();
        }
    };

    let dry_run_requested = raw.dry_run;
    let dry_run_json = raw.dry_run_json;
    let run_summary_json = raw.run_summary_json.clone();

    let plan = match build_plan(raw, &config) {
        Ok(plan) => plan,
        Err(e) => return report_error(&e),
    };

    if dry_run_requested {
        return match dry_run(&plan) {
            Ok((report, summary)) => {
                if dry_run_json {
                    println!("{}", serde_json::to_string_pretty(&report).expect("DryRunReport always serializes"));
                } else {
                    println!("model: {}", report.model);
                    println!("tokens (best-effort={}): {}", report.token_best_effort, report.token_estimate);
                    for attachment in &report.attachments {
                        println!("  attachment {} ({:?}) -> {:?}", attachment.alias, attachment.kind, attachment.targets);
                    }
                    println!("--- rendered prompt ---");
                    println!("{}", report.rendered_prompt);
                }
                write_run_summary(run_summary_json.as_ref(), &summary);
                0
            }
            Err(e) => report_error(&e),
        };
    }

    let client: Box<dyn promptforge_core::llm::LlmClient> = match &cli.llm_fixture {
        Some(path) => match promptforge_core::llm::MockClient::from_fixture_file(path) {
            Ok(client) => Box::new(client),
            Err(e) => return report_error(&e),
        },
        None => match promptforge_core::llm::HttpLlmClient::from_env("https://api.example.com", "PROMPTFORGE_API_KEY") {
            Ok(client) => Box::new(client),
            Err(e) => return report_error(&e),
        },
    };

    // A single SIGINT cooperatively cancels the in-flight provider call
    // (spec §5 "Cancellation").
    let (cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_tx.send(true);
        }
    });

    match live_run(&plan, client.as_ref(), cancel_rx).await {
        Ok((value, summary)) => {
            if summary.validation_outcome == promptforge_core::ValidationOutcome::Failed {
                error!(kind = "OutputSchemaError", "output failed schema validation; returning object for diagnostics");
                eprintln!("{}", serde_json::to_string_pretty(&value).expect("parsed object always serializes"));
            } else if plan.output_file.is_none() {
                println!("{}", serde_json::to_string_pretty(&value).expect("validated object always serializes"));
            }
            info!(elapsed_ms = summary.elapsed_ms, retries = summary.retries, "run complete");
            let exit_code = summary.exit_code;
            write_run_summary(run_summary_json.as_ref(), &summary);
            exit_code
        }
        Err(e) => report_error(&e),
    }
}

fn report_error(e: &CoreError) -> i32 {
    error!(kind = e.kind(), error = %e, "promptforge run failed");
    e.exit_code()
}
