//! Execution Planner & Runner (spec §4.5, C5): turns a [`RawInvocation`]
//! into an [`ExecutionPlan`], then drives dry-run or live execution.
//!
//! Plan construction follows the teacher's staged-startup shape
//! (`server/src/main.rs`: parse -> defaults -> validate -> scan -> state),
//! generalized into the eight ordered steps spec §4.5 requires.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::watch;

use crate::attachment::{parse_spec, AttachmentRegistry, AttachmentSpec, ContentCache, Target};
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::llm::{AttachmentUpload, LlmClient, RawRequest, RetryPolicy, StructuredRequest, UploadContent};
use crate::path_security::{PathGate, SecurityMode};
use crate::plan::{ExecutionPlan, Limits, RawInvocation, ToolFlags};
use crate::schema;
use crate::summary::{ExecutionMode, RunSummary, ToolFileCount, ValidationOutcome};
use crate::template::{self, RenderPhase, TemplateEngine};
use crate::tokenizer::{create_tokenizer, Tokenizer};

/// Step 1-8 of plan construction (spec §4.5 "Plan construction"). Each step
/// aborts on first failure; no template render beyond the validation render
/// happens here, and no provider call is ever made.
pub fn build_plan(raw: RawInvocation, config: &Config) -> CoreResult<ExecutionPlan> {
    // Step 2: apply defaults from configuration, overridden by invocation flags.
    let model = raw.model.clone().unwrap_or_else(|| config.model.clone());
    let temperature = raw.temperature.unwrap_or(config.temperature);
    let mut max_output_tokens = raw.max_output_tokens.or(config.max_output_tokens);
    let timeout = Duration::from_secs(raw.timeout_secs.unwrap_or(config.timeout_secs));
    let max_retries = raw.max_retries.unwrap_or(config.max_retries);
    let max_file_size = raw.max_file_size.or(config.max_file_size);
    let max_cost = raw.max_cost.or(config.max_cost);

    // Step 3: validate template path and schema path through C1.
    let base_dir = raw.base_dir.clone().unwrap_or_else(|| std::env::current_dir().unwrap_or_default());
    let mode = raw.security_mode.unwrap_or(SecurityMode::Warn);
    let mut gate = PathGate::new(mode, base_dir);
    gate.allow_dirs = raw.allow_dirs.clone();
    gate.allow_files = raw.allow_files.clone();
    if let Some(list_file) = &raw.allow_list_file {
        let text = std::fs::read_to_string(list_file).map_err(|e| CoreError::Io { path: list_file.clone(), source: e })?;
        for line in text.lines() {
            let line = line.trim();
            if !line.is_empty() && !line.starts_with('#') {
                gate.allow_files.push(PathBuf::from(line));
            }
        }
    }

    let mut warnings = Vec::new();
    let (template_path, warning) = gate.check(&raw.template_path)?;
    warnings.extend(warning.map(|w| w.reason));
    let (schema_path, warning) = gate.check(&raw.schema_path)?;
    warnings.extend(warning.map(|w| w.reason));

    // Step 4: register each attachment via C1 + C2.
    let cache = Arc::new(ContentCache::default());
    let mut registry = AttachmentRegistry::new(cache, max_file_size);
    for raw_attachment in &raw.attachments {
        let spec: AttachmentSpec = parse_spec(raw_attachment.kind, &raw_attachment.raw, raw_attachment.pattern.clone(), raw_attachment.recursive)?;
        let (_, warning) = registry.add(spec, &gate)?;
        warnings.extend(warning.map(|w| w.reason));
    }

    // Step 5: load template, extract frontmatter. Frontmatter overrides
    // configuration but invocation flags (already applied above when
    // explicitly set) win over frontmatter.
    let raw_template = std::fs::read_to_string(&template_path).map_err(|e| CoreError::Io { path: template_path.clone(), source: e })?;
    let (frontmatter, template_body) = template::extract_frontmatter(&raw_template)?;

    let model = raw.model.clone().unwrap_or_else(|| frontmatter.model.clone().unwrap_or(model));
    let temperature = raw.temperature.unwrap_or(frontmatter.temperature.unwrap_or(temperature));
    if max_output_tokens.is_none() {
        max_output_tokens = frontmatter.max_output_tokens;
    }

    // Step 6: load schema, normalize, no provider contact.
    let prepared = schema::prepare(&schema_path, &Default::default())?;

    // Step 7: validation render; record token estimate and upload sizes.
    let tokenizer: Arc<dyn Tokenizer> = create_tokenizer(Some(&model));
    let engine = TemplateEngine::new(Arc::clone(&tokenizer));
    let outcome = engine.render(&template_body, &registry, &raw.vars, &raw.json_vars, RenderPhase::Validation)?;
    let token_estimate = tokenizer.count_tokens(&outcome.text) as u64;
    let token_best_effort = tokenizer.best_effort();
    let upload_summary = registry.summary();

    let tools = ToolFlags { code_exec: raw.enable_code_exec, retrieval: raw.enable_retrieval, ci_download: raw.ci_download };
    let download_dir = raw.download_dir.clone().unwrap_or_else(|| config.cache_dir().join("downloads"));

    // Step 8: produce the plan.
    Ok(ExecutionPlan {
        template_path,
        schema_path,
        registry,
        vars: raw.vars,
        json_vars: raw.json_vars,
        model,
        temperature,
        max_output_tokens,
        system_prompt: frontmatter.system_prompt,
        security_mode: mode,
        tools,
        output_file: raw.output_file,
        limits: Limits { max_file_size, timeout, max_retries, max_cost },
        download_dir,
        extra_config: frontmatter.extra_config,
        schema: prepared,
        template_body,
        token_estimate,
        token_best_effort,
        upload_summary,
        warnings,
    })
}

/// Dry-run plan summary (spec §4.5 "Dry-run", §6 "Dry-run JSON").
#[derive(Debug, Serialize)]
pub struct DryRunReport {
    pub attachments: Vec<DryRunAttachment>,
    pub tools: ToolFlags,
    pub model: String,
    pub token_estimate: u64,
    pub token_best_effort: bool,
    pub cost_estimate: Option<f64>,
    pub schema_transforms: Vec<String>,
    pub warnings: Vec<String>,
    pub rendered_prompt: String,
}

#[derive(Debug, Serialize)]
pub struct DryRunAttachment {
    pub alias: String,
    pub path: PathBuf,
    pub kind: crate::attachment::Kind,
    pub targets: Vec<Target>,
    pub size: u64,
}

/// Render the plan's template once more (so dry-run and live-run prompts are
/// produced the same way) and report without ever contacting the provider
/// (spec §8 "For all dry-run invocations: no network call is performed").
pub fn dry_run(plan: &ExecutionPlan) -> CoreResult<(DryRunReport, RunSummary)> {
    let started = Instant::now();
    let tokenizer = create_tokenizer(Some(&plan.model));
    let engine = TemplateEngine::new(tokenizer);
    let outcome = engine.render(&plan.template_body, &plan.registry, &plan.vars, &plan.json_vars, RenderPhase::Validation)?;

    let attachments = plan
        .registry
        .attachments()
        .map(|a| DryRunAttachment {
            alias: a.alias.clone(),
            path: a.path.clone(),
            kind: a.kind,
            targets: a.targets.clone(),
            size: plan.registry.files_for(Target::Prompt).iter().filter(|(att, _)| att.alias == a.alias).map(|(_, f)| f.size).sum(),
        })
        .collect();

    let (_, transforms) = schema::normalize(&plan.schema.original, &plan.schema_path, &Default::default())?;
    let cost_estimate = estimate_cost(&plan.model, plan.token_estimate);

    let per_tool_files = tool_file_counts(plan);
    let summary = RunSummary::dry_run(
        started.elapsed().as_millis() as u64,
        plan.token_estimate,
        plan.token_best_effort,
        per_tool_files,
        cost_estimate,
        plan.warnings.clone(),
    );

    let report = DryRunReport {
        attachments,
        tools: plan.tools,
        model: plan.model.clone(),
        token_estimate: plan.token_estimate,
        token_best_effort: plan.token_best_effort,
        cost_estimate,
        schema_transforms: transforms,
        warnings: plan.warnings.clone(),
        rendered_prompt: outcome.text,
    };

    Ok((report, summary))
}

fn tool_file_counts(plan: &ExecutionPlan) -> BTreeMap<Target, ToolFileCount> {
    plan.upload_summary
        .iter()
        .map(|(target, (count, bytes))| (*target, ToolFileCount { count: *count, total_bytes: *bytes }))
        .collect()
}

/// Rough per-1k-token cost estimate at a small built-in rate table
/// (spec §4.5 "cost estimate at configured model rates"). Unknown models
/// yield `None` rather than a misleading guess.
fn estimate_cost(model: &str, tokens: u64) -> Option<f64> {
    let rate_per_1k = if model.contains("gpt-4o") {
        0.005
    } else if model.contains("gpt-4") {
        0.03
    } else if model.contains("claude-3") || model.contains("claude") {
        0.008
    } else {
        return None;
    };
    Some((tokens as f64 / 1000.0) * rate_per_1k)
}

fn build_uploads(plan: &ExecutionPlan, target: Target) -> CoreResult<Vec<AttachmentUpload>> {
    let mut uploads = Vec::new();
    for (attachment, file_ref) in plan.registry.files_for(target) {
        let content = file_ref.content(plan.registry.cache(), plan.limits.max_file_size)?;
        uploads.push(AttachmentUpload {
            alias: attachment.alias.clone(),
            name: file_ref.name.clone(),
            target,
            content: UploadContent::Text(content.to_string()),
        });
    }
    Ok(uploads)
}

async fn call_with_retries<F, Fut>(retry_policy: &RetryPolicy, mut call: F) -> CoreResult<(crate::llm::ProviderResponse, u32)>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = CoreResult<crate::llm::ProviderResponse>>,
{
    let mut attempt = 0u32;
    loop {
        match call().await {
            Ok(response) => return Ok((response, attempt)),
            Err(error) => match retry_policy.resolve_delay(&error, attempt) {
                Some(delay) => {
                    tokio::time::sleep(Duration::from_secs_f64(delay)).await;
                    attempt += 1;
                }
                None => return Err(error),
            },
        }
    }
}

/// A cancellation signal the CLI installs via `tokio::signal::ctrl_c()`
/// (spec §5 "Cancellation"). Cloned cheaply into each racing `select!`.
pub type CancelSignal = watch::Receiver<bool>;

/// A receiver that never fires, for callers (tests, non-interactive
/// embeddings) with no cancellation source.
pub fn never_cancel() -> CancelSignal {
    watch::channel(false).1
}

/// Race `fut` against the cancellation signal; drops `fut` and returns
/// `CanceledByUser` the moment cancellation is observed (spec §5:
/// "cooperatively cancels the provider call... and returns exit code 6").
async fn run_cancelable<F, T>(fut: F, mut cancel: CancelSignal) -> CoreResult<T>
where
    F: std::future::Future<Output = CoreResult<T>>,
{
    if *cancel.borrow() {
        return Err(CoreError::CanceledByUser);
    }
    tokio::select! {
        result = fut => result,
        _ = cancel.changed() => Err(CoreError::CanceledByUser),
    }
}

/// Turn an `extract_and_validate` result into `(value, outcome)`, recovering
/// the parsed-but-invalid object from `OutputSchemaError` instead of
/// discarding it (spec §4.4 "Validation": "the object is still returned for
/// diagnostics"). Any other error still aborts the run.
fn handle_validation(result: CoreResult<(JsonValue, bool)>) -> CoreResult<(JsonValue, ValidationOutcome)> {
    match result {
        Ok((value, recovered)) => Ok((value, if recovered { ValidationOutcome::Recovered } else { ValidationOutcome::Valid })),
        Err(CoreError::OutputSchemaError { value, .. }) => Ok((value, ValidationOutcome::Failed)),
        Err(other) => Err(other),
    }
}

/// Perform the final render, invoke C4, and produce the validated object
/// plus its `RunSummary` (spec §4.5 "Live run"). `cancel` is raced against
/// the provider call so a single SIGINT aborts cooperatively (spec §5).
pub async fn live_run(plan: &ExecutionPlan, client: &dyn LlmClient, cancel: CancelSignal) -> CoreResult<(JsonValue, RunSummary)> {
    let started = Instant::now();

    if let (Some(max_cost), Some(estimate)) = (plan.limits.max_cost, estimate_cost(&plan.model, plan.token_estimate)) {
        if estimate > max_cost {
            return Err(CoreError::LimitExceeded { what: format!("estimated cost {estimate:.4} exceeds max_cost {max_cost:.4}") });
        }
    }

    let tokenizer = create_tokenizer(Some(&plan.model));
    let engine = TemplateEngine::new(tokenizer);
    let outcome = engine.render(&plan.template_body, &plan.registry, &plan.vars, &plan.json_vars, RenderPhase::Final)?;

    let retry_policy = RetryPolicy::with_max_retries(plan.limits.max_retries);

    let (parsed, validation_outcome, output_tokens, cost_estimate, sentinel_mode, retries);

    if plan.needs_sentinel() {
        let uploads = build_uploads(plan, Target::CodeExec)?;
        let pass1 = RawRequest {
            system: plan.system_prompt.clone(),
            user: outcome.text.clone(),
            model: plan.model.clone(),
            temperature: plan.temperature,
            max_output_tokens: plan.max_output_tokens,
            timeout: plan.limits.timeout,
            uploads,
        };
        let schema_for_pass2 = plan.schema.normalized.clone();
        let download_dir = plan.download_dir.clone();
        let model = plan.model.clone();
        let temperature = plan.temperature;
        let max_output_tokens = plan.max_output_tokens;
        let timeout = plan.limits.timeout;

        let sentinel = run_cancelable(
            schema::run_sentinel(client, &pass1, &download_dir, move |body| StructuredRequest {
                system: None,
                user: format!("{body}\n\nRespond with the requested JSON object; file mentions are already sentinel tokens."),
                schema: schema_for_pass2,
                model,
                temperature,
                max_output_tokens,
                timeout,
                uploads: vec![],
            }),
            cancel.clone(),
        )
        .await?;

        let (value, outcome) = handle_validation(schema::extract_and_validate(&sentinel.response.body, &plan.schema.original))?;
        parsed = value;
        validation_outcome = outcome;
        output_tokens = Some(sentinel.response.output_tokens);
        cost_estimate = sentinel.response.cost_estimate;
        sentinel_mode = true;
        retries = 0;
    } else {
        let mut uploads = build_uploads(plan, Target::CodeExec)?;
        uploads.extend(build_uploads(plan, Target::Retrieval)?);
        uploads.extend(build_uploads(plan, Target::UserData)?);

        let request = StructuredRequest {
            system: plan.system_prompt.clone(),
            user: outcome.text.clone(),
            schema: plan.schema.normalized.clone(),
            model: plan.model.clone(),
            temperature: plan.temperature,
            max_output_tokens: plan.max_output_tokens,
            timeout: plan.limits.timeout,
            uploads,
        };

        let (response, used_retries) = run_cancelable(call_with_retries(&retry_policy, || client.structured_call(&request)), cancel.clone()).await?;
        let (value, outcome) = handle_validation(schema::extract_and_validate(&response.body, &plan.schema.original))?;
        parsed = value;
        validation_outcome = outcome;
        output_tokens = Some(response.output_tokens);
        cost_estimate = response.cost_estimate;
        sentinel_mode = false;
        retries = used_retries;
    }

    // A schema-validation failure still yields the parsed object for
    // diagnostics, but nothing schema-valid was produced to persist.
    if validation_outcome != ValidationOutcome::Failed {
        if let Some(output_file) = &plan.output_file {
            write_output(output_file, &parsed)?;
        }
    }

    let exit_code = if validation_outcome == ValidationOutcome::Failed { 3 } else { 0 };

    let summary = RunSummary {
        mode: ExecutionMode::Live,
        exit_code,
        elapsed_ms: started.elapsed().as_millis() as u64,
        input_token_estimate: plan.token_estimate,
        input_token_best_effort: plan.token_best_effort,
        output_tokens,
        cost_estimate,
        per_tool_files: tool_file_counts(plan),
        retries,
        validation_outcome,
        sentinel_mode,
        warnings: plan.warnings.clone(),
    };

    Ok((parsed, summary))
}

/// Write the validated object atomically: to `<path>.partial` first, renamed
/// to `path` only once the write has fully succeeded (spec §5
/// "Cancellation": partial output files are renamed to `<path>.partial").
fn write_output(path: &Path, value: &JsonValue) -> CoreResult<()> {
    let partial = path.with_extension(match path.extension() {
        Some(ext) => format!("{}.partial", ext.to_string_lossy()),
        None => "partial".to_string(),
    });
    let text = serde_json::to_string_pretty(value).expect("JSON Value always serializes");
    std::fs::write(&partial, text).map_err(|e| CoreError::Io { path: partial.clone(), source: e })?;
    std::fs::rename(&partial, path).map_err(|e| CoreError::Io { path: path.to_path_buf(), source: e })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachment::Kind;
    use crate::llm::{MockClient, ProviderResponse};
    use crate::plan::RawAttachment;

    fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn scenario_a_happy_path_dry_run() {
        let tmp = tempfile::tempdir().unwrap();
        write_file(tmp.path(), "notes.txt", "one two three");
        let template_path = write_file(tmp.path(), "template.txt", "Hello, {{ name }}! File has {{ doc.content | word_count }} words.");
        let schema_path = write_file(
            tmp.path(),
            "schema.json",
            r#"{"type":"object","properties":{"greeting":{"type":"string"},"words":{"type":"integer"}},"required":["greeting","words"],"additionalProperties":false}"#,
        );

        let mut vars = BTreeMap::new();
        vars.insert("name".to_string(), "Ada".to_string());

        let raw = RawInvocation {
            template_path,
            schema_path,
            attachments: vec![RawAttachment {
                kind: Kind::File,
                raw: format!("doc={}", tmp.path().join("notes.txt").display()),
                pattern: None,
                recursive: false,
            }],
            vars,
            base_dir: Some(tmp.path().to_path_buf()),
            security_mode: Some(SecurityMode::Strict),
            dry_run: true,
            ..Default::default()
        };

        let plan = build_plan(raw, &Config::default()).unwrap();
        let (report, summary) = dry_run(&plan).unwrap();

        assert_eq!(report.rendered_prompt, "Hello, Ada! File has 3 words.");
        assert!(report.token_estimate > 0);
        assert_eq!(summary.exit_code, 0);
    }

    #[tokio::test]
    async fn scenario_d_recovered_duplicated_output() {
        let tmp = tempfile::tempdir().unwrap();
        let template_path = write_file(tmp.path(), "template.txt", "emit the object");
        let schema_path = write_file(
            tmp.path(),
            "schema.json",
            r#"{"type":"object","properties":{"a":{"type":"integer"},"b":{"type":"integer"}},"required":["a","b"],"additionalProperties":false}"#,
        );

        let raw = RawInvocation {
            template_path,
            schema_path,
            base_dir: Some(tmp.path().to_path_buf()),
            security_mode: Some(SecurityMode::Strict),
            ..Default::default()
        };
        let plan = build_plan(raw, &Config::default()).unwrap();

        let client = MockClient::new().with_structured_response(Ok(ProviderResponse {
            body: r#"{"a":1,"b":2}{"a":1,"b":2}"#.to_string(),
            files: vec![],
            output_tokens: 12,
            cost_estimate: None,
        }));

        let (value, summary) = live_run(&plan, &client, never_cancel()).await.unwrap();
        assert_eq!(value, serde_json::json!({"a": 1, "b": 2}));
        assert_eq!(summary.validation_outcome, ValidationOutcome::Recovered);
        assert_eq!(summary.exit_code, 0);
    }

    #[tokio::test]
    async fn live_run_reports_failed_validation_outcome() {
        let tmp = tempfile::tempdir().unwrap();
        let template_path = write_file(tmp.path(), "template.txt", "emit the object");
        let schema_path = write_file(
            tmp.path(),
            "schema.json",
            r#"{"type":"object","properties":{"a":{"type":"integer"}},"required":["a"],"additionalProperties":false}"#,
        );

        let raw = RawInvocation {
            template_path,
            schema_path,
            base_dir: Some(tmp.path().to_path_buf()),
            security_mode: Some(SecurityMode::Strict),
            ..Default::default()
        };
        let plan = build_plan(raw, &Config::default()).unwrap();

        let client = MockClient::new().with_structured_response(Ok(ProviderResponse {
            body: r#"{"a": "not an integer"}"#.to_string(),
            files: vec![],
            output_tokens: 5,
            cost_estimate: None,
        }));

        let (value, summary) = live_run(&plan, &client, never_cancel()).await.unwrap();
        assert_eq!(value, serde_json::json!({"a": "not an integer"}));
        assert_eq!(summary.validation_outcome, ValidationOutcome::Failed);
        assert_eq!(summary.exit_code, 3);
    }

    #[tokio::test]
    async fn live_run_is_canceled_when_signal_fires_first() {
        let tmp = tempfile::tempdir().unwrap();
        let template_path = write_file(tmp.path(), "template.txt", "emit the object");
        let schema_path = write_file(
            tmp.path(),
            "schema.json",
            r#"{"type":"object","properties":{"a":{"type":"integer"}},"required":["a"],"additionalProperties":false}"#,
        );

        let raw = RawInvocation {
            template_path,
            schema_path,
            base_dir: Some(tmp.path().to_path_buf()),
            security_mode: Some(SecurityMode::Strict),
            ..Default::default()
        };
        let plan = build_plan(raw, &Config::default()).unwrap();

        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let client = MockClient::new().with_structured_response(Ok(ProviderResponse {
            body: r#"{"a": 1}"#.to_string(),
            files: vec![],
            output_tokens: 5,
            cost_estimate: None,
        }));

        let err = live_run(&plan, &client, rx).await.unwrap_err();
        assert!(matches!(err, CoreError::CanceledByUser));
        assert_eq!(err.exit_code(), 6);
    }
}
