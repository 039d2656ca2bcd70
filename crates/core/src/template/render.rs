//! Template rendering (spec §4.3): strict-undefined semantics, the two-phase
//! render contract, and wiring of the filter/global catalogs.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use minijinja::value::{Enumerator, Object, Value};
use minijinja::{Environment, Error as MjError, ErrorKind, UndefinedBehavior};
use serde_json::Value as JsonValue;

use crate::attachment::{AttachmentRegistry, RefData};
use crate::error::{CoreError, CoreResult};
use crate::tokenizer::Tokenizer;

use super::filters;
use super::globals;
use super::objects::{record_error, CollectionObject, DirObject, ErrorSlot, FileObject};

pub use super::objects::RenderPhase;

/// Result of one render pass: the rendered text plus the aliases whose
/// content was skipped for size in a validation pass (spec §4.3 "Two-phase
/// render contract").
#[derive(Debug, Clone)]
pub struct RenderOutcome {
    pub text: String,
    pub deferred: Vec<String>,
}

pub struct TemplateEngine {
    tokenizer: Arc<dyn Tokenizer>,
}

impl TemplateEngine {
    pub fn new(tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self { tokenizer }
    }

    pub fn render(
        &self,
        body: &str,
        registry: &AttachmentRegistry,
        vars: &BTreeMap<String, String>,
        json_vars: &BTreeMap<String, JsonValue>,
        phase: RenderPhase,
    ) -> CoreResult<RenderOutcome> {
        let errors: ErrorSlot = Arc::new(Mutex::new(None));
        let deferred = Arc::new(Mutex::new(Vec::new()));

        let attachments = build_attachment_values(registry, phase, &errors, &deferred);
        let ctx = Value::from_object(RenderContext {
            vars: vars.clone(),
            json_vars: json_vars.clone(),
            attachments,
        });

        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        self.register_filters(&mut env);
        self.register_globals(&mut env);

        let tmpl = env
            .template_from_str(body)
            .map_err(|e| map_mj_error(e, &errors, "template"))?;
        let rendered = tmpl.render(ctx).map_err(|e| map_mj_error(e, &errors, "template"))?;

        Ok(RenderOutcome { text: rendered, deferred: deferred.lock().expect("deferred slot poisoned").clone() })
    }

    fn register_filters(&self, env: &mut Environment<'_>) {
        env.add_filter("word_count", filters::word_count);
        env.add_filter("char_count", filters::char_count);
        env.add_filter("remove_comments", filters::remove_comments);
        env.add_filter("normalize", filters::normalize);
        env.add_filter("strip_markdown", filters::strip_markdown);
        env.add_filter("wrap", filters::wrap);
        env.add_filter("indent", filters::indent);
        env.add_filter("dedent", filters::dedent);
        env.add_filter("escape_special", filters::escape_special);
        env.add_filter("to_json", filters::to_json);
        env.add_filter("from_json", filters::from_json);
        env.add_filter("sort_by", filters::sort_by);
        env.add_filter("group_by", filters::group_by);
        env.add_filter("filter_by", filters::filter_by);
        env.add_filter("extract_field", filters::extract_field);
        env.add_filter("unique", filters::unique);
        env.add_filter("frequency", filters::frequency);
        env.add_filter("aggregate", filters::aggregate);
        env.add_filter("table", filters::table);
        env.add_filter("align_table", filters::align_table);
        env.add_filter("dict_to_table", filters::dict_to_table);
        env.add_filter("list_to_table", filters::list_to_table);
        env.add_filter("auto_table", filters::auto_table);
        env.add_filter("format_code", filters::format_code);
        env.add_filter("strip_comments", filters::strip_comments);
    }

    fn register_globals(&self, env: &mut Environment<'_>) {
        let tokenizer = Arc::clone(&self.tokenizer);
        env.add_function("estimate_tokens", move |text: String, model: Option<String>| {
            globals::estimate_tokens(&tokenizer, text, model)
        });
        env.add_function("format_json", globals::format_json);
        env.add_function("now", globals::now);
        env.add_function("debug", globals::debug);
        env.add_function("type_of", globals::type_of);
        env.add_function("dir_of", globals::dir_of);
        env.add_function("len_of", globals::len_of);
        env.add_function("validate_json", globals::validate_json);
        env.add_function("format_error", globals::format_error);
    }
}

fn build_attachment_values(
    registry: &AttachmentRegistry,
    phase: RenderPhase,
    errors: &ErrorSlot,
    deferred: &super::objects::DeferredSlot,
) -> BTreeMap<String, Value> {
    let cache = registry.cache_handle();
    let max_file_size = registry.max_file_size();

    let mut out = BTreeMap::new();
    for (attachment, data) in registry.entries_for_template() {
        let content_allowed = attachment.has_target(crate::attachment::Target::Prompt);
        let value = match data {
            RefData::File(f) => FileObject::value(
                f.clone(),
                Arc::clone(&cache),
                max_file_size,
                content_allowed,
                attachment.alias.clone(),
                phase,
                Arc::clone(errors),
                Arc::clone(deferred),
            ),
            RefData::Dir(d) => DirObject::value(
                d.clone(),
                Arc::clone(&cache),
                max_file_size,
                content_allowed,
                attachment.alias.clone(),
                phase,
                Arc::clone(errors),
                Arc::clone(deferred),
            ),
            RefData::Collection(c) => CollectionObject::value(
                c.clone(),
                Arc::clone(&cache),
                max_file_size,
                content_allowed,
                attachment.alias.clone(),
                phase,
                Arc::clone(errors),
                Arc::clone(deferred),
            ),
        };
        out.insert(attachment.alias.clone(), value);
    }
    out
}

#[derive(Debug)]
struct RenderContext {
    vars: BTreeMap<String, String>,
    json_vars: BTreeMap<String, JsonValue>,
    attachments: BTreeMap<String, Value>,
}

impl Object for RenderContext {
    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        let key = key.as_str()?;
        if let Some(value) = self.attachments.get(key) {
            return Some(value.clone());
        }
        if let Some(json) = self.json_vars.get(key) {
            return Some(Value::from_serialize(json));
        }
        if let Some(s) = self.vars.get(key) {
            return Some(Value::from(s.clone()));
        }
        None
    }

    fn enumerate(self: &Arc<Self>) -> Enumerator {
        let names: Vec<Value> = self
            .attachments
            .keys()
            .chain(self.json_vars.keys())
            .chain(self.vars.keys())
            .map(|k| Value::from(k.clone()))
            .collect();
        Enumerator::Values(names)
    }
}

/// Translate a minijinja error into the core error taxonomy, preferring a
/// specific error recorded by an `Object::get_value` side-channel (the
/// error slot) over minijinja's generic undefined/runtime error.
fn map_mj_error(err: MjError, errors: &ErrorSlot, default_location: &str) -> CoreError {
    if let Some(specific) = errors.lock().expect("template error slot poisoned").take() {
        return specific;
    }

    let location = err
        .template_name()
        .map(|name| format!("{name}:{}", err.line().unwrap_or(0)))
        .unwrap_or_else(|| default_location.to_string());

    if err.kind() == ErrorKind::UndefinedError {
        let name = err.to_string();
        return CoreError::TemplateUndefined { name };
    }

    if err.kind() == ErrorKind::InvalidOperation {
        let message = err.to_string();
        if let Some(rest) = message.strip_prefix("filter '") {
            if let Some((filter, reason)) = rest.split_once("': ") {
                return CoreError::FilterError { filter: filter.to_string(), reason: reason.to_string() };
            }
        }
    }

    CoreError::TemplateRenderError { location, reason: err.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachment::{parse_spec, AttachmentRegistry, Kind};
    use crate::path_security::{PathGate, SecurityMode};
    use crate::tokenizer::WordEstimateTokenizer;

    fn engine() -> TemplateEngine {
        TemplateEngine::new(Arc::new(WordEstimateTokenizer))
    }

    #[test]
    fn scenario_a_happy_path_render() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "one two three").unwrap();

        let mut registry = AttachmentRegistry::new(Arc::new(crate::attachment::ContentCache::default()), None);
        let spec = crate::attachment::AttachmentSpec {
            path: tmp.path().join("notes.txt"),
            ..parse_spec(Kind::File, "doc=notes.txt", None, false).unwrap()
        };
        let gate = PathGate::new(SecurityMode::Strict, tmp.path().to_path_buf());
        registry.add(spec, &gate).unwrap();

        let mut vars = BTreeMap::new();
        vars.insert("name".to_string(), "Ada".to_string());

        let outcome = engine()
            .render(
                "Hello, {{ name }}! File has {{ doc.content | word_count }} words.",
                &registry,
                &vars,
                &BTreeMap::new(),
                RenderPhase::Validation,
            )
            .unwrap();

        assert_eq!(outcome.text, "Hello, Ada! File has 3 words.");
        assert!(outcome.deferred.is_empty());
    }

    #[test]
    fn undefined_variable_errors() {
        let registry = AttachmentRegistry::new(Arc::new(crate::attachment::ContentCache::default()), None);
        let err = engine()
            .render("{{ missing }}", &registry, &BTreeMap::new(), &BTreeMap::new(), RenderPhase::Validation)
            .unwrap_err();
        assert!(matches!(err, CoreError::TemplateUndefined { .. }));
    }

    #[test]
    fn non_prompt_content_access_errors() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("data.csv"), "a,b").unwrap();

        let mut registry = AttachmentRegistry::new(Arc::new(crate::attachment::ContentCache::default()), None);
        let spec = crate::attachment::AttachmentSpec {
            path: tmp.path().join("data.csv"),
            ..parse_spec(Kind::File, "code_exec:data=data.csv", None, false).unwrap()
        };
        let gate = PathGate::new(SecurityMode::Strict, tmp.path().to_path_buf());
        registry.add(spec, &gate).unwrap();

        let err = engine()
            .render("{{ data.content }}", &registry, &BTreeMap::new(), &BTreeMap::new(), RenderPhase::Validation)
            .unwrap_err();
        assert!(matches!(err, CoreError::ContentNotAvailable { .. }));
    }

    #[test]
    fn oversize_content_is_deferred_in_validation_but_fails_in_final() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("big.txt"), "0123456789").unwrap();

        let mut registry = AttachmentRegistry::new(Arc::new(crate::attachment::ContentCache::default()), Some(5));
        let spec = crate::attachment::AttachmentSpec {
            path: tmp.path().join("big.txt"),
            ..parse_spec(Kind::File, "doc=big.txt", None, false).unwrap()
        };
        let gate = PathGate::new(SecurityMode::Strict, tmp.path().to_path_buf());
        registry.add(spec, &gate).unwrap();

        let validation = engine()
            .render("{{ doc.content }}", &registry, &BTreeMap::new(), &BTreeMap::new(), RenderPhase::Validation)
            .unwrap();
        assert_eq!(validation.deferred, vec!["doc".to_string()]);

        let err = engine()
            .render("{{ doc.content }}", &registry, &BTreeMap::new(), &BTreeMap::new(), RenderPhase::Final)
            .unwrap_err();
        assert!(matches!(err, CoreError::LimitExceeded { .. }));
    }

    #[test]
    fn filter_error_surfaces_with_filter_name() {
        let registry = AttachmentRegistry::new(Arc::new(crate::attachment::ContentCache::default()), None);
        let mut json_vars = BTreeMap::new();
        json_vars.insert("items".to_string(), serde_json::json!([1, "x", 3]));
        let err = engine()
            .render("{{ items | aggregate }}", &registry, &BTreeMap::new(), &json_vars, RenderPhase::Validation)
            .unwrap_err();
        assert!(matches!(err, CoreError::FilterError { .. }));
    }
}
