//! End-to-end scenarios exercised through the public `promptforge_core` API,
//! one per outcome class the runner must produce.

use std::collections::BTreeMap;
use std::path::PathBuf;

use promptforge_core::attachment::Kind;
use promptforge_core::config::Config;
use promptforge_core::path_security::SecurityMode;
use promptforge_core::plan::{RawAttachment, RawInvocation};
use promptforge_core::{build_plan, dry_run, live_run, never_cancel, CoreError};

fn write_file(dir: &std::path::Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

fn base_schema(dir: &std::path::Path) -> PathBuf {
    write_file(
        dir,
        "schema.json",
        r#"{"type":"object","properties":{"greeting":{"type":"string"}},"required":["greeting"],"additionalProperties":false}"#,
    )
}

#[test]
fn scenario_a_happy_path_dry_run_through_public_api() {
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
            raw: format!("prompt:doc={}", tmp.path().join("notes.txt").display()),
            pattern: None,
            recursive: false,
        }],
        vars,
        base_dir: Some(tmp.path().to_path_buf()),
        security_mode: Some(SecurityMode::Strict),
        dry_run: true,
        ..Default::default()
    };

    let plan = build_plan(raw, &Config::default()).expect("plan construction succeeds");
    let (report, summary) = dry_run(&plan).expect("dry run never touches the provider");

    assert_eq!(summary.exit_code, 0);
    assert!(report.token_estimate > 0);
    assert_eq!(report.rendered_prompt, "Hello, Ada! File has 3 words.");
    let doc = report.attachments.iter().find(|a| a.alias == "doc").expect("doc attachment present");
    assert_eq!(doc.targets, vec![promptforge_core::attachment::Target::Prompt]);
}

#[test]
fn scenario_b_path_security_denial() {
    let tmp = tempfile::tempdir().unwrap();
    let template_path = write_file(tmp.path(), "template.txt", "irrelevant");
    let schema_path = base_schema(tmp.path());

    // A path outside base_dir and outside any allow-list, under strict mode.
    let outside_dir = tempfile::tempdir().unwrap();
    let outside_file = write_file(outside_dir.path(), "cfg.txt", "secret");

    let raw = RawInvocation {
        template_path,
        schema_path,
        attachments: vec![RawAttachment {
            kind: Kind::File,
            raw: format!("prompt:cfg={}", outside_file.display()),
            pattern: None,
            recursive: false,
        }],
        base_dir: Some(tmp.path().to_path_buf()),
        security_mode: Some(SecurityMode::Strict),
        ..Default::default()
    };

    let err = build_plan(raw, &Config::default()).expect_err("path outside base_dir is denied under strict mode");
    assert_eq!(err.exit_code(), 7);
    assert_eq!(err.kind(), "PathDenied");
    match &err {
        CoreError::PathDenied { path, .. } => assert_eq!(path, &outside_file.canonicalize().unwrap()),
        other => panic!("expected PathDenied, got {other:?}"),
    }
}

#[test]
fn scenario_c_alias_collision_via_auto_derivation() {
    let tmp = tempfile::tempdir().unwrap();
    let template_path = write_file(tmp.path(), "template.txt", "irrelevant");
    let schema_path = base_schema(tmp.path());

    let dir_a = tmp.path().join("a");
    let dir_b = tmp.path().join("b");
    std::fs::create_dir_all(&dir_a).unwrap();
    std::fs::create_dir_all(&dir_b).unwrap();
    write_file(&dir_a, "data.csv", "1,2,3");
    write_file(&dir_b, "data.csv", "4,5,6");

    let raw = RawInvocation {
        template_path,
        schema_path,
        attachments: vec![
            RawAttachment { kind: Kind::File, raw: format!("prompt:{}", dir_a.join("data.csv").display()), pattern: None, recursive: false },
            RawAttachment { kind: Kind::File, raw: format!("prompt:{}", dir_b.join("data.csv").display()), pattern: None, recursive: false },
        ],
        base_dir: Some(tmp.path().to_path_buf()),
        security_mode: Some(SecurityMode::Strict),
        ..Default::default()
    };

    let err = build_plan(raw, &Config::default()).expect_err("both attachments derive the same alias");
    assert_eq!(err.exit_code(), 1);
    assert_eq!(err.kind(), "AliasConflict");
    match &err {
        CoreError::AliasConflict { alias } => assert_eq!(alias, "data_csv"),
        other => panic!("expected AliasConflict, got {other:?}"),
    }
}

#[tokio::test]
async fn scenario_e_two_pass_sentinel() {
    use promptforge_core::llm::{MockClient, ProviderFileRef, ProviderResponse};

    let tmp = tempfile::tempdir().unwrap();
    let template_path = write_file(tmp.path(), "template.txt", "produce a chart from {{ data.name }}");
    let schema_path = write_file(
        tmp.path(),
        "schema.json",
        r#"{"type":"object","properties":{"chart_file":{"type":"string"}},"required":["chart_file"],"additionalProperties":false}"#,
    );
    write_file(tmp.path(), "data.csv", "x,y\n1,2\n");

    let download_dir = tmp.path().join("downloads");

    let raw = RawInvocation {
        template_path,
        schema_path,
        attachments: vec![RawAttachment {
            kind: Kind::File,
            raw: format!("code_exec:data={}", tmp.path().join("data.csv").display()),
            pattern: None,
            recursive: false,
        }],
        base_dir: Some(tmp.path().to_path_buf()),
        security_mode: Some(SecurityMode::Strict),
        enable_code_exec: true,
        ci_download: true,
        download_dir: Some(download_dir.clone()),
        ..Default::default()
    };

    let plan = build_plan(raw, &Config::default()).expect("plan construction succeeds");
    assert!(plan.needs_sentinel());

    let client = MockClient::new()
        .with_raw_response(Ok(ProviderResponse {
            body: "Here is your chart: F42".to_string(),
            files: vec![ProviderFileRef { id: "F42".to_string(), suggested_name: Some("chart.png".to_string()) }],
            output_tokens: 20,
            cost_estimate: None,
        }))
        .with_structured_response(Ok(ProviderResponse {
            body: r#"{"chart_file":"<<FILE:F42>>"}"#.to_string(),
            files: vec![],
            output_tokens: 8,
            cost_estimate: None,
        }))
        .with_file("F42", b"PNG...".to_vec());

    let (value, summary) = live_run(&plan, &client, never_cancel()).await.expect("sentinel path succeeds");

    assert_eq!(value, serde_json::json!({"chart_file": "<<FILE:F42>>"}));
    assert!(summary.sentinel_mode);
    assert_eq!(summary.exit_code, 0);
    assert!(download_dir.join("F42").exists());
    assert_eq!(std::fs::read(download_dir.join("F42")).unwrap(), b"PNG...");
}

#[test]
fn scenario_f_schema_incompatibility() {
    let tmp = tempfile::tempdir().unwrap();
    let template_path = write_file(tmp.path(), "template.txt", "irrelevant");
    let schema_path = write_file(tmp.path(), "schema.json", r#"{"oneOf":[{"type":"object"},{"type":"string"}]}"#);

    let raw = RawInvocation {
        template_path,
        schema_path,
        base_dir: Some(tmp.path().to_path_buf()),
        security_mode: Some(SecurityMode::Strict),
        ..Default::default()
    };

    let err = build_plan(raw, &Config::default()).expect_err("top-level oneOf is rejected before any provider call");
    assert_eq!(err.exit_code(), 3);
    assert_eq!(err.kind(), "SchemaIncompatible");
    match &err {
        CoreError::SchemaIncompatible { reason, .. } => assert!(reason.contains("oneOf"), "reason was: {reason}"),
        other => panic!("expected SchemaIncompatible, got {other:?}"),
    }
}
