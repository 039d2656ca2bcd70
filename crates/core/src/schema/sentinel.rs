//! Two-pass sentinel workaround (spec §4.4 "Two-pass sentinel workaround",
//! §9 "Two-pass sentinel coupling"). Only invoked when code-exec is enabled,
//! at least one attachment targets `code_exec`, and the plan expects
//! generated files — callers decide that gate, not this module.

use std::path::{Path, PathBuf};

use crate::error::CoreResult;
use crate::llm::{LlmClient, ProviderResponse, RawRequest, StructuredRequest};

pub struct SentinelOutcome {
    /// Pass 2's raw response, to be fed through [`super::extract::extract`]
    /// and validated as usual.
    pub response: ProviderResponse,
    pub downloaded_files: Vec<PathBuf>,
}

/// Run both passes. `build_pass2` receives pass 1's response body with file
/// mentions already replaced by `<<FILE:{id}>>` sentinel tokens, and
/// produces the derived structured-output request for pass 2.
pub async fn run(
    client: &dyn LlmClient,
    pass1_request: &RawRequest,
    download_dir: &Path,
    build_pass2: impl FnOnce(&str) -> StructuredRequest,
) -> CoreResult<SentinelOutcome> {
    let pass1 = client.raw_call(pass1_request).await?;

    let mut body = pass1.body.clone();
    let mut downloaded_files = Vec::with_capacity(pass1.files.len());
    for file in &pass1.files {
        let dest = client.download_file(&file.id, download_dir).await?;
        let sentinel = format!("<<FILE:{}>>", file.id);
        body = body.replace(&file.id, &sentinel);
        downloaded_files.push(dest);
    }

    let pass2_request = build_pass2(&body);
    let response = client.structured_call(&pass2_request).await?;

    Ok(SentinelOutcome { response, downloaded_files })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockClient, ProviderFileRef};
    use std::time::Duration;

    fn raw_req() -> RawRequest {
        RawRequest {
            system: None,
            user: "generate a chart".to_string(),
            model: "test-model".to_string(),
            temperature: 0.0,
            max_output_tokens: None,
            timeout: Duration::from_secs(30),
            uploads: vec![],
        }
    }

    #[tokio::test]
    async fn replaces_file_mentions_with_sentinel_tokens() {
        let mock = MockClient::new()
            .with_raw_response(Ok(ProviderResponse {
                body: "here is F42 for you".to_string(),
                files: vec![ProviderFileRef { id: "F42".to_string(), suggested_name: Some("chart.png".to_string()) }],
                output_tokens: 10,
                cost_estimate: None,
            }))
            .with_file("F42", b"PNG bytes".to_vec())
            .with_structured_response(Ok(ProviderResponse {
                body: r#"{"chart_file":"<<FILE:F42>>"}"#.to_string(),
                files: vec![],
                output_tokens: 5,
                cost_estimate: None,
            }));

        let tmp = tempfile::tempdir().unwrap();
        let req = raw_req();
        let outcome = run(&mock, &req, tmp.path(), |body| {
            assert_eq!(body, "here is <<FILE:F42>> for you");
            StructuredRequest {
                system: None,
                user: body.to_string(),
                schema: serde_json::json!({"type": "object"}),
                model: "test-model".to_string(),
                temperature: 0.0,
                max_output_tokens: None,
                timeout: Duration::from_secs(30),
                uploads: vec![],
            }
        })
        .await
        .unwrap();

        assert_eq!(outcome.downloaded_files.len(), 1);
        assert!(outcome.response.body.contains("<<FILE:F42>>"));
    }
}
