//! A canned `LlmClient` for tests and `--llm-fixture` dry runs
//! (SPEC_FULL.md §12).

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{CoreError, CoreResult};

use super::{LlmClient, ProviderFileRef, ProviderResponse, RawRequest, StructuredRequest};

#[derive(Default)]
pub struct MockClient {
    structured_responses: Mutex<VecDeque<CoreResult<ProviderResponse>>>,
    raw_responses: Mutex<VecDeque<CoreResult<ProviderResponse>>>,
    files: HashMap<String, Vec<u8>>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_structured_response(self, response: CoreResult<ProviderResponse>) -> Self {
        self.structured_responses.lock().expect("mock poisoned").push_back(response);
        self
    }

    pub fn with_raw_response(self, response: CoreResult<ProviderResponse>) -> Self {
        self.raw_responses.lock().expect("mock poisoned").push_back(response);
        self
    }

    pub fn with_file(mut self, id: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.files.insert(id.into(), bytes);
        self
    }

    /// Build a `MockClient` from a `--llm-fixture` JSON file: queued
    /// structured/raw responses plus file contents read relative to the
    /// fixture's own directory.
    pub fn from_fixture_file(path: &Path) -> CoreResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| CoreError::Io { path: path.to_path_buf(), source: e })?;
        let fixture: Fixture = serde_json::from_str(&text).map_err(|e| CoreError::InvalidSpec {
            reason: format!("invalid llm fixture {}: {e}", path.display()),
        })?;
        let base_dir = path.parent().unwrap_or(Path::new("."));

        let mut client = Self::new();
        for resp in fixture.structured_responses {
            client = client.with_structured_response(Ok(resp.into()));
        }
        for resp in fixture.raw_responses {
            client = client.with_raw_response(Ok(resp.into()));
        }
        for file in fixture.files {
            let bytes = std::fs::read(base_dir.join(&file.path))
                .map_err(|e| CoreError::Io { path: base_dir.join(&file.path), source: e })?;
            client = client.with_file(file.id, bytes);
        }
        Ok(client)
    }
}

#[derive(Debug, Deserialize, Default)]
struct Fixture {
    #[serde(default)]
    structured_responses: Vec<FixtureResponse>,
    #[serde(default)]
    raw_responses: Vec<FixtureResponse>,
    #[serde(default)]
    files: Vec<FixtureFile>,
}

#[derive(Debug, Deserialize)]
struct FixtureResponse {
    body: String,
    #[serde(default)]
    files: Vec<FixtureFileRef>,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cost_estimate: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct FixtureFileRef {
    id: String,
    #[serde(default)]
    suggested_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FixtureFile {
    id: String,
    path: PathBuf,
}

impl From<FixtureResponse> for ProviderResponse {
    fn from(resp: FixtureResponse) -> Self {
        Self {
            body: resp.body,
            files: resp.files.into_iter().map(|f| ProviderFileRef { id: f.id, suggested_name: f.suggested_name }).collect(),
            output_tokens: resp.output_tokens,
            cost_estimate: resp.cost_estimate,
        }
    }
}

#[async_trait]
impl LlmClient for MockClient {
    async fn structured_call(&self, _req: &StructuredRequest) -> CoreResult<ProviderResponse> {
        self.structured_responses
            .lock()
            .expect("mock poisoned")
            .pop_front()
            .unwrap_or_else(|| Err(CoreError::ProviderError {
                code: "mock_exhausted".to_string(),
                message: "no more mock structured responses queued".to_string(),
                retryable: false,
            }))
    }

    async fn raw_call(&self, _req: &RawRequest) -> CoreResult<ProviderResponse> {
        self.raw_responses
            .lock()
            .expect("mock poisoned")
            .pop_front()
            .unwrap_or_else(|| Err(CoreError::ProviderError {
                code: "mock_exhausted".to_string(),
                message: "no more mock raw responses queued".to_string(),
                retryable: false,
            }))
    }

    async fn download_file(&self, file_id: &str, dest_dir: &Path) -> CoreResult<PathBuf> {
        let bytes = self.files.get(file_id).ok_or_else(|| CoreError::ProviderError {
            code: "unknown_file".to_string(),
            message: format!("mock has no file '{file_id}'"),
            retryable: false,
        })?;
        std::fs::create_dir_all(dest_dir).map_err(|e| CoreError::Io { path: dest_dir.to_path_buf(), source: e })?;
        let dest = dest_dir.join(file_id);
        std::fs::write(&dest, bytes).map_err(|e| CoreError::Io { path: dest.clone(), source: e })?;
        Ok(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ProviderFileRef;
    use std::time::Duration;

    #[tokio::test]
    async fn returns_queued_responses_in_order() {
        let mock = MockClient::new()
            .with_structured_response(Ok(ProviderResponse {
                body: "{}".to_string(),
                files: vec![],
                output_tokens: 5,
                cost_estimate: Some(0.001),
            }))
            .with_file("F42", b"PNG...".to_vec());

        let req = StructuredRequest {
            system: None,
            user: "hi".to_string(),
            schema: serde_json::json!({}),
            model: "test-model".to_string(),
            temperature: 0.0,
            max_output_tokens: None,
            timeout: Duration::from_secs(1),
            uploads: vec![],
        };
        let resp = mock.structured_call(&req).await.unwrap();
        assert_eq!(resp.body, "{}");

        let tmp = tempfile::tempdir().unwrap();
        let path = mock.download_file("F42", tmp.path()).await.unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"PNG...");
        let _ = ProviderFileRef { id: "F42".to_string(), suggested_name: None };
    }
}
