//! Reference `LlmClient` adapter over a JSON/HTTP structured-output API
//! (SPEC_FULL.md §13). Not wired to any specific vendor; the wire shape
//! here is illustrative, grounded in `stencila-agents::profiles::anthropic`'s
//! request construction and `odincode-agents::llm_integration`'s
//! reqwest-based client setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::error::{CoreError, CoreResult};

use super::{LlmClient, ProviderFileRef, ProviderResponse, RawRequest, StructuredRequest};

pub struct HttpLlmClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpLlmClient {
    /// `api_key_env` names the environment variable to read the provider
    /// credential from (spec §6 "Environment variables honored: Provider
    /// credentials (`*_API_KEY`)").
    pub fn from_env(base_url: impl Into<String>, api_key_env: &str) -> CoreResult<Self> {
        let api_key = std::env::var(api_key_env).map_err(|_| CoreError::ProviderError {
            code: "missing_credentials".to_string(),
            message: format!("environment variable {api_key_env} is not set"),
            retryable: false,
        })?;
        Ok(Self { client: reqwest::Client::new(), base_url: base_url.into(), api_key })
    }

    fn request_builder(&self, path: &str, timeout: Duration) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(timeout)
    }
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    body: String,
    #[serde(default)]
    files: Vec<WireFileRef>,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cost_estimate: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WireFileRef {
    id: String,
    #[serde(default)]
    suggested_name: Option<String>,
}

impl From<WireResponse> for ProviderResponse {
    fn from(wire: WireResponse) -> Self {
        Self {
            body: wire.body,
            files: wire.files.into_iter().map(|f| ProviderFileRef { id: f.id, suggested_name: f.suggested_name }).collect(),
            output_tokens: wire.output_tokens,
            cost_estimate: wire.cost_estimate,
        }
    }
}

async fn send(request: reqwest::RequestBuilder) -> CoreResult<WireResponse> {
    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            CoreError::Timeout { seconds: 0 }
        } else {
            CoreError::ProviderError { code: "transport".to_string(), message: e.to_string(), retryable: true }
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        let retryable = status.as_u16() == 429 || status.is_server_error();
        let body = response.text().await.unwrap_or_default();
        return Err(CoreError::ProviderError { code: status.as_u16().to_string(), message: body, retryable });
    }

    response
        .json::<WireResponse>()
        .await
        .map_err(|e| CoreError::ProviderError { code: "decode".to_string(), message: e.to_string(), retryable: false })
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn structured_call(&self, req: &StructuredRequest) -> CoreResult<ProviderResponse> {
        let payload = json!({
            "model": req.model,
            "system": req.system,
            "input": req.user,
            "temperature": req.temperature,
            "max_output_tokens": req.max_output_tokens,
            "response_schema": req.schema,
            "structured_output": true,
        });
        let wire = send(self.request_builder("/v1/responses", req.timeout).json(&payload)).await?;
        Ok(wire.into())
    }

    async fn raw_call(&self, req: &RawRequest) -> CoreResult<ProviderResponse> {
        let payload = json!({
            "model": req.model,
            "system": req.system,
            "input": req.user,
            "temperature": req.temperature,
            "max_output_tokens": req.max_output_tokens,
            "structured_output": false,
        });
        let wire = send(self.request_builder("/v1/responses", req.timeout).json(&payload)).await?;
        Ok(wire.into())
    }

    async fn download_file(&self, file_id: &str, dest_dir: &Path) -> CoreResult<PathBuf> {
        let response = self
            .client
            .get(format!("{}/v1/files/{file_id}", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| CoreError::ProviderError { code: "transport".to_string(), message: e.to_string(), retryable: true })?;

        if !response.status().is_success() {
            return Err(CoreError::ProviderError {
                code: response.status().as_u16().to_string(),
                message: format!("failed to download file {file_id}"),
                retryable: response.status().as_u16() == 429 || response.status().is_server_error(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| CoreError::ProviderError { code: "decode".to_string(), message: e.to_string(), retryable: false })?;

        std::fs::create_dir_all(dest_dir).map_err(|e| CoreError::Io { path: dest_dir.to_path_buf(), source: e })?;
        let dest = dest_dir.join(file_id);
        std::fs::write(&dest, &bytes).map_err(|e| CoreError::Io { path: dest.clone(), source: e })?;
        Ok(dest)
    }
}
