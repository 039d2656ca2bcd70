//! Provider contract (spec §4.4 "Call shape", SPEC_FULL.md §13). The core
//! does not implement a concrete LLM integration; `LlmClient` is the seam
//! the runner (C5) and the schema pipeline (C4) code against.

mod http;
mod mock;
mod retry;

pub use http::HttpLlmClient;
pub use mock::MockClient;
pub use retry::RetryPolicy;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::CoreResult;

/// An attachment's content as it should be delivered to a given tool target
/// (spec §4.2 per-tool attachment uploads).
#[derive(Debug, Clone)]
pub struct AttachmentUpload {
    pub alias: String,
    pub name: String,
    pub target: crate::attachment::Target,
    pub content: UploadContent,
}

#[derive(Debug, Clone)]
pub enum UploadContent {
    Text(String),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct StructuredRequest {
    pub system: Option<String>,
    pub user: String,
    pub schema: Value,
    pub model: String,
    pub temperature: f64,
    pub max_output_tokens: Option<u64>,
    pub timeout: Duration,
    pub uploads: Vec<AttachmentUpload>,
}

#[derive(Debug, Clone)]
pub struct RawRequest {
    pub system: Option<String>,
    pub user: String,
    pub model: String,
    pub temperature: f64,
    pub max_output_tokens: Option<u64>,
    pub timeout: Duration,
    pub uploads: Vec<AttachmentUpload>,
}

/// A file the provider mentions in its response (used by the sentinel pass,
/// spec §4.4 "Two-pass sentinel workaround").
#[derive(Debug, Clone)]
pub struct ProviderFileRef {
    pub id: String,
    pub suggested_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub body: String,
    pub files: Vec<ProviderFileRef>,
    pub output_tokens: u64,
    pub cost_estimate: Option<f64>,
}

/// The seam the runner and schema pipeline code against; `HttpLlmClient` is
/// the reqwest-based reference adapter, `MockClient` drives tests.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn structured_call(&self, req: &StructuredRequest) -> CoreResult<ProviderResponse>;
    async fn raw_call(&self, req: &RawRequest) -> CoreResult<ProviderResponse>;
    async fn download_file(&self, file_id: &str, dest_dir: &Path) -> CoreResult<PathBuf>;
}
