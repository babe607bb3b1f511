//! Backend contract and message model
//!
//! Uniform types every LLM adapter speaks, plus the adapters themselves.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use thiserror::Error;
use tracing::{debug, trace};

pub mod anthropic;
pub mod message;
pub mod openai;
pub mod usage;

pub use anthropic::AnthropicBackend;
pub use message::{Arguments, AssistantMessage, Function, Message, ToolCalling, ToolResult};
pub use openai::OpenAiBackend;
pub use usage::{AgentUsage, Usage};

/// Backend errors
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("api error: {0}")]
    Api(String),

    #[error("no api key configured")]
    NoApiKey,

    #[error("invalid response from backend")]
    InvalidResponse,

    #[error("rate limited")]
    RateLimited,

    #[error("unsupported by this backend: {0}")]
    Unsupported(String),
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Tool advertised to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Sampling knobs forwarded to the backend
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RequestOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// One backend call
#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    pub system: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
    pub options: RequestOptions,
}

impl LlmRequest {
    pub fn new(system: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            system: system.into(),
            messages,
            ..Default::default()
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }
}

/// An LLM provider adapter
///
/// Implementations must return `Err` on transport or API failure instead of a
/// degraded message; callers decide how to surface the failure.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn call(&self, request: LlmRequest) -> Result<AssistantMessage>;
    fn default_model(&self) -> String;
    fn is_configured(&self) -> bool;
}

/// Build JSON schema
pub fn object_schema(properties: Vec<(String, String, bool)>) -> Value {
    let mut props = serde_json::Map::new();
    let mut required = Vec::new();

    for (name, description, is_required) in properties {
        props.insert(
            name.clone(),
            serde_json::json!({
                "type": "string",
                "description": description
            }),
        );
        if is_required {
            required.push(name);
        }
    }

    serde_json::json!({
        "type": "object",
        "properties": props,
        "required": required
    })
}

/// Pull `error.message` out of a provider error body
pub(crate) fn api_error(status: reqwest::StatusCode, body: &Value) -> ProviderError {
    if status.as_u16() == 429 {
        return ProviderError::RateLimited;
    }
    let message = body["error"]["message"]
        .as_str()
        .unwrap_or("unknown error")
        .to_string();
    debug!("backend rejected request ({}): {}", status, message);
    ProviderError::Api(message)
}

pub(crate) fn log_outgoing(backend: &str, request: &LlmRequest) {
    trace!(
        "{} request: {} messages, {} tools",
        backend,
        request.messages.len(),
        request.tools.len()
    );
}
