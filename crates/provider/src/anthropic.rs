//! Anthropic messages API backend

use crate::usage::token_count;
use crate::*;
use reqwest::Client;
use serde_json::json;

const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 5000;

/// Backend for Anthropic's `/v1/messages` endpoint
pub struct AnthropicBackend {
    client: Client,
    api_key: String,
    api_base: String,
    model: String,
    options: RequestOptions,
}

impl AnthropicBackend {
    pub fn new(
        client: Client,
        api_key: impl Into<String>,
        api_base: Option<String>,
        model: Option<String>,
    ) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            api_base: api_base.unwrap_or_else(|| "https://api.anthropic.com/v1".to_string()),
            model: model.unwrap_or_else(|| "claude-3-5-sonnet-20240620".to_string()),
            options: RequestOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    fn encode_message(message: &Message) -> Result<Value> {
        let encoded = match message {
            Message::UserWithImages { .. } => {
                return Err(ProviderError::Unsupported(
                    "image attachments".to_string(),
                ))
            }
            Message::System { content } | Message::User { content, .. } => {
                json!({"role": "user", "content": content})
            }
            Message::Assistant(msg) => {
                let mut blocks = Vec::new();
                if let Some(text) = msg.content.as_deref().filter(|t| !t.is_empty()) {
                    blocks.push(json!({"type": "text", "text": text}));
                }
                for call in &msg.tool_calls {
                    // tool_use input must be an object even if the model sent garbage
                    let input = call.function.arguments.decode().unwrap_or_else(|_| json!({}));
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": call.id,
                        "name": call.function.name,
                        "input": input
                    }));
                }
                json!({"role": "assistant", "content": blocks})
            }
            Message::ToolResult(result) => {
                json!({"role": "user", "content": [Self::encode_tool_result(result)]})
            }
            Message::ToolResultGroup { results } => {
                let blocks: Vec<Value> = results.iter().map(Self::encode_tool_result).collect();
                json!({"role": "user", "content": blocks})
            }
        };
        Ok(encoded)
    }

    fn encode_tool_result(result: &ToolResult) -> Value {
        json!({
            "type": "tool_result",
            "tool_use_id": result.tool_call_id,
            "content": result.content
        })
    }

    fn build_request(&self, request: &LlmRequest) -> Result<Value> {
        // assistant turns with no content blocks are rejected by the API
        let messages = request
            .messages
            .iter()
            .filter(|m| !matches!(m, Message::Assistant(msg) if msg.is_empty()))
            .map(Self::encode_message)
            .collect::<Result<Vec<_>>>()?;

        let mut body = json!({
            "model": self.model,
            "system": request.system,
            "messages": messages,
            "max_tokens": request
                .options
                .max_tokens
                .or(self.options.max_tokens)
                .unwrap_or(DEFAULT_MAX_TOKENS),
        });

        if let Some(temperature) = request.options.temperature.or(self.options.temperature) {
            body["temperature"] = json!(temperature);
        }

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.parameters
                    })
                })
                .collect();
            body["tools"] = json!(tools);
        }

        Ok(body)
    }

    fn parse_response(&self, json: Value) -> Result<AssistantMessage> {
        let blocks = json["content"]
            .as_array()
            .ok_or(ProviderError::InvalidResponse)?;

        let mut texts = Vec::new();
        let mut tool_calls = Vec::new();
        for block in blocks {
            match block["type"].as_str() {
                Some("text") => {
                    if let Some(text) = block["text"].as_str() {
                        texts.push(text.to_string());
                    }
                }
                Some("tool_use") => {
                    let mut calling = ToolCalling::new(
                        block["id"].as_str().unwrap_or(""),
                        block["name"].as_str().unwrap_or(""),
                        Arguments::Parsed(block["input"].clone()),
                    );
                    calling.kind = "tool_use".to_string();
                    tool_calls.push(calling);
                }
                other => trace!("skipping anthropic content block {:?}", other),
            }
        }

        let usage = json["usage"].as_object().map(|usage| {
            Usage::new(
                token_count(usage.get("input_tokens")),
                token_count(usage.get("output_tokens")),
            )
        });

        Ok(AssistantMessage {
            content: if texts.is_empty() {
                None
            } else {
                Some(texts.join("\n"))
            },
            tool_calls,
            model: json["model"]
                .as_str()
                .map(|s| s.to_string())
                .or_else(|| Some(self.model.clone())),
            usage,
        })
    }
}

#[async_trait]
impl Backend for AnthropicBackend {
    async fn call(&self, request: LlmRequest) -> Result<AssistantMessage> {
        log_outgoing("anthropic", &request);

        if self.api_key.is_empty() {
            return Err(ProviderError::NoApiKey);
        }

        let body = self.build_request(&request)?;
        let url = format!("{}/messages", self.api_base);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let json: Value = response.json().await?;

        if !status.is_success() {
            return Err(api_error(status, &json));
        }

        debug!(
            "anthropic response: stop_reason={}",
            json["stop_reason"].as_str().unwrap_or("unknown")
        );

        self.parse_response(json)
    }

    fn default_model(&self) -> String {
        self.model.clone()
    }

    fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}
