//! OpenAI-compatible chat completions backend
//!
//! Covers OpenAI, OpenRouter and self-hosted servers that speak the same API.

use crate::usage::token_count;
use crate::*;
use reqwest::Client;
use serde_json::json;

/// Backend for `/chat/completions` style endpoints
pub struct OpenAiBackend {
    client: Client,
    api_key: String,
    api_base: String,
    model: String,
    options: RequestOptions,
}

impl OpenAiBackend {
    /// The HTTP client is owned by the caller and may be shared between backends.
    pub fn new(
        client: Client,
        api_key: impl Into<String>,
        api_base: Option<String>,
        model: Option<String>,
    ) -> Self {
        let api_key = api_key.into();
        let is_openrouter = api_key.starts_with("sk-or-")
            || api_base
                .as_ref()
                .map(|b| b.contains("openrouter"))
                .unwrap_or(false);

        let api_base = api_base.unwrap_or_else(|| {
            if is_openrouter {
                "https://openrouter.ai/api/v1".to_string()
            } else {
                "https://api.openai.com/v1".to_string()
            }
        });

        let model = model.unwrap_or_else(|| {
            if is_openrouter {
                "openai/gpt-4o".to_string()
            } else {
                "gpt-4o".to_string()
            }
        });

        Self {
            client,
            api_key,
            api_base,
            model,
            options: RequestOptions::default(),
        }
    }

    /// Defaults used when a request does not set its own options
    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    fn encode_message(message: &Message) -> Vec<Value> {
        match message {
            Message::System { content } => vec![json!({"role": "system", "content": content})],
            Message::User { content, name } => {
                let mut obj = json!({"role": "user", "content": content});
                if let Some(name) = name {
                    obj["name"] = json!(name);
                }
                vec![obj]
            }
            Message::UserWithImages {
                content,
                image_urls,
            } => {
                let mut parts = vec![json!({"type": "text", "text": content})];
                parts.extend(
                    image_urls
                        .iter()
                        .map(|url| json!({"type": "image_url", "image_url": {"url": url}})),
                );
                vec![json!({"role": "user", "content": parts})]
            }
            // a turn with neither text nor tool calls is rejected by the API
            Message::Assistant(msg) if msg.is_empty() => vec![],
            Message::Assistant(msg) => {
                let mut obj = json!({ "role": "assistant" });
                obj["content"] = match &msg.content {
                    Some(content) => json!(content),
                    None => Value::Null,
                };
                if msg.has_tool_calls() {
                    let calls: Vec<Value> = msg
                        .tool_calls
                        .iter()
                        .map(|c| {
                            json!({
                                "id": c.id,
                                "type": "function",
                                "function": {
                                    "name": c.function.name,
                                    "arguments": c.function.arguments.to_json_string()
                                }
                            })
                        })
                        .collect();
                    obj["tool_calls"] = json!(calls);
                }
                vec![obj]
            }
            Message::ToolResult(result) => vec![Self::encode_tool_result(result)],
            Message::ToolResultGroup { results } => {
                results.iter().map(Self::encode_tool_result).collect()
            }
        }
    }

    fn encode_tool_result(result: &ToolResult) -> Value {
        json!({
            "role": "tool",
            "tool_call_id": result.tool_call_id,
            "content": result.content
        })
    }

    fn build_request(&self, request: &LlmRequest) -> Value {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if !request.system.is_empty() {
            messages.push(json!({"role": "system", "content": request.system}));
        }
        for message in &request.messages {
            messages.extend(Self::encode_message(message));
        }

        let mut body = json!({
            "model": self.model,
            "messages": messages,
        });

        if let Some(max_tokens) = request.options.max_tokens.or(self.options.max_tokens) {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(temperature) = request.options.temperature.or(self.options.temperature) {
            body["temperature"] = json!(temperature);
        }

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": &t.name,
                            "description": &t.description,
                            "parameters": &t.parameters
                        }
                    })
                })
                .collect();

            body["tools"] = json!(tools);
            body["tool_choice"] = json!("auto");
        }

        body
    }

    fn parse_response(&self, json: Value) -> Result<AssistantMessage> {
        let choice = json["choices"]
            .get(0)
            .ok_or(ProviderError::InvalidResponse)?;
        let message = &choice["message"];
        let content = message["content"].as_str().map(|s| s.to_string());

        let mut tool_calls = Vec::new();
        if let Some(calls) = message["tool_calls"].as_array() {
            for call in calls {
                let function = &call["function"];
                let arguments = match &function["arguments"] {
                    Value::String(raw) => Arguments::Encoded(raw.clone()),
                    Value::Null => Arguments::Parsed(json!({})),
                    other => Arguments::Parsed(other.clone()),
                };

                let mut calling = ToolCalling::new(
                    call["id"].as_str().unwrap_or(""),
                    function["name"].as_str().unwrap_or(""),
                    arguments,
                );
                if let Some(kind) = call["type"].as_str() {
                    calling.kind = kind.to_string();
                }
                tool_calls.push(calling);
            }
        }

        let usage = json["usage"].as_object().map(|usage| Usage {
            prompt_tokens: token_count(usage.get("prompt_tokens")),
            completion_tokens: token_count(usage.get("completion_tokens")),
            total_tokens: token_count(usage.get("total_tokens")),
        });

        let model = json["model"]
            .as_str()
            .map(|s| s.to_string())
            .or_else(|| Some(self.model.clone()));

        Ok(AssistantMessage {
            content,
            tool_calls,
            model,
            usage,
        })
    }
}

#[async_trait]
impl Backend for OpenAiBackend {
    async fn call(&self, request: LlmRequest) -> Result<AssistantMessage> {
        log_outgoing("openai", &request);

        if self.api_key.is_empty() {
            return Err(ProviderError::NoApiKey);
        }

        let url = format!("{}/chat/completions", self.api_base);
        let body = self.build_request(&request);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
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
            "openai response: {} tool calls",
            json["choices"][0]["message"]["tool_calls"]
                .as_array()
                .map(|v| v.len())
                .unwrap_or(0)
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn backend() -> OpenAiBackend {
        OpenAiBackend::new(Client::new(), "sk-test", None, Some("gpt-test".to_string()))
    }

    #[test]
    fn test_new_with_openrouter_key() {
        let backend = OpenAiBackend::new(Client::new(), "sk-or-test123", None, None);
        assert_eq!(backend.api_base, "https://openrouter.ai/api/v1");
        assert_eq!(backend.default_model(), "openai/gpt-4o");
    }

    #[test]
    fn test_new_with_openai_key() {
        let backend = OpenAiBackend::new(Client::new(), "sk-openai123", None, None);
        assert_eq!(backend.api_base, "https://api.openai.com/v1");
        assert_eq!(backend.default_model(), "gpt-4o");
    }

    #[test]
    fn test_new_with_custom_base() {
        let backend = OpenAiBackend::new(
            Client::new(),
            "key",
            Some("http://localhost:8000/v1".to_string()),
            None,
        );
        assert_eq!(backend.api_base, "http://localhost:8000/v1");
    }

    #[test]
    fn test_is_configured() {
        assert!(backend().is_configured());
        assert!(!OpenAiBackend::new(Client::new(), "", None, None).is_configured());
    }

    #[tokio::test]
    async fn test_call_without_key_fails_fast() {
        let backend = OpenAiBackend::new(Client::new(), "", None, None);
        let result = backend.call(LlmRequest::new("s", vec![])).await;
        assert!(matches!(result, Err(ProviderError::NoApiKey)));
    }

    #[test]
    fn test_build_request_basic() {
        let request = LlmRequest::new("You are helpful", vec![Message::user("Hello")]);
        let body = backend().build_request(&request);

        assert_eq!(body["model"], "gpt-test");
        assert!(body.get("tools").is_none());
        assert!(body.get("max_tokens").is_none());

        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(messages[1]["content"], "Hello");
    }

    #[test]
    fn test_build_request_options_override_defaults() {
        let backend = backend().with_options(RequestOptions {
            temperature: Some(0.9),
            max_tokens: Some(100),
        });
        let request = LlmRequest::new("", vec![Message::user("x")]).with_options(RequestOptions {
            temperature: None,
            max_tokens: Some(10),
        });
        let body = backend.build_request(&request);

        assert_eq!(body["max_tokens"], 10);
        assert!((body["temperature"].as_f64().unwrap() - 0.9).abs() < 1e-6);
        // empty system prompt is not sent
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_build_request_with_tools() {
        let request = LlmRequest::new("s", vec![Message::user("weather?")]).with_tools(vec![
            ToolSpec::new("get_weather", "Get weather information", json!({"type": "object"})),
        ]);
        let body = backend().build_request(&request);

        let tools = body["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["type"], "function");
        assert_eq!(tools[0]["function"]["name"], "get_weather");
        assert_eq!(body["tool_choice"], "auto");
    }

    #[test]
    fn test_encode_images() {
        let msg = Message::user_with_images("what is this", vec!["https://x/img.png".into()]);
        let encoded = OpenAiBackend::encode_message(&msg);
        let parts = encoded[0]["content"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1]["type"], "image_url");
        assert_eq!(parts[1]["image_url"]["url"], "https://x/img.png");
    }

    #[test]
    fn test_encode_assistant_tool_calls_as_text_arguments() {
        let msg = Message::Assistant(AssistantMessage::with_tool_calls(vec![ToolCalling::new(
            "call_1",
            "get_weather",
            Arguments::Parsed(json!({"location": "NYC"})),
        )]));
        let encoded = OpenAiBackend::encode_message(&msg);

        assert_eq!(encoded[0]["content"], Value::Null);
        let call = &encoded[0]["tool_calls"][0];
        assert_eq!(call["id"], "call_1");
        assert_eq!(call["function"]["arguments"], "{\"location\":\"NYC\"}");
    }

    #[test]
    fn test_encode_tool_result_group_expands() {
        let msg = Message::tool_results(vec![
            ToolResult::new("c1", "one"),
            ToolResult::new("c2", "two"),
        ]);
        let encoded = OpenAiBackend::encode_message(&msg);
        assert_eq!(encoded.len(), 2);
        assert_eq!(encoded[0]["role"], "tool");
        assert_eq!(encoded[1]["tool_call_id"], "c2");
        assert_eq!(encoded[1]["content"], "two");
    }

    #[test]
    fn test_parse_response_simple() {
        let response_json = json!({
            "model": "gpt-4o-2024",
            "choices": [{
                "message": {"content": "Hello!", "role": "assistant"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        });

        let reply = backend().parse_response(response_json).unwrap();

        assert_eq!(reply.content, Some("Hello!".to_string()));
        assert!(!reply.has_tool_calls());
        assert_eq!(reply.model.as_deref(), Some("gpt-4o-2024"));
        assert_eq!(reply.usage, Some(Usage::new(10, 5)));
    }

    #[test]
    fn test_parse_response_keeps_arguments_encoded() {
        let response_json = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_123",
                        "type": "function",
                        "function": {
                            "name": "get_weather",
                            "arguments": "{\"location\": \"NYC\"}"
                        }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        });

        let reply = backend().parse_response(response_json).unwrap();

        assert_eq!(reply.content, None);
        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(reply.tool_calls[0].id, "call_123");
        assert_eq!(reply.tool_calls[0].function.name, "get_weather");
        assert_eq!(
            reply.tool_calls[0].function.arguments,
            Arguments::Encoded("{\"location\": \"NYC\"}".to_string())
        );
        // falls back to the configured model and reports no usage
        assert_eq!(reply.model.as_deref(), Some("gpt-test"));
        assert!(reply.usage.is_none());
    }

    #[test]
    fn test_parse_response_arguments_as_object() {
        let response_json = json!({
            "choices": [{
                "message": {
                    "tool_calls": [{
                        "id": "call_1",
                        "function": {"name": "test_tool", "arguments": {"key": "value"}}
                    }]
                }
            }]
        });

        let reply = backend().parse_response(response_json).unwrap();
        assert_eq!(
            reply.tool_calls[0].function.arguments,
            Arguments::Parsed(json!({"key": "value"}))
        );
    }

    #[test]
    fn test_empty_assistant_turn_is_not_sent() {
        assert!(OpenAiBackend::encode_message(&Message::Assistant(AssistantMessage::default()))
            .is_empty());
        assert!(OpenAiBackend::encode_message(&Message::Assistant(AssistantMessage::text("")))
            .is_empty());

        let request = LlmRequest::new(
            "sys",
            vec![
                Message::user("q"),
                Message::Assistant(AssistantMessage::default()),
                Message::user("again"),
            ],
        );
        let body = backend().build_request(&request);
        let messages = body["messages"].as_array().unwrap();

        assert_eq!(messages.len(), 3);
        assert!(messages.iter().all(|m| m["role"] != "assistant"));
    }

    #[test]
    fn test_parse_response_clamps_oversized_usage() {
        let reply = backend()
            .parse_response(json!({
                "choices": [{"message": {"content": "ok"}}],
                "usage": {
                    "prompt_tokens": 5_000_000_000u64,
                    "completion_tokens": 7,
                    "total_tokens": 5_000_000_007u64
                }
            }))
            .unwrap();

        let usage = reply.usage.unwrap();
        assert_eq!(usage.prompt_tokens, u32::MAX);
        assert_eq!(usage.completion_tokens, 7);
        assert_eq!(usage.total_tokens, u32::MAX);
    }

    #[test]
    fn test_parse_response_empty_choices() {
        let result = backend().parse_response(json!({"choices": []}));
        assert!(matches!(result, Err(ProviderError::InvalidResponse)));
    }

    #[test]
    fn test_parse_response_missing_choices() {
        let result = backend().parse_response(json!({"usage": {}}));
        assert!(matches!(result, Err(ProviderError::InvalidResponse)));
    }
}
