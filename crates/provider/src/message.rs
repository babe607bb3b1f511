//! Conversation turns exchanged with a backend

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::usage::Usage;

/// A single conversation turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    System {
        content: String,
    },
    User {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    UserWithImages {
        content: String,
        image_urls: Vec<String>,
    },
    Assistant(AssistantMessage),
    ToolResult(ToolResult),
    ToolResultGroup {
        results: Vec<ToolResult>,
    },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
            name: None,
        }
    }

    /// User turn attributed to a named speaker
    pub fn user_named(content: impl Into<String>, name: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
            name: Some(name.into()),
        }
    }

    pub fn user_with_images(content: impl Into<String>, image_urls: Vec<String>) -> Self {
        Self::UserWithImages {
            content: content.into(),
            image_urls,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant(AssistantMessage::text(content))
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::ToolResult(ToolResult::new(tool_call_id, content))
    }

    pub fn tool_results(results: Vec<ToolResult>) -> Self {
        Self::ToolResultGroup { results }
    }

    /// Role tag as used on the wire by most providers
    pub fn role(&self) -> &'static str {
        match self {
            Self::System { .. } => "system",
            Self::User { .. } | Self::UserWithImages { .. } => "user",
            Self::Assistant(_) => "assistant",
            Self::ToolResult(_) | Self::ToolResultGroup { .. } => "tool",
        }
    }

    /// Plain text of the turn, if it has any
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::System { content }
            | Self::User { content, .. }
            | Self::UserWithImages { content, .. } => Some(content),
            Self::Assistant(msg) => msg.content.as_deref(),
            Self::ToolResult(result) => Some(&result.content),
            Self::ToolResultGroup { .. } => None,
        }
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self, Self::ToolResult(_) | Self::ToolResultGroup { .. })
    }
}

impl From<&str> for Message {
    fn from(content: &str) -> Self {
        Self::user(content)
    }
}

impl From<String> for Message {
    fn from(content: String) -> Self {
        Self::user(content)
    }
}

impl From<AssistantMessage> for Message {
    fn from(msg: AssistantMessage) -> Self {
        Self::Assistant(msg)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System { content } => write!(f, "[system] {}", content),
            Self::User {
                content,
                name: Some(name),
            } => write!(f, "[user:{}] {}", name, content),
            Self::User { content, .. } => write!(f, "[user] {}", content),
            Self::UserWithImages {
                content,
                image_urls,
            } => write!(f, "[user +{} images] {}", image_urls.len(), content),
            Self::Assistant(msg) => {
                write!(f, "[assistant] {}", msg.content.as_deref().unwrap_or(""))?;
                for call in &msg.tool_calls {
                    write!(
                        f,
                        "\n  -> {}({})",
                        call.function.name, call.function.arguments
                    )?;
                }
                Ok(())
            }
            Self::ToolResult(result) => {
                write!(f, "[tool {}] {}", result.tool_call_id, result.content)
            }
            Self::ToolResultGroup { results } => {
                write!(f, "[tools]")?;
                for result in results {
                    write!(f, "\n  <- {}: {}", result.tool_call_id, result.content)?;
                }
                Ok(())
            }
        }
    }
}

/// Model reply, possibly carrying tool requests and usage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCalling>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl AssistantMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn with_tool_calls(tool_calls: Vec<ToolCalling>) -> Self {
        Self {
            tool_calls,
            ..Default::default()
        }
    }

    pub fn with_usage(mut self, model: impl Into<String>, usage: Usage) -> Self {
        self.model = Some(model.into());
        self.usage = Some(usage);
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Non-empty text content
    pub fn has_content(&self) -> bool {
        self.content.as_deref().is_some_and(|c| !c.is_empty())
    }

    /// Neither text nor tool calls
    pub fn is_empty(&self) -> bool {
        !self.has_content() && !self.has_tool_calls()
    }
}

/// A model-requested tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCalling {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: Function,
}

impl ToolCalling {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Arguments) -> Self {
        Self {
            id: id.into(),
            kind: "function".to_string(),
            function: Function {
                name: name.into(),
                arguments,
            },
        }
    }
}

/// Invocation target and its arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub arguments: Arguments,
}

/// Tool arguments as delivered by a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Arguments {
    /// JSON text not parsed yet
    Encoded(String),
    Parsed(Value),
}

impl Arguments {
    pub fn decode(&self) -> serde_json::Result<Value> {
        match self {
            Self::Encoded(raw) => serde_json::from_str(raw),
            Self::Parsed(value) => Ok(value.clone()),
        }
    }

    /// JSON text form, as OpenAI-style wire formats expect
    pub fn to_json_string(&self) -> String {
        match self {
            Self::Encoded(raw) => raw.clone(),
            Self::Parsed(value) => value.to_string(),
        }
    }
}

impl From<Value> for Arguments {
    fn from(value: Value) -> Self {
        Self::Parsed(value)
    }
}

impl fmt::Display for Arguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_json_string())
    }
}

/// Output of one tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub content: String,
}

impl ToolResult {
    pub fn new(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_roles() {
        assert_eq!(Message::system("s").role(), "system");
        assert_eq!(Message::user("u").role(), "user");
        assert_eq!(Message::user_with_images("u", vec![]).role(), "user");
        assert_eq!(Message::assistant("a").role(), "assistant");
        assert_eq!(Message::tool_result("c", "r").role(), "tool");
        assert_eq!(Message::tool_results(vec![]).role(), "tool");
    }

    #[test]
    fn test_message_from_str_is_user_turn() {
        let msg: Message = "hello".into();
        assert_eq!(msg, Message::user("hello"));
        assert_eq!(msg.text(), Some("hello"));
    }

    #[test]
    fn test_assistant_text_and_tool_calls_coexist() {
        let mut msg = AssistantMessage::text("Let me check");
        msg.tool_calls.push(ToolCalling::new(
            "call_1",
            "lookup",
            Arguments::Parsed(json!({"q": "x"})),
        ));

        assert!(msg.has_content());
        assert!(msg.has_tool_calls());
    }

    #[test]
    fn test_empty_content_is_not_content() {
        let msg = AssistantMessage::text("");
        assert!(!msg.has_content());
        assert!(!AssistantMessage::default().has_content());
        assert!(msg.is_empty());
        assert!(AssistantMessage::default().is_empty());
        assert!(!AssistantMessage::text("hi").is_empty());
    }

    #[test]
    fn test_arguments_decode_encoded() {
        let args = Arguments::Encoded(r#"{"city": "Oslo"}"#.to_string());
        assert_eq!(args.decode().unwrap(), json!({"city": "Oslo"}));
    }

    #[test]
    fn test_arguments_decode_invalid() {
        let args = Arguments::Encoded("{not json".to_string());
        assert!(args.decode().is_err());
    }

    #[test]
    fn test_arguments_untagged_serde() {
        let encoded: Arguments = serde_json::from_value(json!("{\"a\":1}")).unwrap();
        assert_eq!(encoded, Arguments::Encoded("{\"a\":1}".to_string()));

        let parsed: Arguments = serde_json::from_value(json!({"a": 1})).unwrap();
        assert_eq!(parsed, Arguments::Parsed(json!({"a": 1})));
    }

    #[test]
    fn test_message_serde_tagging() {
        let msg = Message::user_named("hi", "ana");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["role"], "user");
        assert_eq!(value["name"], "ana");

        let back: Message = serde_json::from_value(value).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_tool_result_group_serde() {
        let msg = Message::tool_results(vec![
            ToolResult::new("c1", "one"),
            ToolResult::new("c2", "two"),
        ]);
        let json_str = serde_json::to_string(&msg).unwrap();
        assert!(json_str.contains("\"role\":\"tool_result_group\""));

        let back: Message = serde_json::from_str(&json_str).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_display_lists_tool_calls() {
        let msg = Message::Assistant(AssistantMessage::with_tool_calls(vec![ToolCalling::new(
            "call_1",
            "search",
            Arguments::Encoded("{\"q\":\"rust\"}".to_string()),
        )]));
        let rendered = msg.to_string();
        assert!(rendered.starts_with("[assistant]"));
        assert!(rendered.contains("search({\"q\":\"rust\"})"));
    }
}
