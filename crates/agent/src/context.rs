//! Context for tool handlers and assembly of agent prompts

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use parley_provider::Message;

use crate::tools::ToolRegistry;

/// Application state handed to tools that ask for it
///
/// Cloning is cheap; every clone shares the same value.
#[derive(Clone, Default)]
pub struct Context {
    value: Option<Arc<dyn Any + Send + Sync>>,
}

impl Context {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            value: Some(Arc::new(value)),
        }
    }

    /// Share an existing `Arc`, e.g. one the application keeps mutating
    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self {
            value: Some(value),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }

    /// The stored value, if it is a `T`
    pub fn get<T: Any>(&self) -> Option<&T> {
        self.value.as_deref()?.downcast_ref::<T>()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            f.write_str("Context(empty)")
        } else {
            f.write_str("Context(..)")
        }
    }
}

/// Builds the system prompt and message list for each backend call
#[derive(Debug, Clone, Default)]
pub struct ContextBuilder {
    base_prompt: String,
}

impl ContextBuilder {
    pub fn new(base_prompt: impl Into<String>) -> Self {
        Self {
            base_prompt: base_prompt.into(),
        }
    }

    pub fn base_prompt(&self) -> &str {
        &self.base_prompt
    }

    /// Base prompt followed by the prompt fragments of active tools
    pub fn build_system_prompt(&self, tools: &ToolRegistry) -> String {
        let mut parts = Vec::new();
        if !self.base_prompt.is_empty() {
            parts.push(self.base_prompt.as_str());
        }
        parts.extend(tools.prompt_fragments());
        parts.join("\n\n")
    }

    /// Loaded history followed by the current conversation
    pub fn build_messages(&self, history: &[Message], conversation: &[Message]) -> Vec<Message> {
        let mut messages = Vec::with_capacity(history.len() + conversation.len());
        messages.extend_from_slice(history);
        messages.extend_from_slice(conversation);
        messages
    }
}
