//! Agent loop - core processing engine

use std::fmt;
use std::sync::Arc;

use parley_config::{AgentDefaults, Config};
use parley_memory::Memory;
use parley_provider::{AgentUsage, Backend, LlmRequest, Message, RequestOptions};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::apology::random_apology;
use crate::context::{Context, ContextBuilder};
use crate::observer::{ConsoleObserver, Observer};
use crate::tools::{RecentCalls, Tool, ToolRegistry};

/// Answer given when the loop ends without a usable reply
pub const FALLBACK_REPLY: &str = "Sorry, I am not sure how to answer that.";

/// Loop limits and request options
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentSettings {
    pub max_iterations: u32,
    pub recent_call_window: usize,
    /// Calls allowed per tool unless the tool sets its own limit
    pub tool_call_limit: u32,
    pub options: RequestOptions,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            recent_call_window: 5,
            tool_call_limit: 10,
            options: RequestOptions::default(),
        }
    }
}

impl AgentSettings {
    pub fn from_config(defaults: &AgentDefaults) -> Self {
        Self {
            max_iterations: defaults.max_iterations,
            recent_call_window: defaults.recent_call_window,
            tool_call_limit: defaults.tool_call_limit,
            options: RequestOptions {
                temperature: Some(defaults.temperature),
                max_tokens: Some(defaults.max_tokens),
            },
        }
    }
}

/// The agent's answer to one `ask`
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Text(String),
    /// Parsed reply in JSON-reply mode
    Json(Value),
}

impl Reply {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Json(_) => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Text(_) => None,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Self::Text(text) => Value::String(text),
            Self::Json(value) => value,
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Json(value) => write!(f, "{}", value),
        }
    }
}

/// A conversational agent: one backend, its tools and an optional memory
///
/// Tool call counters and the recent-call window live as long as the agent,
/// across `ask` calls.
pub struct Agent {
    backend: Arc<dyn Backend>,
    pub(crate) tools: ToolRegistry,
    prompt: ContextBuilder,
    memory: Option<Box<dyn Memory>>,
    pub(crate) context: Context,
    json_reply: bool,
    pub(crate) recent_calls: RecentCalls,
    pub(crate) settings: AgentSettings,
    observer: Option<Arc<dyn Observer>>,
}

impl Agent {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        let settings = AgentSettings::default();
        Self {
            backend,
            tools: ToolRegistry::new(),
            prompt: ContextBuilder::default(),
            memory: None,
            context: Context::empty(),
            json_reply: false,
            recent_calls: RecentCalls::new(settings.recent_call_window),
            settings,
            observer: None,
        }
    }

    /// Agent with prompt, limits and console output taken from `config`
    pub fn from_config(backend: Arc<dyn Backend>, config: &Config) -> Self {
        let agent = Self::new(backend)
            .with_system_prompt(config.agent.system_prompt.clone())
            .with_settings(AgentSettings::from_config(&config.agent));

        if config.logging.is_silent() {
            agent
        } else {
            agent.with_observer(Arc::new(ConsoleObserver::new(config.logging)))
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = ContextBuilder::new(prompt);
        self
    }

    pub fn with_tool(mut self, tool: Tool) -> Self {
        self.tools.register(tool);
        self
    }

    pub fn with_tools(mut self, tools: impl IntoIterator<Item = Tool>) -> Self {
        for tool in tools {
            self.tools.register(tool);
        }
        self
    }

    pub fn with_memory(mut self, memory: impl Memory + 'static) -> Self {
        self.memory = Some(Box::new(memory));
        self
    }

    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    /// Parse final replies as JSON and ask again when they do not parse
    pub fn with_json_reply(mut self, json_reply: bool) -> Self {
        self.json_reply = json_reply;
        self
    }

    /// Replaces the recent-call window when its size changes
    pub fn with_settings(mut self, settings: AgentSettings) -> Self {
        if settings.recent_call_window != self.recent_calls.capacity() {
            self.recent_calls = RecentCalls::new(settings.recent_call_window);
        }
        self.settings = settings;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn register_tool(&mut self, tool: Tool) {
        self.tools.register(tool);
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn tools_mut(&mut self) -> &mut ToolRegistry {
        &mut self.tools
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn recent_calls(&self) -> &RecentCalls {
        &self.recent_calls
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    pub fn is_json_reply(&self) -> bool {
        self.json_reply
    }

    pub fn set_json_reply(&mut self, json_reply: bool) {
        self.json_reply = json_reply;
    }

    /// Current system prompt, including active tools' prompt fragments
    pub fn system_prompt(&self) -> String {
        self.prompt.build_system_prompt(&self.tools)
    }

    /// Ask the agent and wait for its reply
    ///
    /// Backend failures, tool failures and exhausted iterations all end in a
    /// reply. The turns of this call are handed to memory exactly once and its
    /// usage is merged into `usage` when given.
    pub async fn ask(
        &mut self,
        message: impl Into<Message>,
        usage: Option<&mut AgentUsage>,
    ) -> Reply {
        let mut call_usage = AgentUsage::new();
        let history = self.load_history().await;
        let mut conversation = vec![message.into()];

        let reply = self
            .run_loop(&history, &mut conversation, &mut call_usage)
            .await;

        self.flush(&conversation).await;

        if let Some(observer) = &self.observer {
            observer.on_usage(&call_usage);
        }
        if let Some(total) = usage {
            total.merge(&call_usage);
        }

        reply
    }

    /// [`Agent::ask`] for callers without an async runtime
    pub fn ask_blocking(
        &mut self,
        message: impl Into<Message>,
        usage: Option<&mut AgentUsage>,
    ) -> Reply {
        match crate::blocking_runtime() {
            Ok(runtime) => runtime.block_on(self.ask(message, usage)),
            Err(e) => {
                warn!("ask_blocking unavailable: {}", e);
                self.wrap(e.to_string())
            }
        }
    }

    async fn run_loop(
        &mut self,
        history: &[Message],
        conversation: &mut Vec<Message>,
        usage: &mut AgentUsage,
    ) -> Reply {
        for iteration in 1..=self.settings.max_iterations {
            debug!("agent iteration {}", iteration);

            let system = self.system_prompt();
            let messages = self.prompt.build_messages(history, conversation);
            if let Some(observer) = &self.observer {
                observer.on_system_prompt(&system);
                observer.on_request(&messages);
            }

            let request = LlmRequest::new(system, messages)
                .with_tools(self.tools.specs())
                .with_options(self.settings.options);

            let reply = match self.backend.call(request).await {
                Ok(reply) => reply,
                Err(e) => {
                    error!("backend call failed: {}", e);
                    return self.wrap(random_apology().to_string());
                }
            };

            if let Some(observer) = &self.observer {
                observer.on_reply(&reply);
            }
            if let (Some(model), Some(reply_usage)) = (&reply.model, reply.usage) {
                usage.add_usage(model.clone(), reply_usage);
            }

            let tool_calls = reply.tool_calls.clone();
            let content = reply.content.clone().filter(|c| !c.is_empty());
            conversation.push(Message::Assistant(reply));

            if !tool_calls.is_empty() {
                debug!("dispatching {} tool calls", tool_calls.len());
                let results = self.dispatch_all(&tool_calls).await;
                conversation.push(results);
                continue;
            }

            let Some(content) = content else {
                info!("reply had neither content nor tool calls");
                return self.wrap(FALLBACK_REPLY.to_string());
            };

            if !self.json_reply {
                info!("agent answered after {} iterations", iteration);
                return Reply::Text(content);
            }

            match serde_json::from_str::<Value>(&content) {
                Ok(value) => {
                    info!("agent answered after {} iterations", iteration);
                    return Reply::Json(value);
                }
                Err(e) => {
                    debug!("reply is not valid JSON: {}", e);
                    conversation.push(Message::user(format!(
                        "Error processing JSON message: {}. Make sure your response is a valid JSON string and do not include the `json` tag.",
                        e
                    )));
                }
            }
        }

        info!(
            "agent gave up after {} iterations",
            self.settings.max_iterations
        );
        self.wrap(FALLBACK_REPLY.to_string())
    }

    async fn load_history(&self) -> Vec<Message> {
        let Some(memory) = &self.memory else {
            return Vec::new();
        };

        match memory.load_memory().await {
            Ok(history) => history,
            Err(e) => {
                warn!("failed to load memory: {}", e);
                Vec::new()
            }
        }
    }

    async fn flush(&self, conversation: &[Message]) {
        if let Some(memory) = &self.memory {
            if let Err(e) = memory.add_messages(conversation).await {
                warn!("failed to save conversation to memory: {}", e);
            }
        }
    }

    fn wrap(&self, text: String) -> Reply {
        if self.json_reply {
            Reply::Json(json!({ "message": text }))
        } else {
            Reply::Text(text)
        }
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("tools", &self.tools.names())
            .field("json_reply", &self.json_reply)
            .field("has_memory", &self.memory.is_some())
            .field("settings", &self.settings)
            .finish()
    }
}
