//! Tools the model can call
//!
//! A [`Tool`] pairs the schema advertised to the backend with a
//! [`ToolHandler`]. What the handler receives is fixed at registration by its
//! [`ToolInputs`] descriptor.

pub mod dispatch;

pub use dispatch::RecentCalls;

use async_trait::async_trait;
use futures::future::BoxFuture;
use parley_provider::ToolSpec;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::warn;

use crate::context::Context;
use crate::loop_agent::Agent;

/// Error returned by a tool handler
pub type ToolError = Box<dyn std::error::Error + Send + Sync>;

/// What a tool handler is given when invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolInputs {
    None,
    Arguments,
    ArgumentsAndContext,
    ArgumentsContextAndAgent,
}

/// Input assembled by the dispatcher according to [`ToolInputs`]
pub struct ToolInput<'a> {
    pub arguments: Option<Value>,
    pub context: Option<Context>,
    pub agent: Option<&'a mut Agent>,
}

impl ToolInput<'_> {
    pub fn empty() -> Self {
        Self {
            arguments: None,
            context: None,
            agent: None,
        }
    }
}

/// A handler was given an input shape it cannot use
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidInput(pub String);

impl InvalidInput {
    pub fn new(detail: impl Into<String>) -> Self {
        Self(detail.into())
    }
}

impl fmt::Display for InvalidInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for InvalidInput {}

fn missing(what: &str) -> ToolError {
    Box::new(InvalidInput::new(format!("expected {}", what)))
}

/// Executes a tool call
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn invoke(&self, input: ToolInput<'_>) -> Result<Value, ToolError>;
}

struct NoInputFn<F>(F);

#[async_trait]
impl<F, Fut> ToolHandler for NoInputFn<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
{
    async fn invoke(&self, _input: ToolInput<'_>) -> Result<Value, ToolError> {
        (self.0)().await
    }
}

struct ArgumentsFn<F>(F);

#[async_trait]
impl<F, Fut> ToolHandler for ArgumentsFn<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
{
    async fn invoke(&self, input: ToolInput<'_>) -> Result<Value, ToolError> {
        let arguments = input.arguments.ok_or_else(|| missing("arguments"))?;
        (self.0)(arguments).await
    }
}

struct ContextFn<F>(F);

#[async_trait]
impl<F, Fut> ToolHandler for ContextFn<F>
where
    F: Fn(Value, Context) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
{
    async fn invoke(&self, input: ToolInput<'_>) -> Result<Value, ToolError> {
        let arguments = input.arguments.ok_or_else(|| missing("arguments"))?;
        let context = input.context.ok_or_else(|| missing("a context"))?;
        (self.0)(arguments, context).await
    }
}

struct AgentFn<F>(F);

#[async_trait]
impl<F> ToolHandler for AgentFn<F>
where
    F: for<'a> Fn(Value, Context, &'a mut Agent) -> BoxFuture<'a, Result<Value, ToolError>>
        + Send
        + Sync,
{
    async fn invoke(&self, input: ToolInput<'_>) -> Result<Value, ToolError> {
        let arguments = input.arguments.ok_or_else(|| missing("arguments"))?;
        let context = input.context.ok_or_else(|| missing("a context"))?;
        let agent = input.agent.ok_or_else(|| missing("the calling agent"))?;
        (self.0)(arguments, context, agent).await
    }
}

/// A callable tool with its usage bookkeeping
#[derive(Clone)]
pub struct Tool {
    name: String,
    description: String,
    parameters: Value,
    prompt: Option<String>,
    inputs: ToolInputs,
    handler: Arc<dyn ToolHandler>,
    pub(crate) calls: u32,
    call_limit: Option<u32>,
    pub(crate) retired: bool,
}

impl Tool {
    /// Tool backed by a custom handler
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        inputs: ToolInputs,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            prompt: None,
            inputs,
            handler,
            calls: 0,
            call_limit: None,
            retired: false,
        }
    }

    /// Handler that takes the decoded arguments
    pub fn from_fn<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        f: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        Self::new(
            name,
            description,
            parameters,
            ToolInputs::Arguments,
            Arc::new(ArgumentsFn(f)),
        )
    }

    /// Handler that takes nothing
    pub fn no_input<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        f: F,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        Self::new(
            name,
            description,
            parameters,
            ToolInputs::None,
            Arc::new(NoInputFn(f)),
        )
    }

    /// Handler that takes the arguments and the agent's [`Context`]
    pub fn with_context<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        f: F,
    ) -> Self
    where
        F: Fn(Value, Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        Self::new(
            name,
            description,
            parameters,
            ToolInputs::ArgumentsAndContext,
            Arc::new(ContextFn(f)),
        )
    }

    /// Handler that also gets mutable access to the calling agent
    pub fn with_agent<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        f: F,
    ) -> Self
    where
        F: for<'a> Fn(Value, Context, &'a mut Agent) -> BoxFuture<'a, Result<Value, ToolError>>
            + Send
            + Sync
            + 'static,
    {
        Self::new(
            name,
            description,
            parameters,
            ToolInputs::ArgumentsContextAndAgent,
            Arc::new(AgentFn(f)),
        )
    }

    /// Text appended to the agent's system prompt while the tool is active
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    /// Override the agent-wide call limit for this tool
    pub fn with_call_limit(mut self, limit: u32) -> Self {
        self.call_limit = Some(limit);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn parameters(&self) -> &Value {
        &self.parameters
    }

    pub fn prompt(&self) -> Option<&str> {
        self.prompt.as_deref()
    }

    pub fn inputs(&self) -> ToolInputs {
        self.inputs
    }

    pub fn calls(&self) -> u32 {
        self.calls
    }

    pub fn call_limit(&self) -> Option<u32> {
        self.call_limit
    }

    pub fn is_retired(&self) -> bool {
        self.retired
    }

    pub(crate) fn handler(&self) -> Arc<dyn ToolHandler> {
        Arc::clone(&self.handler)
    }

    pub fn spec(&self) -> ToolSpec {
        ToolSpec::new(&self.name, &self.description, self.parameters.clone())
    }
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("calls", &self.calls)
            .field("call_limit", &self.call_limit)
            .field("retired", &self.retired)
            .finish()
    }
}

/// Tools of one agent, in registration order
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Tool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool, replacing an existing tool of the same name
    pub fn register(&mut self, tool: Tool) {
        match self.tools.iter().position(|t| t.name == tool.name) {
            Some(index) => {
                warn!("replacing tool {}", tool.name);
                self.tools[index] = tool;
            }
            None => self.tools.push(tool),
        }
    }

    /// First active tool with this name
    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.iter().find(|t| !t.retired && t.name == name)
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut Tool> {
        self.tools.iter_mut().find(|t| !t.retired && t.name == name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Drop a tool right away
    pub fn remove(&mut self, name: &str) -> Option<Tool> {
        let index = self.tools.iter().position(|t| t.name == name)?;
        Some(self.tools.remove(index))
    }

    pub fn names(&self) -> Vec<String> {
        self.active().map(|t| t.name.clone()).collect()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.active().map(Tool::spec).collect()
    }

    pub fn prompt_fragments(&self) -> impl Iterator<Item = &str> {
        self.active().filter_map(Tool::prompt)
    }

    /// Physically remove retired tools, returning their names
    pub fn sweep(&mut self) -> Vec<String> {
        let mut removed = Vec::new();
        let mut index = 0;
        while index < self.tools.len() {
            if self.tools[index].retired {
                removed.push(self.tools.remove(index).name);
            } else {
                index += 1;
            }
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.active().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn active(&self) -> impl Iterator<Item = &Tool> {
        self.tools.iter().filter(|t| !t.retired)
    }
}
