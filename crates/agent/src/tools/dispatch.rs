//! Running model-requested tool calls
//!
//! Every outcome, including unknown tools, bad arguments and handler
//! failures, becomes text for the model. Nothing is propagated to the caller.

use std::collections::VecDeque;

use parley_provider::{Arguments, Message, ToolCalling, ToolResult};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::{InvalidInput, ToolInput, ToolInputs};
use crate::fault::guard_async;
use crate::loop_agent::Agent;

/// Default size of the recent-call window
pub const DEFAULT_WINDOW: usize = 5;

/// Bounded FIFO of the most recent successful `(name, arguments)` calls
#[derive(Debug, Clone)]
pub struct RecentCalls {
    calls: VecDeque<(String, Arguments)>,
    capacity: usize,
}

impl Default for RecentCalls {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl RecentCalls {
    pub fn new(capacity: usize) -> Self {
        Self {
            calls: VecDeque::new(),
            capacity,
        }
    }

    pub fn contains(&self, name: &str, arguments: &Arguments) -> bool {
        self.calls
            .iter()
            .any(|(n, a)| n == name && a == arguments)
    }

    /// Remember a call, evicting the oldest past capacity
    pub fn record(&mut self, name: impl Into<String>, arguments: Arguments) {
        if self.capacity == 0 {
            return;
        }
        if self.calls.len() == self.capacity {
            self.calls.pop_front();
        }
        self.calls.push_back((name.into(), arguments));
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.calls.clear();
    }
}

/// Text the model sees for a handler's return value
pub(crate) fn normalize(name: &str, value: Value) -> String {
    match value {
        Value::String(text) => text,
        Value::Object(mut map) => match map.remove("message") {
            Some(Value::String(text)) => text,
            Some(other) => other.to_string(),
            None => format!("tool function {} finished", name),
        },
        _ => format!("tool function {} finished", name),
    }
}

impl Agent {
    /// Run one tool call and describe the outcome for the model
    pub async fn dispatch(&mut self, call: &ToolCalling) -> String {
        let name = call.function.name.as_str();
        let arguments = &call.function.arguments;

        if self.recent_calls.contains(name, arguments) {
            warn!("tool {} repeated with identical arguments", name);
            return format!(
                "Tool \"{}\" was just called with the same arguments again. To prevent loops, please try a different approach or different arguments.",
                name
            );
        }

        let default_limit = self.settings.tool_call_limit;
        let Some(tool) = self.tools.get_mut(name) else {
            debug!("model asked for unknown tool {}", name);
            return format!("No tool named \"{}\" found. Do not call it again.", name);
        };

        if tool.calls >= tool.call_limit().unwrap_or(default_limit) {
            tool.retired = true;
            warn!("tool {} reached its call limit after {} calls", name, tool.calls);
            return format!(
                "Tool \"{}\" has been called too many times, it will be removed from the list of available tools.",
                name
            );
        }

        let inputs = tool.inputs();
        let handler = tool.handler();

        let decoded = match arguments.decode() {
            Ok(value) => value,
            Err(e) => {
                debug!("undecodable arguments for {}: {}", name, e);
                return format!(
                    "Error decoding JSON parameter for \"{}\": {}. Use valid JSON string without the `json` tag.",
                    name, e
                );
            }
        };

        debug!("running tool {} with {}", name, arguments);
        let input = match inputs {
            ToolInputs::None => ToolInput::empty(),
            ToolInputs::Arguments => ToolInput {
                arguments: Some(decoded),
                context: None,
                agent: None,
            },
            ToolInputs::ArgumentsAndContext => ToolInput {
                arguments: Some(decoded),
                context: Some(self.context.clone()),
                agent: None,
            },
            ToolInputs::ArgumentsContextAndAgent => ToolInput {
                arguments: Some(decoded),
                context: Some(self.context.clone()),
                agent: Some(&mut *self),
            },
        };

        match guard_async(handler.invoke(input)).await {
            Ok(Ok(value)) => {
                self.recent_calls.record(name, arguments.clone());
                if let Some(tool) = self.tools.get_mut(name) {
                    tool.calls += 1;
                }
                normalize(name, value)
            }
            Ok(Err(err)) => match err.downcast_ref::<InvalidInput>() {
                Some(invalid) => {
                    error!("tool {} rejected its input: {}", name, invalid);
                    format!("Invalid parameters for tool function {}: {}", name, invalid)
                }
                None => {
                    warn!("tool {} failed: {}", name, err);
                    format!("Error running tool \"{}\": {}", name, err)
                }
            },
            Err(fault) => {
                error!("tool {} {}", name, fault);
                format!("Error running tool \"{}\": {}", name, fault)
            }
        }
    }

    /// Run every call of one reply in order and group the results
    pub(crate) async fn dispatch_all(&mut self, calls: &[ToolCalling]) -> Message {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            let content = self.dispatch(call).await;
            results.push(ToolResult::new(call.id.clone(), content));
        }

        let removed = self.tools.sweep();
        if !removed.is_empty() {
            info!("removed tools over their call limit: {}", removed.join(", "));
        }

        Message::tool_results(results)
    }
}
