//! Hooks for watching agent and function traffic

use parley_config::LoggingConfig;
use parley_provider::{AgentUsage, AssistantMessage, Message};

/// Receives prompts, messages, replies and usage as they happen
///
/// Every method defaults to doing nothing.
pub trait Observer: Send + Sync {
    fn on_system_prompt(&self, _prompt: &str) {}

    fn on_request(&self, _messages: &[Message]) {}

    fn on_reply(&self, _reply: &AssistantMessage) {}

    /// Usage of one completed `ask`
    fn on_usage(&self, _usage: &AgentUsage) {}
}

/// Prints to stdout according to [`LoggingConfig`]
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleObserver {
    config: LoggingConfig,
}

impl ConsoleObserver {
    pub fn new(config: LoggingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LoggingConfig {
        &self.config
    }
}

impl Observer for ConsoleObserver {
    fn on_system_prompt(&self, prompt: &str) {
        if self.config.print_system_prompt {
            println!("{}", Message::system(prompt));
        }
    }

    fn on_request(&self, messages: &[Message]) {
        if self.config.print_messages {
            for message in messages {
                println!("{}", message);
            }
        }
    }

    fn on_reply(&self, reply: &AssistantMessage) {
        if self.config.print_messages {
            println!("{}", Message::Assistant(reply.clone()));
        }
    }

    fn on_usage(&self, usage: &AgentUsage) {
        if self.config.print_usage_report {
            println!("{}", usage);
        }
    }
}
