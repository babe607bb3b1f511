//! Agent orchestration
//!
//! Multi-turn conversations with tool dispatch ([`Agent`]) and one-shot
//! structured calls with validation and retry ([`LlmFunction`]).

use thiserror::Error;
use tokio::runtime::{Builder, Handle, Runtime};

pub mod apology;
pub mod context;
pub mod fault;
pub mod function;
pub mod loop_agent;
pub mod observer;
pub mod tools;

pub use context::{Context, ContextBuilder};
pub use fault::Fault;
pub use function::{CheckResult, LlmFunction, LlmFunctionBuilder, Validator};
pub use loop_agent::{Agent, AgentSettings, Reply, FALLBACK_REPLY};
pub use observer::{ConsoleObserver, Observer};
pub use tools::{
    InvalidInput, RecentCalls, Tool, ToolError, ToolHandler, ToolInput, ToolInputs, ToolRegistry,
};

/// Agent errors
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("blocking call made from inside an async runtime, use the async variant")]
    NestedRuntime,

    #[error("failed to start runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AgentError>;

/// Private runtime for the `*_blocking` entry points
pub(crate) fn blocking_runtime() -> Result<Runtime> {
    if Handle::try_current().is_ok() {
        return Err(AgentError::NestedRuntime);
    }

    Ok(Builder::new_current_thread().enable_all().build()?)
}
