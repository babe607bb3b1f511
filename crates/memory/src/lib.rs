//! Conversation memory for agents
//!
//! A [`Memory`] supplies prior turns before an agent asks the backend and
//! receives the turns produced by that ask afterwards.

use async_trait::async_trait;
use parley_provider::Message;
use std::sync::Mutex;
use thiserror::Error;
use tracing::debug;

pub mod bank;

pub use bank::{BankMemory, MemoryBank, Session, DEFAULT_MAX_MESSAGES};

/// Errors raised by memory stores
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("memory io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("memory json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("memory unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, MemoryError>;

/// Conversation store consulted by the agent loop
#[async_trait]
pub trait Memory: Send + Sync {
    /// Prior turns, oldest first
    async fn load_memory(&self) -> Result<Vec<Message>>;

    /// Append the turns of one completed ask
    async fn add_messages(&self, messages: &[Message]) -> Result<()>;
}

/// Process-local memory
#[derive(Debug, Default)]
pub struct InMemory {
    messages: Mutex<Vec<Message>>,
    max_messages: Option<usize>,
}

impl InMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep only the most recent `max_messages` turns
    pub fn with_max_messages(max_messages: usize) -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            max_messages: Some(max_messages),
        }
    }

    /// Snapshot of stored turns
    pub fn messages(&self) -> Vec<Message> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

#[async_trait]
impl Memory for InMemory {
    async fn load_memory(&self) -> Result<Vec<Message>> {
        Ok(self.messages())
    }

    async fn add_messages(&self, messages: &[Message]) -> Result<()> {
        let mut stored = self.messages.lock().unwrap_or_else(|e| e.into_inner());
        stored.extend_from_slice(messages);

        if let Some(max) = self.max_messages {
            bank::truncate_history(&mut stored, max);
        }

        debug!("in-memory store holds {} messages", stored.len());
        Ok(())
    }
}
