//! Common test utilities for parley-agent integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use parley_memory::{Memory, MemoryError};
use parley_provider::{
    Arguments, AssistantMessage, Backend, LlmRequest, Message, ProviderError, ToolCalling, Usage,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Backend that plays back a fixed script of replies and records requests
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Result<AssistantMessage, ProviderError>>>,
    repeat: Option<AssistantMessage>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedBackend {
    /// Replies in order; errors once the script runs out
    pub fn new(replies: Vec<AssistantMessage>) -> Arc<Self> {
        Self::with_results(replies.into_iter().map(Ok).collect())
    }

    pub fn with_results(results: Vec<Result<AssistantMessage, ProviderError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(results.into()),
            repeat: None,
            requests: Mutex::new(Vec::new()),
        })
    }

    /// The same reply forever
    pub fn repeating(reply: AssistantMessage) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            repeat: Some(reply),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Self::with_results(vec![Err(ProviderError::Api("backend down".to_string()))])
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> LlmRequest {
        self.requests
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no request recorded")
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn call(&self, request: LlmRequest) -> Result<AssistantMessage, ProviderError> {
        self.requests.lock().unwrap().push(request);

        if let Some(next) = self.script.lock().unwrap().pop_front() {
            return next;
        }
        match &self.repeat {
            Some(reply) => Ok(reply.clone()),
            None => Err(ProviderError::Api("script exhausted".to_string())),
        }
    }

    fn default_model(&self) -> String {
        "scripted".to_string()
    }

    fn is_configured(&self) -> bool {
        true
    }
}

/// What a [`RecordingMemory`] saw
#[derive(Default)]
pub struct MemoryLog {
    pub history: Mutex<Vec<Message>>,
    pub loads: AtomicUsize,
    pub flushes: Mutex<Vec<Vec<Message>>>,
}

impl MemoryLog {
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.lock().unwrap().len()
    }

    pub fn last_flush(&self) -> Vec<Message> {
        self.flushes
            .lock()
            .unwrap()
            .last()
            .cloned()
            .unwrap_or_default()
    }
}

/// Memory that counts loads and flushes; the test keeps the shared log
#[derive(Clone, Default)]
pub struct RecordingMemory {
    pub log: Arc<MemoryLog>,
}

impl RecordingMemory {
    pub fn with_history(history: Vec<Message>) -> Self {
        let memory = Self::default();
        *memory.log.history.lock().unwrap() = history;
        memory
    }
}

#[async_trait]
impl Memory for RecordingMemory {
    async fn load_memory(&self) -> Result<Vec<Message>, MemoryError> {
        self.log.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.log.history.lock().unwrap().clone())
    }

    async fn add_messages(&self, messages: &[Message]) -> Result<(), MemoryError> {
        self.log.flushes.lock().unwrap().push(messages.to_vec());
        Ok(())
    }
}

/// Memory whose every operation fails
pub struct BrokenMemory;

#[async_trait]
impl Memory for BrokenMemory {
    async fn load_memory(&self) -> Result<Vec<Message>, MemoryError> {
        Err(MemoryError::Unavailable("disk on fire".to_string()))
    }

    async fn add_messages(&self, _messages: &[Message]) -> Result<(), MemoryError> {
        Err(MemoryError::Unavailable("disk on fire".to_string()))
    }
}

/// Tool call with raw JSON text arguments
pub fn call(id: &str, name: &str, arguments: &str) -> ToolCalling {
    ToolCalling::new(id, name, Arguments::Encoded(arguments.to_string()))
}

pub fn tool_reply(calls: Vec<ToolCalling>) -> AssistantMessage {
    AssistantMessage::with_tool_calls(calls)
}

pub fn text_reply(text: &str) -> AssistantMessage {
    AssistantMessage::text(text)
}

pub fn text_reply_with_usage(text: &str, model: &str, prompt: u32, completion: u32) -> AssistantMessage {
    AssistantMessage::text(text).with_usage(model, Usage::new(prompt, completion))
}

/// Contents of the tool results carried by `message`
pub fn tool_result_texts(message: &Message) -> Vec<String> {
    match message {
        Message::ToolResultGroup { results } => {
            results.iter().map(|r| r.content.clone()).collect()
        }
        Message::ToolResult(result) => vec![result.content.clone()],
        other => panic!("expected tool results, got {:?}", other),
    }
}
