//! File-backed conversation memory
//!
//! Each conversation key maps to one JSON file under the bank directory.

use async_trait::async_trait;
use chrono::{DateTime, Local};
use parley_config::paths::safe_filename;
use parley_provider::Message;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{Memory, Result};

/// Default maximum number of messages kept per conversation
pub const DEFAULT_MAX_MESSAGES: usize = 100;

/// Drop the oldest turns beyond `max`, then any tool results left without
/// the assistant turn that requested them
pub(crate) fn truncate_history(messages: &mut Vec<Message>, max: usize) {
    if messages.len() > max {
        let to_remove = messages.len() - max;
        messages.drain(0..to_remove);
    }

    let orphans = messages
        .iter()
        .take_while(|m| m.is_tool_result())
        .count();
    if orphans > 0 {
        messages.drain(0..orphans);
    }
}

/// A stored conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Conversation key, e.g. "cli:default"
    pub key: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Local>,
    pub updated_at: DateTime<Local>,
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
}

fn default_max_messages() -> usize {
    DEFAULT_MAX_MESSAGES
}

impl Session {
    pub fn new(key: impl Into<String>) -> Self {
        Self::with_max_messages(key, DEFAULT_MAX_MESSAGES)
    }

    pub fn with_max_messages(key: impl Into<String>, max_messages: usize) -> Self {
        let now = Local::now();
        Self {
            key: key.into(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            max_messages,
        }
    }

    /// Append turns and enforce the size limit
    pub fn extend(&mut self, messages: &[Message]) {
        self.messages.extend_from_slice(messages);
        self.updated_at = Local::now();
        self.enforce_max_messages();
    }

    fn enforce_max_messages(&mut self) {
        let before = self.messages.len();
        truncate_history(&mut self.messages, self.max_messages);
        if self.messages.len() < before {
            debug!(
                "session {} truncated to {} messages",
                self.key,
                self.messages.len()
            );
        }
    }

    /// The most recent `max_messages` turns
    pub fn history(&self, max_messages: usize) -> Vec<Message> {
        self.messages
            .iter()
            .skip(self.messages.len().saturating_sub(max_messages))
            .cloned()
            .collect()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.updated_at = Local::now();
    }

    pub fn set_max_messages(&mut self, max_messages: usize) {
        self.max_messages = max_messages;
        self.enforce_max_messages();
    }
}

/// Directory of persisted conversations with an in-process cache
pub struct MemoryBank {
    dir: PathBuf,
    cache: Mutex<HashMap<String, Session>>,
    max_messages: usize,
}

impl MemoryBank {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self::with_max_messages(dir, DEFAULT_MAX_MESSAGES)
    }

    pub fn with_max_messages(dir: impl AsRef<Path>, max_messages: usize) -> Self {
        let dir = dir.as_ref().to_path_buf();
        if let Err(e) = std::fs::create_dir_all(&dir) {
            warn!("failed to create memory dir {:?}: {}", dir, e);
        }

        Self {
            dir,
            cache: Mutex::new(HashMap::new()),
            max_messages,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    /// A [`Memory`] view of one conversation
    pub fn memory(self: &Arc<Self>, key: impl Into<String>) -> BankMemory {
        BankMemory {
            bank: Arc::clone(self),
            key: key.into(),
        }
    }

    /// Stored turns for `key`, empty if the conversation is new
    pub async fn history(&self, key: &str) -> Vec<Message> {
        let mut cache = self.cache.lock().await;
        self.cached(&mut cache, key).await.messages.clone()
    }

    /// Append turns to `key` and persist the conversation
    pub async fn append(&self, key: &str, messages: &[Message]) -> Result<()> {
        let mut cache = self.cache.lock().await;
        let session = self.cached(&mut cache, key).await;
        session.extend(messages);
        let snapshot = session.clone();
        drop(cache);

        self.save(&snapshot).await
    }

    /// Forget the turns of `key` but keep its file
    pub async fn clear(&self, key: &str) -> Result<()> {
        let mut cache = self.cache.lock().await;
        let session = self.cached(&mut cache, key).await;
        session.clear();
        let snapshot = session.clone();
        drop(cache);

        self.save(&snapshot).await
    }

    pub async fn save(&self, session: &Session) -> Result<()> {
        let path = self.session_path(&session.key);
        let content = serde_json::to_string_pretty(session)?;
        tokio::fs::write(path, content).await?;
        debug!("saved conversation: {}", session.key);
        Ok(())
    }

    /// Remove a conversation from disk and cache
    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.cache.lock().await.remove(key);
        let path = self.session_path(key);
        if path.exists() {
            tokio::fs::remove_file(path).await?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Keys of all stored conversations
    pub async fn list(&self) -> Vec<String> {
        let mut keys = Vec::new();

        if let Ok(mut entries) = tokio::fs::read_dir(&self.dir).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                match Self::read_session(&path).await {
                    Some(session) => keys.push(session.key),
                    None => {
                        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                            keys.push(stem.to_string());
                        }
                    }
                }
            }
        }

        keys.sort();
        keys
    }

    async fn cached<'a>(
        &self,
        cache: &'a mut HashMap<String, Session>,
        key: &str,
    ) -> &'a mut Session {
        match cache.entry(key.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let session = self
                    .load(key)
                    .await
                    .unwrap_or_else(|| Session::with_max_messages(key, self.max_messages));
                entry.insert(session)
            }
        }
    }

    async fn load(&self, key: &str) -> Option<Session> {
        let path = self.session_path(key);
        if !path.exists() {
            return None;
        }

        let mut session = Self::read_session(&path).await?;
        if session.max_messages != self.max_messages {
            session.set_max_messages(self.max_messages);
        }
        debug!("loaded conversation: {}", key);
        Some(session)
    }

    async fn read_session(path: &Path) -> Option<Session> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => match serde_json::from_str::<Session>(&content) {
                Ok(session) => Some(session),
                Err(e) => {
                    warn!("failed to parse conversation {:?}: {}", path, e);
                    None
                }
            },
            Err(e) => {
                warn!("failed to read conversation {:?}: {}", path, e);
                None
            }
        }
    }

    fn session_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", safe_filename(key)))
    }
}

/// One conversation of a [`MemoryBank`]
#[derive(Clone)]
pub struct BankMemory {
    bank: Arc<MemoryBank>,
    key: String,
}

impl BankMemory {
    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl Memory for BankMemory {
    async fn load_memory(&self) -> Result<Vec<Message>> {
        Ok(self.bank.history(&self.key).await)
    }

    async fn add_messages(&self, messages: &[Message]) -> Result<()> {
        self.bank.append(&self.key, messages).await
    }
}
