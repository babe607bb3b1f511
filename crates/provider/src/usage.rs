//! Token accounting

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::AddAssign;

/// Token consumption of one or more calls
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, other: Self) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(other.prompt_tokens);
        self.completion_tokens = self.completion_tokens.saturating_add(other.completion_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
    }
}

/// Token count from a usage payload field, clamped to `u32`
pub(crate) fn token_count(value: Option<&serde_json::Value>) -> u32 {
    value
        .and_then(serde_json::Value::as_u64)
        .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
        .unwrap_or(0)
}

/// Usage accumulated per model identifier
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentUsage {
    models: BTreeMap<String, Usage>,
}

impl AgentUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_usage(&mut self, model: impl Into<String>, usage: Usage) {
        *self.models.entry(model.into()).or_default() += usage;
    }

    /// Fold another accumulator into this one, summing per model
    pub fn merge(&mut self, other: &AgentUsage) {
        for (model, usage) in &other.models {
            self.add_usage(model.clone(), *usage);
        }
    }

    pub fn get(&self, model: &str) -> Option<&Usage> {
        self.models.get(model)
    }

    /// Sum across all models
    pub fn total(&self) -> Usage {
        let mut total = Usage::default();
        for usage in self.models.values() {
            total += *usage;
        }
        total
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn models(&self) -> impl Iterator<Item = (&str, &Usage)> {
        self.models.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl fmt::Display for AgentUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Usage report:")?;
        if self.models.is_empty() {
            return write!(f, "  (no usage recorded)");
        }
        for (model, usage) in &self.models {
            writeln!(
                f,
                "  {}: prompt={} completion={} total={}",
                model, usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
            )?;
        }
        let total = self.total();
        write!(
            f,
            "  all models: prompt={} completion={} total={}",
            total.prompt_tokens, total.completion_tokens, total.total_tokens
        )
    }
}
