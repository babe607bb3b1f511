//! Structured one-shot calls with validation and retry
//!
//! An [`LlmFunction`] sends a query to the backend, optionally requires the
//! reply to be JSON of a given shape, checks it with a [`Validator`] and, when
//! the check fails, shows the model its reply and the failure before trying
//! again.

use std::fmt;
use std::sync::Arc;

use parley_provider::{AgentUsage, AssistantMessage, Backend, LlmRequest, Message, RequestOptions};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::apology::random_apology;
use crate::fault::guard;
use crate::observer::Observer;

/// Default number of backend calls per invocation
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Outcome of parsing or validating a reply
#[derive(Debug, Clone, PartialEq)]
pub enum CheckResult<T> {
    Ok(T),
    /// Explanation shown to the model on retry
    Fail(String),
}

impl<T> CheckResult<T> {
    pub fn fail(message: impl Into<String>) -> Self {
        Self::Fail(message.into())
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    pub fn is_fail(&self) -> bool {
        matches!(self, Self::Fail(_))
    }

    pub fn ok(self) -> Option<T> {
        match self {
            Self::Ok(value) => Some(value),
            Self::Fail(_) => None,
        }
    }

    pub fn fail_message(&self) -> Option<&str> {
        match self {
            Self::Ok(_) => None,
            Self::Fail(message) => Some(message),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CheckResult<U> {
        match self {
            Self::Ok(value) => CheckResult::Ok(f(value)),
            Self::Fail(message) => CheckResult::Fail(message),
        }
    }

    pub fn and_then<U>(self, f: impl FnOnce(T) -> CheckResult<U>) -> CheckResult<U> {
        match self {
            Self::Ok(value) => f(value),
            Self::Fail(message) => CheckResult::Fail(message),
        }
    }

    pub fn into_result(self) -> Result<T, String> {
        match self {
            Self::Ok(value) => Ok(value),
            Self::Fail(message) => Err(message),
        }
    }
}

impl<T, E: fmt::Display> From<Result<T, E>> for CheckResult<T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Self::Ok(value),
            Err(e) => Self::Fail(e.to_string()),
        }
    }
}

/// Accepts, rewrites or rejects a parsed reply
pub trait Validator: Send + Sync {
    fn check(&self, value: Value) -> CheckResult<Value>;
}

impl<F> Validator for F
where
    F: Fn(Value) -> CheckResult<Value> + Send + Sync,
{
    fn check(&self, value: Value) -> CheckResult<Value> {
        self(value)
    }
}

fn shaped_prompt(prompt: &str, shape: &Value) -> String {
    let shape = serde_json::to_string_pretty(shape).unwrap_or_else(|_| shape.to_string());
    format!(
        "{}\n\nYour answer MUST CONFORM to this JSON format:\n{}\n\n\
         Reply with a single valid JSON object. DO NOT include the JSON format itself in \
         your answer. DO NOT wrap the answer in markdown or include the `json` tag.",
        prompt, shape
    )
}

/// A prompt turned into a callable, checked function
pub struct LlmFunction {
    backend: Arc<dyn Backend>,
    system_prompt: String,
    shape: Option<Value>,
    validator: Option<Arc<dyn Validator>>,
    max_attempts: u32,
    options: RequestOptions,
    observer: Option<Arc<dyn Observer>>,
}

impl LlmFunction {
    pub fn builder(backend: Arc<dyn Backend>, prompt: impl Into<String>) -> LlmFunctionBuilder {
        LlmFunctionBuilder {
            backend,
            prompt: prompt.into(),
            shape: None,
            validator: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            options: RequestOptions::default(),
            observer: None,
        }
    }

    /// Effective system prompt, including the shape instructions
    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn has_validator(&self) -> bool {
        self.validator.is_some()
    }

    pub async fn call(
        &self,
        query: impl Into<Message>,
        usage: Option<&mut AgentUsage>,
    ) -> CheckResult<Value> {
        self.run(query.into(), usage).await
    }

    /// Like [`LlmFunction::call`], attaching images when `image_urls` is non-empty
    pub async fn call_with_images(
        &self,
        query: impl Into<String>,
        image_urls: Vec<String>,
        usage: Option<&mut AgentUsage>,
    ) -> CheckResult<Value> {
        let message = if image_urls.is_empty() {
            Message::user(query)
        } else {
            Message::user_with_images(query, image_urls)
        };
        self.run(message, usage).await
    }

    /// [`LlmFunction::call`] for callers without an async runtime
    pub fn call_blocking(
        &self,
        query: impl Into<Message>,
        usage: Option<&mut AgentUsage>,
    ) -> CheckResult<Value> {
        match crate::blocking_runtime() {
            Ok(runtime) => runtime.block_on(self.call(query, usage)),
            Err(e) => {
                warn!("call_blocking unavailable: {}", e);
                CheckResult::Fail(e.to_string())
            }
        }
    }

    pub fn call_with_images_blocking(
        &self,
        query: impl Into<String>,
        image_urls: Vec<String>,
        usage: Option<&mut AgentUsage>,
    ) -> CheckResult<Value> {
        match crate::blocking_runtime() {
            Ok(runtime) => runtime.block_on(self.call_with_images(query, image_urls, usage)),
            Err(e) => {
                warn!("call_with_images_blocking unavailable: {}", e);
                CheckResult::Fail(e.to_string())
            }
        }
    }

    async fn run(&self, query: Message, mut usage: Option<&mut AgentUsage>) -> CheckResult<Value> {
        // (failed reply, correction) pairs, oldest first
        let mut retries: Vec<Message> = Vec::new();

        for attempt in 1..=self.max_attempts {
            let mut messages = Vec::with_capacity(1 + retries.len());
            messages.push(query.clone());
            if self.validator.is_some() {
                messages.extend(retries.iter().cloned());
            }

            if let Some(observer) = &self.observer {
                observer.on_request(&messages);
            }

            let request =
                LlmRequest::new(self.system_prompt.clone(), messages).with_options(self.options);
            let reply = match self.backend.call(request).await {
                Ok(reply) => reply,
                Err(e) => {
                    error!("backend call failed: {}", e);
                    return CheckResult::Fail(random_apology().to_string());
                }
            };

            if let Some(observer) = &self.observer {
                observer.on_reply(&reply);
            }
            if let (Some(model), Some(reply_usage)) = (&reply.model, reply.usage) {
                if let Some(total) = usage.as_deref_mut() {
                    total.add_usage(model.clone(), reply_usage);
                }
            }

            let message = match self.parse(&reply).and_then(|value| self.validate(value)) {
                CheckResult::Ok(value) => return CheckResult::Ok(value),
                CheckResult::Fail(message) => message,
            };

            if self.validator.is_none() || attempt == self.max_attempts {
                debug!("giving up after attempt {}: {}", attempt, message);
                return CheckResult::Fail(message);
            }

            debug!("attempt {} rejected: {}", attempt, message);
            retries.push(Message::Assistant(reply));
            retries.push(Message::user(message));
        }

        CheckResult::fail("no attempts were made")
    }

    fn parse(&self, reply: &AssistantMessage) -> CheckResult<Value> {
        let content = reply.content.as_deref().unwrap_or("");
        if self.shape.is_some() {
            serde_json::from_str::<Value>(content).into()
        } else {
            CheckResult::Ok(Value::String(content.to_string()))
        }
    }

    fn validate(&self, value: Value) -> CheckResult<Value> {
        let Some(validator) = &self.validator else {
            return CheckResult::Ok(value);
        };

        match guard(|| validator.check(value)) {
            Ok(result) => result,
            Err(fault) => {
                error!("validator {}", fault);
                CheckResult::Fail(fault.to_string())
            }
        }
    }
}

/// Builder for [`LlmFunction`]
pub struct LlmFunctionBuilder {
    backend: Arc<dyn Backend>,
    prompt: String,
    shape: Option<Value>,
    validator: Option<Arc<dyn Validator>>,
    max_attempts: u32,
    options: RequestOptions,
    observer: Option<Arc<dyn Observer>>,
}

impl LlmFunctionBuilder {
    /// Require a JSON reply of this shape
    pub fn shape(mut self, shape: Value) -> Self {
        self.shape = Some(shape);
        self
    }

    pub fn validator(mut self, validator: impl Validator + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// At least one attempt is always made
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn build(self) -> LlmFunction {
        let system_prompt = match &self.shape {
            Some(shape) => shaped_prompt(&self.prompt, shape),
            None => self.prompt,
        };

        if let Some(observer) = &self.observer {
            observer.on_system_prompt(&system_prompt);
        }

        LlmFunction {
            backend: self.backend,
            system_prompt,
            shape: self.shape,
            validator: self.validator,
            max_attempts: self.max_attempts,
            options: self.options,
            observer: self.observer,
        }
    }
}
