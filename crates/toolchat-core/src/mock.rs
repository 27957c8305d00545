//! Scripted Provider
//!
//! For tests and demos. Replays a fixed sequence of replies and records every
//! request so tests can check exactly what the model was shown.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{ChatError, Result};
use crate::message::{Message, ToolCallRequest};
use crate::provider::{Completion, GenerationOptions, LlmProvider, ModelInfo, ProviderInfo};
use crate::tool::ToolDescriptor;

/// One scripted step
#[derive(Clone, Debug)]
pub enum ScriptStep {
    Reply(Completion),
    /// Fails the request with `Transport`
    TransportFailure(String),
    /// Fails the request with `ProviderUnavailable` (retryable)
    Unavailable(String),
}

/// What the provider was sent on one request
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<String>,
}

/// Provider that replays scripted replies in order
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<ScriptStep>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a final text answer
    #[must_use]
    pub fn reply(self, content: &str) -> Self {
        self.step(ScriptStep::Reply(Completion::text(content)))
    }

    /// Queue a single tool call
    #[must_use]
    pub fn call(self, name: &str, arguments: &str) -> Self {
        self.calls(&[(name, arguments)])
    }

    /// Queue one response carrying several tool calls
    #[must_use]
    pub fn calls(self, calls: &[(&str, &str)]) -> Self {
        let requests = calls
            .iter()
            .map(|(name, args)| ToolCallRequest::new(*name, *args))
            .collect();
        self.step(ScriptStep::Reply(Completion::calls(requests)))
    }

    /// Queue an arbitrary step
    #[must_use]
    pub fn step(self, step: ScriptStep) -> Self {
        self.lock_script().push_back(step);
        self
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Steps not yet consumed
    pub fn remaining(&self) -> usize {
        self.lock_script().len()
    }

    fn lock_script(&self) -> std::sync::MutexGuard<'_, VecDeque<ScriptStep>> {
        self.script
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn info(&self) -> Result<ProviderInfo> {
        Ok(ProviderInfo {
            name: "Scripted".into(),
            version: None,
            models: self.list_models().await?,
            supports_tools: true,
        })
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
        options: &GenerationOptions,
    ) -> Result<Completion> {
        self.requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(RecordedRequest {
                messages: messages.to_vec(),
                tools: tools.iter().map(|t| t.name.clone()).collect(),
            });

        let step = self.lock_script().pop_front();
        match step {
            Some(ScriptStep::Reply(mut completion)) => {
                completion.model.clone_from(&options.model);
                Ok(completion)
            }
            Some(ScriptStep::TransportFailure(msg)) => Err(ChatError::Transport(msg)),
            Some(ScriptStep::Unavailable(msg)) => Err(ChatError::ProviderUnavailable(msg)),
            None => Err(ChatError::Transport("script exhausted".into())),
        }
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        Ok(vec![ModelInfo {
            id: "scripted".into(),
            name: "scripted".into(),
            context_length: None,
        }])
    }
}
