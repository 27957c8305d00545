//! Session Controller
//!
//! Drives one conversation through the model/tool loop:
//!
//! ```text
//!   Idle ──user msg──▶ AwaitingModelResponse ──calls──▶ ToolCallPending
//!    ▲                        │   ▲                         │
//!    └──── final content ─────┘   └── all results appended ─┤
//!                                                           ▼
//!                                                     ExecutingTool
//! ```
//!
//! Tool calls from one response run in the order the model emitted them. Each
//! call is appended together with its result only after dispatch finishes, so
//! an aborted or cancelled turn never leaves half an exchange behind.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dispatch::{Dispatcher, ToolCallResult};
use crate::error::{ChatError, Result};
use crate::message::{Conversation, Message, Role, ToolCallRequest};
use crate::provider::{Completion, FinishReason, GenerationOptions, LlmProvider};
use crate::tool::ToolRegistry;

/// Unique session identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Retries for transient model endpoint failures
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first
    pub max_retries: u32,
    /// Delay before the first retry; grows linearly
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: Duration::ZERO,
        }
    }
}

/// Session configuration
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Seeded as the first message when set
    pub system_prompt: Option<String>,

    /// Generation options
    pub generation: GenerationOptions,

    /// Model responses carrying tool calls allowed per turn
    pub max_tool_rounds: usize,

    /// Per-call limit for tool handlers
    pub tool_timeout: Option<Duration>,

    /// Retries for retryable endpoint errors
    pub retry: RetryPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            generation: GenerationOptions::default(),
            max_tool_rounds: 10,
            tool_timeout: None,
            retry: RetryPolicy::default(),
        }
    }
}

/// Where the controller is within a turn
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Idle,
    AwaitingModelResponse,
    ToolCallPending,
    ExecutingTool,
}

/// One call made during a turn, for display
#[derive(Clone, Debug, Serialize)]
pub struct ToolInvocation {
    pub request: ToolCallRequest,
    pub result: ToolCallResult,
}

/// Result of a completed turn
#[derive(Clone, Debug, Serialize)]
pub struct TurnOutcome {
    /// Final assistant text
    pub reply: String,

    /// Calls executed on the way, in order
    pub invocations: Vec<ToolInvocation>,

    /// Model responses that carried tool calls
    pub rounds: usize,

    pub finish_reason: Option<FinishReason>,
}

/// A conversation bound to a model endpoint and a tool registry
pub struct Session {
    id: SessionId,
    provider: Arc<dyn LlmProvider>,
    registry: Arc<ToolRegistry>,
    dispatcher: Dispatcher,
    config: SessionConfig,
    conversation: Conversation,
    state: TurnState,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a new session
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        registry: Arc<ToolRegistry>,
        config: SessionConfig,
    ) -> Self {
        let conversation = config
            .system_prompt
            .as_ref()
            .map_or_else(Conversation::new, Conversation::with_system_prompt);
        let now = Utc::now();

        Self {
            id: SessionId::new(),
            provider,
            registry,
            dispatcher: Dispatcher::new().with_timeout(config.tool_timeout),
            config,
            conversation,
            state: TurnState::Idle,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    pub const fn id(&self) -> &SessionId {
        &self.id
    }

    pub const fn state(&self) -> TurnState {
        self.state
    }

    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Read-only view of the transcript
    pub fn transcript(&self) -> &[Message] {
        self.conversation.messages()
    }

    /// Owned copy of the transcript
    pub fn snapshot(&self) -> Vec<Message> {
        self.conversation.snapshot()
    }

    /// Message count
    pub fn message_count(&self) -> usize {
        self.conversation.len()
    }

    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Preview of the first user message
    pub fn title(&self) -> String {
        self.conversation
            .messages()
            .iter()
            .find(|m| m.role == Role::User)
            .map_or_else(
                || format!("Session {}", &self.id.0[..8.min(self.id.0.len())]),
                |m| {
                    let content = m.content_str();
                    let preview: String = content.chars().take(50).collect();
                    if content.chars().count() > 50 {
                        format!("{preview}...")
                    } else {
                        preview
                    }
                },
            )
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Settle whatever an interrupted turn left behind and return the error
    /// result for a trailing call nothing will answer.
    ///
    /// A call left by an interrupted turn is always closed. Otherwise it is
    /// closed only when `close_idle` holds and `next` isn't its result. The
    /// caller appends the result together with its own messages.
    fn settle_pending(&mut self, next: Option<&Message>, close_idle: bool) -> Option<Message> {
        let interrupted = self.state != TurnState::Idle;
        if interrupted {
            tracing::warn!(
                session = %self.id,
                state = ?self.state,
                "Previous turn was interrupted"
            );
            self.state = TurnState::Idle;
            return self
                .conversation
                .closing_result("the turn was cancelled before this call finished");
        }
        if !close_idle || next.is_some_and(Message::is_function_result) {
            return None;
        }
        self.conversation
            .closing_result("no result was recorded for this call")
    }

    /// Append messages without contacting the model.
    ///
    /// # Errors
    ///
    /// Returns `TranscriptViolation` if the messages would break call/result
    /// adjacency; nothing is appended in that case.
    pub fn append(&mut self, messages: Vec<Message>) -> Result<()> {
        let closing = self.settle_pending(messages.first(), false);
        self.conversation
            .push_all(closing.into_iter().chain(messages).collect())?;
        self.touch();
        Ok(())
    }

    /// Clear the history back to the seeded system prompt
    pub fn reset(&mut self) {
        self.state = TurnState::Idle;
        self.conversation.reset();
        self.touch();
    }

    /// Run a turn for one user message
    ///
    /// # Errors
    ///
    /// Endpoint failures and `MaxToolRounds`. Tool problems are not errors;
    /// they are reported to the model and show up in the outcome.
    pub async fn submit(&mut self, text: impl Into<String>) -> Result<TurnOutcome> {
        self.submit_messages(vec![Message::user(text)]).await
    }

    /// Run a turn after appending several messages at once
    ///
    /// # Errors
    ///
    /// As [`Session::submit`], plus `TranscriptViolation` for messages that
    /// don't fit the transcript.
    #[tracing::instrument(skip_all, fields(session = %self.id))]
    pub async fn submit_messages(&mut self, messages: Vec<Message>) -> Result<TurnOutcome> {
        let closing = self.settle_pending(messages.first(), true);
        self.conversation
            .push_all(closing.into_iter().chain(messages).collect())?;
        self.touch();
        self.drive().await
    }

    /// Ask the model again without adding a message, e.g. after a
    /// transport failure.
    ///
    /// # Errors
    ///
    /// As [`Session::submit`].
    #[tracing::instrument(skip_all, fields(session = %self.id))]
    pub async fn resume(&mut self) -> Result<TurnOutcome> {
        if let Some(closing) = self.settle_pending(None, true) {
            self.conversation.push(closing)?;
        }
        if self.conversation.is_empty() {
            return Err(ChatError::Config("nothing to resume".into()));
        }
        self.drive().await
    }

    async fn drive(&mut self) -> Result<TurnOutcome> {
        let outcome = self.run_loop().await;
        self.state = TurnState::Idle;
        self.touch();
        match &outcome {
            Ok(turn) => tracing::info!(
                rounds = turn.rounds,
                tool_calls = turn.invocations.len(),
                messages = self.conversation.len(),
                "Turn complete"
            ),
            Err(e) => tracing::warn!(error = %e, "Turn aborted"),
        }
        outcome
    }

    async fn run_loop(&mut self) -> Result<TurnOutcome> {
        let mut invocations = Vec::new();
        let mut rounds = 0;

        loop {
            self.state = TurnState::AwaitingModelResponse;
            let completion = self.request_completion().await?;

            if !completion.has_tool_calls() {
                match completion.finish_reason {
                    Some(FinishReason::Length) => {
                        tracing::warn!("Model stopped at the token limit");
                    }
                    Some(FinishReason::ContentFilter) => {
                        tracing::warn!("Model output was filtered");
                    }
                    _ => {}
                }
                let reply = completion.content.unwrap_or_default();
                self.conversation.push(Message::assistant(reply.clone()))?;
                return Ok(TurnOutcome {
                    reply,
                    invocations,
                    rounds,
                    finish_reason: completion.finish_reason,
                });
            }

            rounds += 1;
            if rounds > self.config.max_tool_rounds {
                return Err(ChatError::MaxToolRounds(self.config.max_tool_rounds));
            }

            self.state = TurnState::ToolCallPending;
            let mut preface = completion.content.filter(|c| !c.trim().is_empty());

            for request in completion.tool_calls {
                self.state = TurnState::ExecutingTool;
                let result = self.dispatcher.execute(&self.registry, &request).await;

                let mut call = Message::tool_call(request.clone());
                if let Some(text) = preface.take() {
                    call = call.with_content(text);
                }
                let answer = Message::function_result(&request, result.to_content());
                self.conversation.push_exchange(call, answer)?;

                invocations.push(ToolInvocation { request, result });
                self.state = TurnState::ToolCallPending;
            }
        }
    }

    async fn request_completion(&self) -> Result<Completion> {
        let tools = self.registry.describe_all();
        let mut attempt = 0;

        loop {
            let response = self
                .provider
                .complete(self.conversation.messages(), &tools, &self.config.generation)
                .await;

            match response {
                Ok(completion) => return Ok(completion),
                Err(e) if e.is_retryable() && attempt < self.config.retry.max_retries => {
                    attempt += 1;
                    let delay = self.config.retry.backoff * attempt;
                    tracing::warn!(error = %e, attempt, ?delay, "Model request failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl std::fmt::Display for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.conversation.len() {
            1 => write!(f, "<Session 1 message>"),
            n => write!(f, "<Session {n} messages>"),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("messages", &self.conversation.len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Session`]
pub struct SessionBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    registry: Option<Arc<ToolRegistry>>,
    config: SessionConfig,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            registry: None,
            config: SessionConfig::default(),
        }
    }

    #[must_use]
    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    #[must_use]
    pub fn registry(mut self, registry: Arc<ToolRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    #[must_use]
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.generation.model = model.into();
        self
    }

    #[must_use]
    pub const fn temperature(mut self, temp: f32) -> Self {
        self.config.generation.temperature = temp;
        self
    }

    #[must_use]
    pub const fn max_tool_rounds(mut self, max: usize) -> Self {
        self.config.max_tool_rounds = max;
        self
    }

    #[must_use]
    pub const fn tool_timeout(mut self, timeout: Duration) -> Self {
        self.config.tool_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub const fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    /// # Errors
    ///
    /// Returns `Config` if no provider was set.
    pub fn build(self) -> Result<Session> {
        let provider = self
            .provider
            .ok_or_else(|| ChatError::Config("Provider is required".into()))?;
        let registry = self.registry.unwrap_or_default();

        Ok(Session::new(provider, registry, self.config))
    }
}

/// Shareable handle that serializes turns on one session.
///
/// A second turn started while one is in flight fails fast with
/// `SessionBusy` instead of queueing behind it.
#[derive(Clone)]
pub struct SessionHandle {
    id: SessionId,
    inner: Arc<tokio::sync::Mutex<Session>>,
}

impl SessionHandle {
    pub fn new(session: Session) -> Self {
        Self {
            id: session.id().clone(),
            inner: Arc::new(tokio::sync::Mutex::new(session)),
        }
    }

    pub const fn id(&self) -> &SessionId {
        &self.id
    }

    fn claim(&self) -> Result<tokio::sync::MutexGuard<'_, Session>> {
        self.inner.try_lock().map_err(|_| ChatError::SessionBusy)
    }

    /// Run a turn
    ///
    /// # Errors
    ///
    /// `SessionBusy` if a turn is already running, otherwise as [`Session::submit`].
    pub async fn submit(&self, text: impl Into<String>) -> Result<TurnOutcome> {
        self.claim()?.submit(text).await
    }

    /// # Errors
    ///
    /// `SessionBusy` if a turn is already running, otherwise as [`Session::resume`].
    pub async fn resume(&self) -> Result<TurnOutcome> {
        self.claim()?.resume().await
    }

    /// Transcript copy; waits for an in-flight turn to finish
    pub async fn snapshot(&self) -> Vec<Message> {
        self.inner.lock().await.snapshot()
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle").field("id", &self.id).finish_non_exhaustive()
    }
}
