//! Conversation Messages
//!
//! The transcript is append-only. `Conversation::push` refuses any message that
//! would separate a tool call from its result, so a function-result message is
//! always directly preceded by the assistant call it answers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ChatError, Result};

/// Role of a message sender
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System prompt/instructions
    System,
    /// User input
    User,
    /// Assistant (LLM) response or tool-call request
    Assistant,
    /// Result of a tool invocation, fed back to the model
    Function,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::Function => write!(f, "function"),
        }
    }
}

/// Tool invocation requested by the model.
///
/// `arguments` is the raw payload exactly as the model produced it; nothing
/// about it is trusted until it has gone through the validator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Call ID from the provider, or a generated one
    pub id: String,

    /// Requested tool name
    pub name: String,

    /// Raw argument payload (JSON text)
    #[serde(default)]
    pub arguments: String,
}

impl ToolCallRequest {
    pub fn new(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// A single message in a conversation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message role
    pub role: Role,

    /// Text content; `None` for a bare tool-call request
    pub content: Option<String>,

    /// Tool call carried by an assistant message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCallRequest>,

    /// Name of the tool a function-result answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,

    /// ID of the call a function-result answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Timestamp
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_call: None,
            tool_name: None,
            tool_call_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    /// Create an assistant tool-call message
    pub fn tool_call(call: ToolCallRequest) -> Self {
        Self {
            role: Role::Assistant,
            content: None,
            tool_call: Some(call),
            tool_name: None,
            tool_call_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Create the result message answering `call`
    pub fn function_result(call: &ToolCallRequest, content: impl Into<String>) -> Self {
        Self {
            role: Role::Function,
            content: Some(content.into()),
            tool_call: None,
            tool_name: Some(call.name.clone()),
            tool_call_id: Some(call.id.clone()),
            timestamp: Utc::now(),
        }
    }

    /// Attach leading text to a tool-call message
    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Text content, empty when there is none
    pub fn content_str(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }

    pub const fn is_tool_call(&self) -> bool {
        self.tool_call.is_some()
    }

    pub fn is_function_result(&self) -> bool {
        self.role == Role::Function
    }

    /// Does this result message answer `call`?
    fn answers(&self, call: &ToolCallRequest) -> bool {
        self.tool_name.as_deref() == Some(call.name.as_str())
            && self.tool_call_id.as_deref() == Some(call.id.as_str())
    }
}

/// Check that appending `next` after `prev` keeps call/result adjacency.
fn check_adjacent(prev: Option<&Message>, next: &Message) -> Result<()> {
    let pending = prev.and_then(|m| m.tool_call.as_ref());

    if next.role == Role::Function {
        let call = pending.ok_or_else(|| {
            ChatError::TranscriptViolation(format!(
                "result for `{}` has no preceding call",
                next.tool_name.as_deref().unwrap_or("?")
            ))
        })?;
        if !next.answers(call) {
            return Err(ChatError::TranscriptViolation(format!(
                "result for `{}` does not answer pending call `{}` ({})",
                next.tool_name.as_deref().unwrap_or("?"),
                call.name,
                call.id
            )));
        }
        return Ok(());
    }

    if let Some(call) = pending {
        return Err(ChatError::TranscriptViolation(format!(
            "call `{}` ({}) is still waiting for its result",
            call.name, call.id
        )));
    }

    if next.tool_call.is_some() && next.role != Role::Assistant {
        return Err(ChatError::TranscriptViolation(format!(
            "only assistant messages may carry tool calls, got {}",
            next.role
        )));
    }

    Ok(())
}

/// Check a whole message sequence for call/result adjacency.
///
/// A trailing unanswered call is reported as a violation.
///
/// # Errors
///
/// Returns `TranscriptViolation` describing the first offending message.
pub fn validate_transcript(messages: &[Message]) -> Result<()> {
    let mut prev = None;
    for message in messages {
        check_adjacent(prev, message)?;
        prev = Some(message);
    }
    if let Some(call) = prev.and_then(|m| m.tool_call.as_ref()) {
        return Err(ChatError::TranscriptViolation(format!(
            "call `{}` ({}) was never answered",
            call.name, call.id
        )));
    }
    Ok(())
}

/// Ordered, append-only conversation history
#[derive(Clone, Debug, Default, Serialize)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system_prompt(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(prompt)],
        }
    }

    /// Append a message.
    ///
    /// # Errors
    ///
    /// Returns `TranscriptViolation` if the message would break call/result
    /// adjacency; the transcript is left unchanged.
    pub fn push(&mut self, message: Message) -> Result<()> {
        check_adjacent(self.messages.last(), &message)?;
        self.messages.push(message);
        Ok(())
    }

    /// Append a call and its result as one unit.
    ///
    /// # Errors
    ///
    /// Returns `TranscriptViolation` if either message is out of place; neither
    /// is appended in that case.
    pub fn push_exchange(&mut self, call: Message, result: Message) -> Result<()> {
        if !call.is_tool_call() {
            return Err(ChatError::TranscriptViolation(
                "exchange must start with a tool call".into(),
            ));
        }
        check_adjacent(self.messages.last(), &call)?;
        check_adjacent(Some(&call), &result)?;
        self.messages.push(call);
        self.messages.push(result);
        Ok(())
    }

    /// Append several messages, all or nothing.
    ///
    /// # Errors
    ///
    /// Returns `TranscriptViolation` for the first message out of place.
    pub fn push_all(&mut self, messages: Vec<Message>) -> Result<()> {
        let mut prev = self.messages.last();
        for message in &messages {
            check_adjacent(prev, message)?;
            prev = Some(message);
        }
        self.messages.extend(messages);
        Ok(())
    }

    /// The trailing call still waiting for a result, if any
    pub fn pending_call(&self) -> Option<&ToolCallRequest> {
        self.messages.last().and_then(|m| m.tool_call.as_ref())
    }

    /// Error result that would close the dangling call, without appending it
    pub fn closing_result(&self, reason: &str) -> Option<Message> {
        let call = self.pending_call()?;
        tracing::warn!(tool = %call.name, call_id = %call.id, "Closing unanswered tool call");
        Some(Message::function_result(call, format!("Error: {reason}")))
    }

    /// Complete a dangling call with an error result.
    ///
    /// Returns `true` if a call was closed.
    pub fn close_pending_call(&mut self, reason: &str) -> bool {
        let Some(closing) = self.closing_result(reason) else {
            return false;
        };
        self.messages.push(closing);
        true
    }

    /// Get all messages
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Owned copy of the transcript
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    /// Get the last message
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Content of the leading system message, if seeded with one
    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .first()
            .filter(|m| m.role == Role::System)
            .and_then(|m| m.content.as_deref())
    }

    /// Drop everything after the leading system messages.
    ///
    /// Only ever called explicitly; the transcript is never pruned on its own.
    pub fn reset(&mut self) {
        let keep = self
            .messages
            .iter()
            .take_while(|m| m.role == Role::System)
            .count();
        self.messages.truncate(keep);
    }

    /// Number of messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str) -> ToolCallRequest {
        ToolCallRequest::new(name, "{}")
    }

    #[test]
    fn test_message_creation() {
        let msg = Message::user("Hello");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content_str(), "Hello");
        assert!(!msg.is_tool_call());
    }

    #[test]
    fn test_conversation() {
        let mut conv = Conversation::with_system_prompt("You are helpful.");
        conv.push(Message::user("Hi")).unwrap();
        conv.push(Message::assistant("Hello!")).unwrap();

        assert_eq!(conv.len(), 3);
        assert_eq!(conv.last().unwrap().role, Role::Assistant);
        assert_eq!(conv.system_prompt(), Some("You are helpful."));
    }

    #[test]
    fn test_result_requires_preceding_call() {
        let mut conv = Conversation::new();
        conv.push(Message::user("Hi")).unwrap();

        let orphan = Message::function_result(&call("what_time"), "12:00");
        let err = conv.push(orphan).unwrap_err();
        assert!(matches!(err, ChatError::TranscriptViolation(_)));
        assert_eq!(conv.len(), 1);
    }

    #[test]
    fn test_result_must_match_call_name() {
        let mut conv = Conversation::new();
        let requested = call("what_time");
        conv.push(Message::tool_call(requested.clone())).unwrap();

        let mut wrong = Message::function_result(&requested, "12:00");
        wrong.tool_name = Some("translate_text".into());
        assert!(conv.push(wrong).is_err());

        conv.push(Message::function_result(&requested, "12:00"))
            .unwrap();
        assert_eq!(conv.len(), 2);
    }

    #[test]
    fn test_pending_call_blocks_other_messages() {
        let mut conv = Conversation::new();
        conv.push(Message::tool_call(call("what_time"))).unwrap();

        assert!(conv.push(Message::user("are you there?")).is_err());
        assert!(conv.push(Message::tool_call(call("what_time"))).is_err());
        assert!(conv.pending_call().is_some());
    }

    #[test]
    fn test_close_pending_call() {
        let mut conv = Conversation::new();
        conv.push(Message::tool_call(call("what_time"))).unwrap();

        assert!(conv.close_pending_call("cancelled"));
        assert!(conv.pending_call().is_none());
        assert_eq!(conv.last().unwrap().content_str(), "Error: cancelled");
        assert!(validate_transcript(conv.messages()).is_ok());
        assert!(!conv.close_pending_call("again"));
    }

    #[test]
    fn test_push_exchange_is_atomic() {
        let mut conv = Conversation::new();
        let first = call("what_time");
        let second = call("what_time");

        // Result answers a different call: nothing is appended.
        let err = conv.push_exchange(
            Message::tool_call(first.clone()),
            Message::function_result(&second, "x"),
        );
        assert!(err.is_err());
        assert!(conv.is_empty());

        conv.push_exchange(
            Message::tool_call(first.clone()),
            Message::function_result(&first, "x"),
        )
        .unwrap();
        assert_eq!(conv.len(), 2);
    }

    #[test]
    fn test_push_all_is_all_or_nothing() {
        let mut conv = Conversation::new();
        let orphan = Message::function_result(&call("what_time"), "noon");

        assert!(conv.push_all(vec![Message::user("Hi"), orphan]).is_err());
        assert!(conv.is_empty());

        conv.push_all(vec![Message::user("Hi"), Message::user("Still there?")])
            .unwrap();
        assert_eq!(conv.len(), 2);
    }

    #[test]
    fn test_validate_transcript_flags_trailing_call() {
        let messages = vec![Message::user("Hi"), Message::tool_call(call("what_time"))];
        assert!(validate_transcript(&messages).is_err());
    }

    #[test]
    fn test_reset_keeps_system_prompt() {
        let mut conv = Conversation::with_system_prompt("Be brief.");
        conv.push(Message::user("Hi")).unwrap();
        conv.push(Message::assistant("Hello")).unwrap();

        conv.reset();
        assert_eq!(conv.len(), 1);
        assert_eq!(conv.system_prompt(), Some("Be brief."));
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&Role::Function).unwrap();
        assert_eq!(json, "\"function\"");
    }
}
