//! Error Types

use thiserror::Error;

/// Result type alias for toolchat operations
pub type Result<T> = std::result::Result<T, ChatError>;

/// Toolchat error types
#[derive(Error, Debug)]
pub enum ChatError {
    /// A tool with this name is already registered
    #[error("Tool already registered: {0}")]
    DuplicateTool(String),

    /// The model asked for a tool the registry doesn't know
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Argument payload could not be parsed as a JSON object
    #[error("Malformed arguments: {0}")]
    MalformedPayload(String),

    /// Parsed arguments don't match the tool's schema
    #[error("Invalid argument `{field}`: expected {expected}, {problem}")]
    SchemaViolation {
        field: String,
        expected: String,
        problem: String,
    },

    /// The tool callable itself failed
    #[error("Tool `{tool}` failed: {message}")]
    ToolExecution { tool: String, message: String },

    /// Model endpoint request failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// Model endpoint unavailable or not responding
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Rate limited by the model endpoint
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Authentication with the model endpoint failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Argument schema rejected by the builder
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    /// Append would break call/result adjacency
    #[error("Transcript violation: {0}")]
    TranscriptViolation(String),

    /// Another turn is in flight on this conversation
    #[error("Session is busy with another turn")]
    SessionBusy,

    /// The model kept requesting tools past the configured limit
    #[error("Maximum tool rounds ({0}) reached")]
    MaxToolRounds(usize),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl ChatError {
    /// Build a schema violation for `field`
    pub fn violation(
        field: impl Into<String>,
        expected: impl Into<String>,
        problem: impl Into<String>,
    ) -> Self {
        Self::SchemaViolation {
            field: field.into(),
            expected: expected.into(),
            problem: problem.into(),
        }
    }

    /// Check if error is retryable
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ProviderUnavailable(_) | Self::RateLimited(_) | Self::Io(_)
        )
    }

    /// Errors that are handed back to the model as function-result content
    /// instead of aborting the turn.
    pub const fn is_conversational(&self) -> bool {
        matches!(
            self,
            Self::UnknownTool(_)
                | Self::MalformedPayload(_)
                | Self::SchemaViolation { .. }
                | Self::ToolExecution { .. }
        )
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            Self::Transport(msg) => format!("The AI service encountered an error: {msg}"),
            Self::ProviderUnavailable(_) => {
                "The AI service is currently unavailable. Please try again.".into()
            }
            Self::RateLimited(_) => "You've made too many requests. Please wait a moment.".into(),
            Self::Auth(_) => "Authentication failed. Please check your credentials.".into(),
            Self::SessionBusy => {
                "This conversation is still answering a previous message.".into()
            }
            Self::MaxToolRounds(_) => {
                "The request took too many tool calls to process. Please try a simpler query."
                    .into()
            }
            Self::DuplicateTool(_)
            | Self::UnknownTool(_)
            | Self::MalformedPayload(_)
            | Self::SchemaViolation { .. }
            | Self::ToolExecution { .. }
            | Self::InvalidSchema(_)
            | Self::TranscriptViolation(_) => self.to_string(),
            _ => "An unexpected error occurred.".into(),
        }
    }
}

impl From<anyhow::Error> for ChatError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
