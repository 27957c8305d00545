//! # toolchat-core
//!
//! Conversation engine that lets a chat model call registered tools.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Session                             │
//! │  ┌──────────────┐  ┌──────────────┐  ┌────────────────────┐  │
//! │  │ Conversation │  │  Dispatcher  │  │    LlmProvider     │  │
//! │  │  (transcript)│──│ + Validator  │──│    (Strategy)      │  │
//! │  └──────────────┘  └──────┬───────┘  └────────────────────┘  │
//! │                           │                                  │
//! │                    ┌──────┴───────┐                          │
//! │                    │ ToolRegistry │ (shared across sessions) │
//! │                    └──────────────┘                          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The model only ever sees the transcript and the tool catalogue; every call
//! it makes is validated against the tool's declared schema before the
//! handler runs, and the outcome is written back as a function result.

pub mod builtins;
pub mod dispatch;
pub mod error;
pub mod message;
pub mod mock;
pub mod provider;
pub mod schema;
pub mod session;
pub mod tool;
pub mod validate;

pub use dispatch::{Dispatcher, FailureKind, ToolCallResult, ToolFailure};
pub use error::{ChatError, Result};
pub use message::{Conversation, Message, Role, ToolCallRequest, validate_transcript};
pub use provider::{Completion, GenerationOptions, LlmProvider};
pub use schema::{ArgumentSchema, ParamType, ParameterSchema, UnknownFieldPolicy};
pub use session::{
    RetryPolicy, Session, SessionConfig, SessionHandle, SessionId, ToolInvocation, TurnOutcome,
    TurnState,
};
pub use tool::{ToolDefinition, ToolDescriptor, ToolHandler, ToolRegistry, handler_fn, sync_handler};
pub use validate::{ArgValue, ParsedPayload, ValidatedArgs, validate};
