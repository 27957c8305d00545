//! Tool Dispatch
//!
//! Runs one tool call and always produces a [`ToolCallResult`]. Unknown
//! tools, bad arguments, handler errors, panics and timeouts all come back as
//! a `Failure` the model can read; none of them escape as an `Err`.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Serialize};

use crate::error::ChatError;
use crate::message::ToolCallRequest;
use crate::tool::{ToolDefinition, ToolRegistry};
use crate::validate::{ValidatedArgs, validate};

/// Category of a failed call
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UnknownTool,
    MalformedPayload,
    SchemaViolation,
    ToolExecution,
    Timeout,
}

/// Why a call failed
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl ToolFailure {
    /// Map a conversational error onto a failure. Other errors have no
    /// place in a function result and yield `None`.
    pub fn from_error(err: &ChatError) -> Option<Self> {
        if !err.is_conversational() {
            return None;
        }
        let kind = match err {
            ChatError::UnknownTool(_) => FailureKind::UnknownTool,
            ChatError::MalformedPayload(_) => FailureKind::MalformedPayload,
            ChatError::SchemaViolation { .. } => FailureKind::SchemaViolation,
            _ => FailureKind::ToolExecution,
        };
        Some(Self {
            kind,
            message: err.to_string(),
        })
    }
}

/// Outcome of one dispatched call
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolCallResult {
    Success { value: serde_json::Value },
    Failure(ToolFailure),
}

impl ToolCallResult {
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub const fn failure(&self) -> Option<&ToolFailure> {
        match self {
            Self::Failure(f) => Some(f),
            Self::Success { .. } => None,
        }
    }

    /// Text placed in the function-result message
    pub fn to_content(&self) -> String {
        match self {
            Self::Success {
                value: serde_json::Value::String(s),
            } => s.clone(),
            Self::Success { value } => value.to_string(),
            Self::Failure(f) => format!("Error: {}", f.message),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "tool panicked".into())
}

/// Executes validated calls against registered handlers
#[derive(Clone, Debug, Default)]
pub struct Dispatcher {
    timeout: Option<Duration>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail calls that run longer than `timeout`
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Invoke `tool` with already-validated arguments
    pub async fn dispatch(&self, tool: &ToolDefinition, args: ValidatedArgs) -> ToolCallResult {
        let call = AssertUnwindSafe(tool.handler().call(args)).catch_unwind();

        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::warn!(tool = %tool.name(), ?limit, "Tool timed out");
                    return ToolCallResult::Failure(ToolFailure {
                        kind: FailureKind::Timeout,
                        message: format!("Tool `{}` timed out after {limit:?}", tool.name()),
                    });
                }
            },
            None => call.await,
        };

        let message = match outcome {
            Ok(Ok(value)) => return ToolCallResult::Success { value },
            Ok(Err(e)) => format!("{e:#}"),
            Err(panic) => panic_message(panic.as_ref()),
        };

        let err = ChatError::ToolExecution {
            tool: tool.name().to_string(),
            message,
        };
        tracing::warn!(tool = %tool.name(), error = %err, "Tool failed");
        ToolCallResult::Failure(ToolFailure {
            kind: FailureKind::ToolExecution,
            message: err.to_string(),
        })
    }

    /// Resolve, validate and dispatch a model-issued call
    pub async fn execute(
        &self,
        registry: &ToolRegistry,
        request: &ToolCallRequest,
    ) -> ToolCallResult {
        tracing::debug!(tool = %request.name, call_id = %request.id, "Executing tool");

        let prepared = registry
            .resolve(&request.name)
            .and_then(|tool| validate(tool.schema(), &request.arguments).map(|args| (tool, args)));

        match prepared {
            Ok((tool, args)) => self.dispatch(&tool, args).await,
            Err(err) => {
                tracing::warn!(tool = %request.name, error = %err, "Rejected tool call");
                ToolFailure::from_error(&err).map_or_else(
                    || {
                        ToolCallResult::Failure(ToolFailure {
                            kind: FailureKind::ToolExecution,
                            message: err.to_string(),
                        })
                    },
                    ToolCallResult::Failure,
                )
            }
        }
    }
}
