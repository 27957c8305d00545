//! HTTP Handlers

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};

use toolchat_core::{
    ChatError, Message, Session, SessionHandle, SessionId, ToolInvocation, TurnOutcome,
    provider::ModelInfo, tool::ToolDescriptor,
};

use crate::state::AppState;

type ApiError = (StatusCode, Json<ErrorResponse>);

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub provider_connected: bool,
    pub tools: usize,
    pub sessions: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub model: String,
    pub messages: usize,
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct TurnResponse {
    pub session_id: String,
    pub reply: String,
    pub tool_calls: Vec<ToolInvocation>,
    pub rounds: usize,
}

#[derive(Debug, Serialize)]
pub struct TranscriptResponse {
    pub session_id: String,
    pub messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

fn api_error(status: StatusCode, error: impl Into<String>, code: &str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.into(),
        }),
    )
}

fn chat_error(e: &ChatError) -> ApiError {
    let (status, code) = match e {
        ChatError::SessionBusy => (StatusCode::CONFLICT, "SESSION_BUSY"),
        ChatError::Transport(_)
        | ChatError::ProviderUnavailable(_)
        | ChatError::RateLimited(_)
        | ChatError::Auth(_) => (StatusCode::BAD_GATEWAY, "PROVIDER_ERROR"),
        ChatError::MaxToolRounds(_) => (StatusCode::UNPROCESSABLE_ENTITY, "MAX_TOOL_ROUNDS"),
        ChatError::TranscriptViolation(_) => (StatusCode::BAD_REQUEST, "TRANSCRIPT_VIOLATION"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "SESSION_ERROR"),
    };
    api_error(status, e.user_message(), code)
}

fn lookup(state: &AppState, id: &str) -> Result<SessionHandle, ApiError> {
    state
        .sessions
        .get(&SessionId::from_string(id))
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("No session `{id}`"), "NOT_FOUND"))
}

fn turn_response(handle: &SessionHandle, outcome: TurnOutcome) -> Json<TurnResponse> {
    Json(TurnResponse {
        session_id: handle.id().to_string(),
        reply: outcome.reply,
        tool_calls: outcome.invocations,
        rounds: outcome.rounds,
    })
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let provider_connected = state.provider.health_check().await.unwrap_or(false);

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        provider_connected,
        tools: state.tools.len(),
        sessions: state.sessions.count(),
    })
}

/// Models offered by the endpoint
pub async fn list_models(
    State(state): State<AppState>,
) -> Result<Json<Vec<ModelInfo>>, ApiError> {
    state.provider.list_models().await.map(Json).map_err(|e| {
        tracing::warn!("Model listing failed: {}", e);
        chat_error(&e)
    })
}

/// Tool catalogue as advertised to the model
pub async fn list_tools(State(state): State<AppState>) -> Json<Vec<ToolDescriptor>> {
    Json(state.tools.describe_all())
}

/// Open a new conversation
pub async fn create_session(
    State(state): State<AppState>,
    Json(payload): Json<CreateSessionRequest>,
) -> (StatusCode, Json<SessionResponse>) {
    let mut config = state.defaults.clone();
    if let Some(model) = payload.model {
        config.generation.model = model;
    }
    if payload.system_prompt.is_some() {
        config.system_prompt = payload.system_prompt;
    }

    let session = Session::new(state.provider.clone(), state.tools.clone(), config);
    let response = SessionResponse {
        session_id: session.id().to_string(),
        model: session.config().generation.model.clone(),
        messages: session.message_count(),
    };

    tracing::info!(session = %response.session_id, model = %response.model, "Session created");
    state.sessions.insert(SessionHandle::new(session));

    (StatusCode::CREATED, Json(response))
}

/// Run one turn
pub async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<MessageRequest>,
) -> Result<Json<TurnResponse>, ApiError> {
    if payload.message.trim().is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "Message must not be empty",
            "EMPTY_MESSAGE",
        ));
    }

    let handle = lookup(&state, &id)?;
    let outcome = handle.submit(payload.message).await.map_err(|e| {
        tracing::error!(session = %id, "Turn failed: {}", e);
        chat_error(&e)
    })?;

    Ok(turn_response(&handle, outcome))
}

/// Re-query the model after a failed turn
pub async fn resume_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TurnResponse>, ApiError> {
    let handle = lookup(&state, &id)?;
    let outcome = handle.resume().await.map_err(|e| {
        tracing::error!(session = %id, "Resume failed: {}", e);
        chat_error(&e)
    })?;

    Ok(turn_response(&handle, outcome))
}

/// Full message history
pub async fn get_transcript(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TranscriptResponse>, ApiError> {
    let handle = lookup(&state, &id)?;

    Ok(Json(TranscriptResponse {
        session_id: handle.id().to_string(),
        messages: handle.snapshot().await,
    }))
}

/// Drop a conversation
pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .sessions
        .remove(&SessionId::from_string(id.as_str()))
        .map(|_| StatusCode::NO_CONTENT)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("No session `{id}`"), "NOT_FOUND"))
}
