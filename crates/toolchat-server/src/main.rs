//! toolchat HTTP Server
//!
//! Axum-based server exposing tool-calling chat sessions over a REST API.

mod handlers;
mod state;

use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use toolchat_core::{LlmProvider, ToolRegistry, builtins::register_builtins};
use toolchat_runtime::{OllamaProvider, OpenAiProvider};

use crate::handlers::{
    create_session, delete_session, get_transcript, health_check, list_models, list_tools,
    resume_session, send_message,
};
use crate::state::{AppState, ProviderKind, ServerConfig, SessionTable};

fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health & info
        .route("/health", get(health_check))
        .route("/api/models", get(list_models))
        .route("/api/tools", get(list_tools))
        // Sessions
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/{id}", delete(delete_session))
        .route("/api/sessions/{id}/messages", post(send_message))
        .route("/api/sessions/{id}/resume", post(resume_session))
        .route("/api/sessions/{id}/transcript", get(get_transcript))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn build_provider(config: &ServerConfig) -> anyhow::Result<Arc<dyn LlmProvider>> {
    Ok(match config.provider {
        ProviderKind::Ollama => Arc::new(OllamaProvider::from_env()?),
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::from_env()?),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env()?;

    // Initialize LLM provider
    let provider = build_provider(&config)?;

    match provider.health_check().await {
        Ok(true) => {
            tracing::info!("✓ Connected to {:?} provider", config.provider);
            if let Ok(models) = provider.list_models().await {
                for model in models {
                    tracing::info!("  Model: {}", model.id);
                }
            }
        }
        Ok(false) | Err(_) => {
            tracing::warn!("⚠ {:?} provider not reachable - turns will fail", config.provider);
        }
    }

    // Initialize tools
    let tools = ToolRegistry::new();
    register_builtins(&tools)?;

    tracing::info!("Registered {} tools:", tools.len());
    for name in tools.names() {
        tracing::info!("  • {}", name);
    }

    let state = AppState {
        provider,
        tools: Arc::new(tools),
        sessions: SessionTable::default(),
        defaults: config.session_defaults(),
    };

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 toolchat server running on http://{}", config.bind_addr);
    tracing::info!("   model: {}", config.model);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("Endpoints:");
    tracing::info!("  GET    /health                        - Health check");
    tracing::info!("  GET    /api/models                    - List available models");
    tracing::info!("  GET    /api/tools                     - Tool catalogue");
    tracing::info!("  POST   /api/sessions                  - Open a session");
    tracing::info!("  POST   /api/sessions/{{id}}/messages    - Send a message");
    tracing::info!("  POST   /api/sessions/{{id}}/resume      - Retry after a failure");
    tracing::info!("  GET    /api/sessions/{{id}}/transcript  - Message history");
    tracing::info!("  DELETE /api/sessions/{{id}}             - Close a session");

    axum::serve(listener, router(state)).await?;

    Ok(())
}
