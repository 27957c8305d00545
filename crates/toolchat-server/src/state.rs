//! Application State

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use toolchat_core::{
    LlmProvider, SessionConfig, SessionHandle, SessionId, ToolRegistry,
    provider::GenerationOptions,
};

/// Which model endpoint to talk to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderKind {
    Ollama,
    OpenAi,
}

impl std::str::FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAi),
            other => anyhow::bail!("unknown provider `{other}` (expected ollama or openai)"),
        }
    }
}

/// Server configuration from the environment
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub provider: ProviderKind,
    pub model: String,
    pub system_prompt: Option<String>,
    pub max_tool_rounds: usize,
    pub tool_timeout: Option<Duration>,
}

impl ServerConfig {
    /// # Errors
    ///
    /// Fails on an unknown provider name or a non-numeric limit.
    pub fn from_env() -> anyhow::Result<Self> {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

        let provider = var("TOOLCHAT_PROVIDER")
            .map_or(Ok(ProviderKind::Ollama), |p| p.parse())?;
        let default_model = match provider {
            ProviderKind::Ollama => GenerationOptions::default().model,
            ProviderKind::OpenAi => "gpt-4o-mini".into(),
        };
        let max_tool_rounds = var("TOOLCHAT_MAX_TOOL_ROUNDS")
            .map(|v| v.parse())
            .transpose()?
            .unwrap_or(10);
        let tool_timeout = var("TOOLCHAT_TOOL_TIMEOUT_SECS")
            .map(|v| v.parse().map(Duration::from_secs))
            .transpose()?;

        Ok(Self {
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".into()),
            provider,
            model: var("TOOLCHAT_MODEL").unwrap_or(default_model),
            system_prompt: var("TOOLCHAT_SYSTEM_PROMPT"),
            max_tool_rounds,
            tool_timeout,
        })
    }

    /// Defaults applied to every new session
    pub fn session_defaults(&self) -> SessionConfig {
        SessionConfig {
            system_prompt: self.system_prompt.clone(),
            generation: GenerationOptions {
                model: self.model.clone(),
                ..Default::default()
            },
            max_tool_rounds: self.max_tool_rounds,
            tool_timeout: self.tool_timeout,
            ..Default::default()
        }
    }
}

/// Live sessions, in process only
#[derive(Clone, Default)]
pub struct SessionTable {
    sessions: Arc<RwLock<HashMap<SessionId, SessionHandle>>>,
}

impl SessionTable {
    pub fn insert(&self, handle: SessionHandle) {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle.id().clone(), handle);
    }

    pub fn get(&self, id: &SessionId) -> Option<SessionHandle> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn remove(&self, id: &SessionId) -> Option<SessionHandle> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    pub fn count(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// LLM provider (Ollama, OpenAI-compatible)
    pub provider: Arc<dyn LlmProvider>,

    /// Tool registry shared by every session
    pub tools: Arc<ToolRegistry>,

    /// Open conversations
    pub sessions: SessionTable,

    /// Template for new sessions
    pub defaults: SessionConfig,
}
