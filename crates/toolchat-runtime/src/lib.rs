//! # toolchat-runtime
//!
//! Model endpoint providers for toolchat.
//!
//! ## Providers
//!
//! - **Ollama** (default): local inference with native tool calling
//! - **OpenAI** (`openai` feature): any OpenAI-compatible `/chat/completions` endpoint
//!
//! ## Usage
//!
//! ```rust,ignore
//! use toolchat_runtime::ollama::OllamaProvider;
//!
//! let provider = OllamaProvider::from_env()?;
//! let session = Session::builder()
//!     .provider(Arc::new(provider))
//!     .registry(registry)
//!     .build()?;
//! ```

mod http;

#[cfg(feature = "ollama")]
pub mod ollama;

#[cfg(feature = "openai")]
pub mod openai;

#[cfg(feature = "ollama")]
pub use ollama::{OllamaConfig, OllamaProvider};

#[cfg(feature = "openai")]
pub use openai::{OpenAiConfig, OpenAiProvider};

// Re-export core types for convenience
pub use toolchat_core::{
    ChatError, LlmProvider, Message, Result, Role, Session, SessionHandle, ToolRegistry,
};
