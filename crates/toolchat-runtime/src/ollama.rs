//! Ollama LLM Provider
//!
//! Chat requests go to `/api/chat` with native tool calling. Model listing
//! and health checks go through `ollama-rs`.

use std::time::Duration;

use async_trait::async_trait;
use ollama_rs::Ollama;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use toolchat_core::{
    error::{ChatError, Result},
    message::{Message, Role, ToolCallRequest},
    provider::{
        Completion, FinishReason, GenerationOptions, LlmProvider, ModelInfo, ProviderInfo,
        TokenUsage,
    },
    tool::ToolDescriptor,
};

use crate::http;

/// Ollama provider configuration
#[derive(Clone, Debug)]
pub struct OllamaConfig {
    /// Ollama host URL
    pub host: String,

    /// Ollama port
    pub port: u16,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost".into(),
            port: 11434,
            timeout_secs: 120,
        }
    }
}

impl OllamaConfig {
    pub fn from_env() -> Self {
        let host = std::env::var("OLLAMA_HOST").unwrap_or_else(|_| "http://localhost".into());
        let port = std::env::var("OLLAMA_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(11434);

        Self {
            host,
            port,
            ..Default::default()
        }
    }

    pub fn base_url(&self) -> String {
        format!("{}:{}", self.host.trim_end_matches('/'), self.port)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    stream: bool,
    options: WireOptions<'a>,
}

#[derive(Serialize)]
struct WireOptions<'a> {
    temperature: f32,
    top_p: f32,
    num_predict: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
}

#[derive(Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: &'a ToolDescriptor,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    function: WireFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: String,
    message: WireMessage,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

/// Ollama LLM provider
pub struct OllamaProvider {
    client: Ollama,
    http: reqwest::Client,
    config: OllamaConfig,
}

impl OllamaProvider {
    /// Create a new Ollama provider with custom host/port
    ///
    /// # Errors
    ///
    /// Returns `Config` if the HTTP client can't be built.
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self> {
        Self::from_config(OllamaConfig {
            host: host.into(),
            port,
            ..Default::default()
        })
    }

    /// Create from configuration
    ///
    /// # Errors
    ///
    /// Returns `Config` if the HTTP client can't be built.
    pub fn from_config(config: OllamaConfig) -> Result<Self> {
        Ok(Self {
            client: Ollama::new(&config.host, config.port),
            http: http::client(Duration::from_secs(config.timeout_secs))?,
            config,
        })
    }

    /// Create from environment variables
    ///
    /// # Errors
    ///
    /// Returns `Config` if the HTTP client can't be built.
    pub fn from_env() -> Result<Self> {
        Self::from_config(OllamaConfig::from_env())
    }

    pub const fn config(&self) -> &OllamaConfig {
        &self.config
    }

    /// Convert transcript messages to Ollama format
    fn convert_messages(messages: &[Message]) -> Vec<WireMessage> {
        messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::Function => "tool",
                };
                let tool_calls = m
                    .tool_call
                    .iter()
                    .map(|call| WireToolCall {
                        function: WireFunction {
                            name: call.name.clone(),
                            arguments: serde_json::from_str(&call.arguments)
                                .unwrap_or_else(|_| Value::String(call.arguments.clone())),
                        },
                    })
                    .collect();

                WireMessage {
                    role: role.into(),
                    content: m.content_str().to_string(),
                    tool_calls,
                    tool_name: m.tool_name.clone(),
                }
            })
            .collect()
    }

    /// Convert an Ollama response to a completion
    fn convert_completion(response: ChatResponse, model: &str) -> Completion {
        let tool_calls: Vec<ToolCallRequest> = response
            .message
            .tool_calls
            .into_iter()
            .map(|call| {
                let arguments = match call.function.arguments {
                    Value::String(raw) => raw,
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                ToolCallRequest::new(call.function.name, arguments)
            })
            .collect();

        let finish_reason = if tool_calls.is_empty() {
            match response.done_reason.as_deref() {
                Some("length") => FinishReason::Length,
                _ => FinishReason::Stop,
            }
        } else {
            FinishReason::ToolUse
        };

        let usage = match (response.prompt_eval_count, response.eval_count) {
            (None, None) => None,
            (prompt, eval) => {
                let prompt = prompt.unwrap_or(0);
                let eval = eval.unwrap_or(0);
                Some(TokenUsage {
                    prompt_tokens: prompt,
                    completion_tokens: eval,
                    total_tokens: prompt + eval,
                })
            }
        };

        let content = Some(response.message.content).filter(|c| !c.is_empty());

        Completion {
            content,
            tool_calls,
            model: if response.model.is_empty() {
                model.to_string()
            } else {
                response.model
            },
            usage,
            finish_reason: Some(finish_reason),
        }
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    async fn info(&self) -> Result<ProviderInfo> {
        let models = self.list_models().await.unwrap_or_default();

        Ok(ProviderInfo {
            name: "Ollama".into(),
            version: None,
            models,
            supports_tools: true,
        })
    }

    async fn health_check(&self) -> Result<bool> {
        match self.client.list_local_models().await {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::warn!("Ollama health check failed: {}", e);
                Ok(false)
            }
        }
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
        options: &GenerationOptions,
    ) -> Result<Completion> {
        let request = ChatRequest {
            model: &options.model,
            messages: Self::convert_messages(messages),
            tools: tools
                .iter()
                .map(|function| WireTool {
                    kind: "function",
                    function,
                })
                .collect(),
            stream: false,
            options: WireOptions {
                temperature: options.temperature,
                top_p: options.top_p,
                num_predict: options.max_tokens,
                stop: Some(options.stop_sequences.as_slice()).filter(|s| !s.is_empty()),
            },
        };

        tracing::debug!(
            model = %options.model,
            messages = messages.len(),
            tools = tools.len(),
            "Sending chat request to Ollama"
        );

        let response = self
            .http
            .post(format!("{}/api/chat", self.config.base_url()))
            .json(&request)
            .send()
            .await
            .map_err(|e| http::request_error(&e))?;

        let response: ChatResponse = http::read_json(response).await?;
        Ok(Self::convert_completion(response, &options.model))
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let models = self
            .client
            .list_local_models()
            .await
            .map_err(|e| ChatError::ProviderUnavailable(e.to_string()))?;

        Ok(models
            .into_iter()
            .map(|m| ModelInfo {
                id: m.name.clone(),
                name: m.name,
                context_length: None,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use toolchat_core::schema::{ArgumentSchema, ParameterSchema};

    #[test]
    fn test_config_defaults() {
        let config = OllamaConfig::default();
        assert_eq!(config.host, "http://localhost");
        assert_eq!(config.port, 11434);
        assert_eq!(config.base_url(), "http://localhost:11434");
    }

    #[test]
    fn test_message_conversion() {
        let call = ToolCallRequest::new("what_time", r#"{"tz": "Asia/Tokyo"}"#);
        let messages = vec![
            Message::system("You are helpful."),
            Message::user("What time is it in Osaka?"),
            Message::tool_call(call.clone()),
            Message::function_result(&call, "2024-05-01T21:00:00+09:00"),
        ];

        let converted = OllamaProvider::convert_messages(&messages);
        assert_eq!(converted.len(), 4);
        assert_eq!(converted[2].role, "assistant");
        assert_eq!(converted[2].tool_calls[0].function.arguments, json!({"tz": "Asia/Tokyo"}));
        assert_eq!(converted[3].role, "tool");
        assert_eq!(converted[3].tool_name.as_deref(), Some("what_time"));
    }

    #[test]
    fn test_request_omits_empty_tools() {
        let options = GenerationOptions::default();
        let request = ChatRequest {
            model: &options.model,
            messages: vec![],
            tools: vec![],
            stream: false,
            options: WireOptions {
                temperature: 0.0,
                top_p: 0.9,
                num_predict: 16,
                stop: None,
            },
        };
        let body = serde_json::to_value(&request).unwrap();
        assert!(body.get("tools").is_none());
        assert_eq!(body["stream"], json!(false));

        let descriptor = ToolDescriptor {
            name: "what_time".into(),
            description: "Current time".into(),
            parameters: ArgumentSchema::builder()
                .param(ParameterSchema::string("tz").optional())
                .build()
                .unwrap()
                .to_json_schema(),
        };
        let request = ChatRequest {
            tools: vec![WireTool {
                kind: "function",
                function: &descriptor,
            }],
            ..request
        };
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["tools"][0]["type"], json!("function"));
        assert_eq!(body["tools"][0]["function"]["name"], json!("what_time"));
    }

    #[test]
    fn test_tool_call_response() {
        let response: ChatResponse = serde_json::from_value(json!({
            "model": "llama3.2",
            "message": {
                "role": "assistant",
                "content": "",
                "tool_calls": [{"function": {"name": "what_time", "arguments": {"tz": "UTC"}}}]
            },
            "done": true,
            "done_reason": "stop"
        }))
        .unwrap();

        let completion = OllamaProvider::convert_completion(response, "llama3.2");
        assert!(completion.content.is_none());
        assert_eq!(completion.finish_reason, Some(FinishReason::ToolUse));
        let call = &completion.tool_calls[0];
        assert_eq!(call.name, "what_time");
        assert_eq!(serde_json::from_str::<Value>(&call.arguments).unwrap(), json!({"tz": "UTC"}));
        assert!(!call.id.is_empty());
    }

    #[test]
    fn test_text_response() {
        let response: ChatResponse = serde_json::from_value(json!({
            "model": "llama3.2",
            "message": {"role": "assistant", "content": "It is noon."},
            "done_reason": "length",
            "prompt_eval_count": 10,
            "eval_count": 5
        }))
        .unwrap();

        let completion = OllamaProvider::convert_completion(response, "llama3.2");
        assert_eq!(completion.content.as_deref(), Some("It is noon."));
        assert_eq!(completion.finish_reason, Some(FinishReason::Length));
        assert_eq!(completion.usage.unwrap().total_tokens, 15);
    }
}
