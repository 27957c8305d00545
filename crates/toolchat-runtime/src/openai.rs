//! OpenAI-compatible Provider
//!
//! Talks to any `/chat/completions` endpoint that follows the OpenAI function
//! calling format. Call ids from the model are kept so results can reference
//! them through `tool_call_id`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
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

/// OpenAI provider configuration
#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    /// Bearer token; local servers often need none
    pub api_key: Option<String>,

    /// API root, e.g. `https://api.openai.com/v1`
    pub base_url: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".into(),
            timeout_secs: 120,
        }
    }
}

impl OpenAiConfig {
    pub fn from_env() -> Self {
        let api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty());
        let base_url = std::env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".into());

        Self {
            api_key,
            base_url,
            ..Default::default()
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
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
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunction,
}

fn function_kind() -> String {
    "function".into()
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: String,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

/// OpenAI-compatible LLM provider
pub struct OpenAiProvider {
    http: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiProvider {
    /// Create from configuration
    ///
    /// # Errors
    ///
    /// Returns `Config` if the HTTP client can't be built.
    pub fn from_config(config: OpenAiConfig) -> Result<Self> {
        Ok(Self {
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
        Self::from_config(OpenAiConfig::from_env())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.config.base_url.trim_end_matches('/'))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

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
                        id: call.id.clone(),
                        kind: function_kind(),
                        function: WireFunction {
                            name: call.name.clone(),
                            arguments: call.arguments.clone(),
                        },
                    })
                    .collect();

                WireMessage {
                    role: role.into(),
                    content: m.content.clone(),
                    tool_calls,
                    tool_call_id: m.tool_call_id.clone(),
                }
            })
            .collect()
    }

    fn convert_completion(response: ChatResponse, model: &str) -> Result<Completion> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ChatError::Transport("response had no choices".into()))?;

        let tool_calls: Vec<ToolCallRequest> = choice
            .message
            .tool_calls
            .into_iter()
            .map(|call| {
                ToolCallRequest::new(call.function.name, call.function.arguments).with_id(call.id)
            })
            .collect();

        let finish_reason = match choice.finish_reason.as_deref() {
            Some("length") => Some(FinishReason::Length),
            Some("content_filter") => Some(FinishReason::ContentFilter),
            Some("tool_calls" | "function_call") => Some(FinishReason::ToolUse),
            Some("stop") => Some(FinishReason::Stop),
            _ if !tool_calls.is_empty() => Some(FinishReason::ToolUse),
            _ => None,
        };

        Ok(Completion {
            content: choice.message.content.filter(|c| !c.is_empty()),
            tool_calls,
            model: if response.model.is_empty() {
                model.to_string()
            } else {
                response.model
            },
            usage: response.usage,
            finish_reason,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn info(&self) -> Result<ProviderInfo> {
        let models = self.list_models().await.unwrap_or_default();

        Ok(ProviderInfo {
            name: "OpenAI".into(),
            version: None,
            models,
            supports_tools: true,
        })
    }

    async fn health_check(&self) -> Result<bool> {
        match self.list_models().await {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::warn!("OpenAI health check failed: {}", e);
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
            temperature: options.temperature,
            top_p: options.top_p,
            max_tokens: options.max_tokens,
            stop: Some(options.stop_sequences.as_slice()).filter(|s| !s.is_empty()),
        };

        tracing::debug!(
            model = %options.model,
            messages = messages.len(),
            tools = tools.len(),
            "Sending chat completion request"
        );

        let response = self
            .authorize(self.http.post(self.url("chat/completions")))
            .json(&request)
            .send()
            .await
            .map_err(|e| http::request_error(&e))?;

        let response: ChatResponse = http::read_json(response).await?;
        Self::convert_completion(response, &options.model)
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let response = self
            .authorize(self.http.get(self.url("models")))
            .send()
            .await
            .map_err(|e| http::request_error(&e))?;

        let list: ModelList = http::read_json(response).await?;
        Ok(list
            .data
            .into_iter()
            .map(|m| ModelInfo {
                name: m.id.clone(),
                id: m.id,
                context_length: None,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_conversion_keeps_call_ids() {
        let call = ToolCallRequest::new("what_time", "{}").with_id("call_1");
        let messages = vec![
            Message::user("What time is it?"),
            Message::tool_call(call.clone()),
            Message::function_result(&call, "noon"),
        ];

        let body = serde_json::to_value(OpenAiProvider::convert_messages(&messages)).unwrap();
        assert_eq!(body[1]["role"], json!("assistant"));
        assert_eq!(body[1]["content"], json!(null));
        assert_eq!(body[1]["tool_calls"][0]["id"], json!("call_1"));
        assert_eq!(body[1]["tool_calls"][0]["type"], json!("function"));
        assert_eq!(body[1]["tool_calls"][0]["function"]["arguments"], json!("{}"));
        assert_eq!(body[2]["role"], json!("tool"));
        assert_eq!(body[2]["tool_call_id"], json!("call_1"));
    }

    #[test]
    fn test_tool_call_response() {
        let response: ChatResponse = serde_json::from_value(json!({
            "model": "gpt-4o-mini",
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": {"name": "what_time", "arguments": "{\"tz\":\"UTC\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
        }))
        .unwrap();

        let completion = OpenAiProvider::convert_completion(response, "gpt-4o-mini").unwrap();
        assert_eq!(completion.finish_reason, Some(FinishReason::ToolUse));
        assert_eq!(completion.tool_calls[0].id, "call_abc");
        assert_eq!(completion.tool_calls[0].arguments, r#"{"tz":"UTC"}"#);
        assert_eq!(completion.usage.unwrap().total_tokens, 15);
    }

    #[test]
    fn test_empty_choices_is_transport_error() {
        let response: ChatResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        let err = OpenAiProvider::convert_completion(response, "m").unwrap_err();
        assert!(matches!(err, ChatError::Transport(_)));
    }

    #[test]
    fn test_filtered_response() {
        let response: ChatResponse = serde_json::from_value(json!({
            "choices": [{
                "message": {"role": "assistant", "content": "Sorry"},
                "finish_reason": "content_filter"
            }]
        }))
        .unwrap();
        let completion = OpenAiProvider::convert_completion(response, "m").unwrap();
        assert_eq!(completion.finish_reason, Some(FinishReason::ContentFilter));
        assert_eq!(completion.model, "m");
    }
}
