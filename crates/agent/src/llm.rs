//! OpenAI-compatible chat-completions client.
//!
//! Both supported providers speak the same wire protocol; the difference is
//! that hosted OpenAI models take structured `tools` in the request while
//! local Ollama models get tool instructions in the prompt and answer in
//! text (see [`crate::parser`]).

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use scout_core::config::{LlmConfig, LlmProvider};

#[derive(Clone, Debug, Serialize)]
pub struct TurnMessage {
    pub role: String,
    pub content: String,
}

impl TurnMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".to_string(), content: content.into() }
    }
}

#[derive(Clone, Debug)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A structured tool call requested by the model.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Clone, Debug, Default)]
pub struct ChatOutcome {
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm is not configured: {0}")]
    Configuration(String),
    #[error("llm request failed with status {status}: {message}")]
    Api { status: u16, message: String },
    #[error("llm transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("could not decode llm response: {0}")]
    Decode(String),
}

pub type ChunkSink<'a> = &'a (dyn Fn(&str) + Send + Sync);

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Whether the provider accepts structured `tools` in the request and
    /// returns `tool_calls` in the response.
    fn supports_native_tools(&self) -> bool;

    async fn complete(
        &self,
        model: &str,
        messages: &[TurnMessage],
        tools: &[ToolDefinition],
        max_tokens: u32,
    ) -> Result<ChatOutcome, LlmError>;

    /// Stream a completion, invoking `on_chunk` for every content delta.
    /// Returns the full accumulated text.
    async fn complete_stream(
        &self,
        model: &str,
        messages: &[TurnMessage],
        max_tokens: u32,
        on_chunk: ChunkSink<'_>,
    ) -> Result<String, LlmError>;
}

pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    native_tools: bool,
    max_retries: u32,
}

impl OpenAiClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let (base_url, native_tools) = match config.provider {
            LlmProvider::OpenAi => (
                config.base_url.clone().unwrap_or_else(|| "https://api.openai.com".to_string()),
                true,
            ),
            LlmProvider::Ollama => (
                config.base_url.clone().ok_or_else(|| {
                    LlmError::Configuration("ollama requires llm.base_url".to_string())
                })?,
                false,
            ),
        };

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            native_tools,
            max_retries: config.max_retries,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    fn request(&self, body: &ChatCompletionRequest<'_>) -> reqwest::RequestBuilder {
        let mut builder = self.http.post(self.endpoint()).json(body);
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key.expose_secret());
        }
        builder
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn supports_native_tools(&self) -> bool {
        self.native_tools
    }

    async fn complete(
        &self,
        model: &str,
        messages: &[TurnMessage],
        tools: &[ToolDefinition],
        max_tokens: u32,
    ) -> Result<ChatOutcome, LlmError> {
        let wire_tools: Option<Vec<WireTool<'_>>> = if tools.is_empty() {
            None
        } else {
            Some(tools.iter().map(WireTool::from).collect())
        };

        let body = ChatCompletionRequest {
            model,
            messages,
            tools: wire_tools,
            max_tokens: Some(max_tokens),
            temperature: 0.2,
            stream: None,
        };

        let mut attempt = 0;
        let response = loop {
            match self.request(&body).send().await {
                Ok(response) => break response,
                Err(err) if attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(attempt, error = %err, "llm request failed, retrying");
                    tokio::time::sleep(Duration::from_millis(500 * attempt as u64)).await;
                }
                Err(err) => return Err(err.into()),
            }
        };

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_else(|_| String::new());
            return Err(LlmError::Api { status: status.as_u16(), message });
        }

        let parsed: ChatCompletionResponse = response.json().await?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Decode("response contained no choices".to_string()))?;

        let mut tool_calls = Vec::new();
        for call in choice.message.tool_calls {
            let arguments = match serde_json::from_str(&call.function.arguments) {
                Ok(value) => value,
                Err(err) => {
                    tracing::warn!(
                        tool = %call.function.name,
                        error = %err,
                        "tool call arguments were not valid JSON, substituting empty object"
                    );
                    Value::Object(Default::default())
                }
            };
            tool_calls.push(ToolCallRequest {
                id: call.id,
                name: call.function.name,
                arguments,
            });
        }

        Ok(ChatOutcome { content: choice.message.content.unwrap_or_default(), tool_calls })
    }

    async fn complete_stream(
        &self,
        model: &str,
        messages: &[TurnMessage],
        max_tokens: u32,
        on_chunk: ChunkSink<'_>,
    ) -> Result<String, LlmError> {
        let body = ChatCompletionRequest {
            model,
            messages,
            tools: None,
            max_tokens: Some(max_tokens),
            temperature: 0.2,
            stream: Some(true),
        };

        let response = self.request(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_else(|_| String::new());
            return Err(LlmError::Api { status: status.as_u16(), message });
        }

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut full = String::new();

        'outer: while let Some(bytes) = stream.next().await {
            let bytes = bytes?;
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(newline) = buffer.find('\n') {
                let line: String = buffer.drain(..=newline).collect();
                let line = line.trim();
                let Some(payload) = line.strip_prefix("data:") else {
                    continue;
                };
                let payload = payload.trim();
                if payload == "[DONE]" {
                    break 'outer;
                }
                let Ok(chunk) = serde_json::from_str::<StreamChunk>(payload) else {
                    continue;
                };
                for choice in chunk.choices {
                    if let Some(content) = choice.delta.content {
                        if !content.is_empty() {
                            full.push_str(&content);
                            on_chunk(&content);
                        }
                    }
                }
            }
        }

        Ok(full)
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [TurnMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunction<'a>,
}

#[derive(Serialize)]
struct WireFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

impl<'a> From<&'a ToolDefinition> for WireTool<'a> {
    fn from(definition: &'a ToolDefinition) -> Self {
        Self {
            kind: "function",
            function: WireFunction {
                name: &definition.name,
                description: &definition.description,
                parameters: &definition.parameters,
            },
        }
    }
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: WireResponseMessage,
}

#[derive(Default, Deserialize)]
struct WireResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    function: WireCallFunction,
}

#[derive(Deserialize)]
struct WireCallFunction {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}
