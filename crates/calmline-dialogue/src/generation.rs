//! Fallback answer generation through an OpenAI-compatible chat API.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use crate::context::ConversationTurn;
use crate::error::DialogueError;

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    150
}

fn default_temperature() -> f32 {
    0.7
}

fn default_timeout_ms() -> u64 {
    10_000
}

#[derive(Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Upper bound on a single generation call.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl fmt::Debug for GenerationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub history: Vec<ConversationTurn>,
    pub user_text: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<String, DialogueError>;
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

fn chat_messages(request: GenerationRequest) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(request.history.len() * 2 + 2);
    messages.push(ChatMessage {
        role: "system",
        content: request.system_prompt,
    });
    for turn in request.history {
        messages.push(ChatMessage {
            role: "user",
            content: turn.caller_text,
        });
        messages.push(ChatMessage {
            role: "assistant",
            content: turn.assistant_text,
        });
    }
    messages.push(ChatMessage {
        role: "user",
        content: request.user_text,
    });
    messages
}

/// Chat completions client.
pub struct HttpLanguageModel {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl HttpLanguageModel {
    pub fn new(config: &GenerationConfig) -> Result<Self, DialogueError> {
        if config.api_key.is_empty() {
            return Err(DialogueError::Configuration(
                "generation api key is not set".to_string(),
            ));
        }
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", config.api_key)).map_err(|e| {
                DialogueError::Configuration(format!("invalid authorization header value: {}", e))
            })?,
        );
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout())
            .build()
            .map_err(|e| DialogueError::Generation(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl LanguageModel for HttpLanguageModel {
    async fn generate(&self, request: GenerationRequest) -> Result<String, DialogueError> {
        let body = ChatCompletionRequest {
            model: &self.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            messages: chat_messages(request),
        };

        tracing::debug!(url = %self.url, messages = body.messages.len(), "sending chat completion");

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| DialogueError::Generation(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(DialogueError::Generation(format!(
                "API request failed with status {}: {}",
                status, error_text
            )));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| DialogueError::Generation(format!("failed to parse response: {}", e)))?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| DialogueError::Generation("response had no content".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_interleave_history_between_system_and_user() {
        let request = GenerationRequest {
            system_prompt: "be brief".to_string(),
            history: vec![ConversationTurn::new("hi", "hello", None)],
            user_text: "what are your hours".to_string(),
            max_tokens: 50,
            temperature: 0.2,
        };
        let roles: Vec<_> = chat_messages(request).iter().map(|m| m.role).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
    }

    #[test]
    fn missing_key_is_a_configuration_error() {
        assert!(matches!(
            HttpLanguageModel::new(&GenerationConfig::default()),
            Err(DialogueError::Configuration(_))
        ));
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = GenerationConfig {
            api_key: "sk-secret".to_string(),
            ..GenerationConfig::default()
        };
        assert!(!format!("{:?}", config).contains("sk-secret"));
    }
}
