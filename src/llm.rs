//! Semantic resolution backend client.
//!
//! Speaks the OpenAI-compatible chat-completions protocol. The resolver
//! only sees the [`SemanticBackend`] trait, so tests and alternative
//! providers can stand in for the HTTP client.
//!
//! # Configuration
//!
//! Settings can be configured via environment variables:
//! - `UI_PILOT_LLM_ENDPOINT`: chat-completions URL
//! - `UI_PILOT_LLM_MODEL`: Model name
//! - `UI_PILOT_LLM_API_KEY`: Bearer token, optional for local servers
//! - `UI_PILOT_LLM_MAX_TOKENS`: Max tokens in response
//! - `UI_PILOT_LLM_TIMEOUT`: Resolution timeout (seconds)
//! - `UI_PILOT_LLM_CONNECT_TIMEOUT`: Connection timeout (seconds)

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config;

/// Result type for semantic backend calls
pub type LlmResult<T> = Result<T, LlmError>;

/// Errors from the semantic backend
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("unauthorized ({status}): {message}")]
    Unauthorized { status: u16, message: String },

    #[error("http {status}: {message}")]
    Http { status: u16, message: String },
}

impl LlmError {
    /// The backend cannot serve any request: bad credentials or unknown model
    pub fn is_unusable(&self) -> bool {
        match self {
            LlmError::Unauthorized { .. } => true,
            LlmError::Http { status, .. } => *status == StatusCode::NOT_FOUND.as_u16(),
            _ => false,
        }
    }
}

/// A language model that completes a system/user prompt pair
#[async_trait]
pub trait SemanticBackend: Send + Sync {
    /// Complete one prompt. Implementations must give up after `timeout`.
    async fn complete(&self, system: &str, user: &str, timeout: Duration) -> LlmResult<String>;

    /// Short name for logs
    fn name(&self) -> &str;
}

/// Configuration for the chat-completions client
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// API endpoint URL
    pub endpoint: String,
    /// Model name to use
    pub model: String,
    /// Bearer token
    pub api_key: Option<String>,
    /// Maximum tokens in response
    pub max_tokens: u32,
    /// Timeout for initial connection (seconds)
    pub connect_timeout: u64,
    /// Default request timeout (seconds)
    pub timeout: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        let cfg = config::get();
        Self {
            endpoint: cfg.llm.endpoint.clone(),
            model: cfg.llm.model.clone(),
            api_key: cfg.llm.api_key.clone(),
            max_tokens: cfg.llm.max_tokens,
            connect_timeout: cfg.llm.connect_timeout,
            timeout: cfg.llm.timeout,
        }
    }
}

impl LlmConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn timeout(mut self, seconds: u64) -> Self {
        self.timeout = seconds;
        self
    }

    /// Resolution timeout as a duration
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// Chat-completions client over HTTP
pub struct ChatCompletionsBackend {
    client: Client,
    config: LlmConfig,
}

impl ChatCompletionsBackend {
    pub fn new(config: LlmConfig) -> LlmResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            .build()
            .map_err(|e| LlmError::ConnectionFailed(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }
}

#[async_trait]
impl SemanticBackend for ChatCompletionsBackend {
    async fn complete(&self, system: &str, user: &str, timeout: Duration) -> LlmResult<String> {
        let request = serde_json::json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user }
            ],
            "max_tokens": self.config.max_tokens,
            "temperature": 0,
            "stream": false
        });

        let mut builder = self.client.post(&self.config.endpoint).timeout(timeout).json(&request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| classify_transport(e, timeout))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = body.chars().take(300).collect::<String>();
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::Unauthorized {
                    status: status.as_u16(),
                    message,
                },
                _ => LlmError::Http {
                    status: status.as_u16(),
                    message,
                },
            });
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| classify_transport(e, timeout))?;
        let text = extract_message_text(&json)?;
        debug!(model = %self.config.model, chars = text.len(), "semantic backend replied");
        Ok(text)
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}

fn classify_transport(err: reqwest::Error, timeout: Duration) -> LlmError {
    if err.is_timeout() {
        LlmError::Timeout(timeout)
    } else if err.is_connect() {
        LlmError::ConnectionFailed(err.to_string())
    } else if err.is_decode() {
        LlmError::InvalidResponse(err.to_string())
    } else {
        LlmError::ConnectionFailed(err.to_string())
    }
}

/// Message text of a chat-completions response; thinking models may only
/// fill `reasoning_content`.
pub fn extract_message_text(response: &serde_json::Value) -> LlmResult<String> {
    let message = &response["choices"][0]["message"];
    if message.is_null() {
        return Err(LlmError::InvalidResponse("response has no choices".to_string()));
    }
    let content = message["content"].as_str().unwrap_or("");
    let text = if content.trim().is_empty() {
        message["reasoning_content"].as_str().unwrap_or("")
    } else {
        content
    };
    if text.trim().is_empty() {
        return Err(LlmError::InvalidResponse("empty message content".to_string()));
    }
    Ok(text.to_string())
}

/// Check that the endpoint accepts connections. Any HTTP status counts as reachable.
pub async fn check_health(endpoint: &str, timeout: Duration) -> LlmResult<bool> {
    let client = Client::builder()
        .connect_timeout(timeout)
        .timeout(timeout)
        .build()
        .map_err(|e| LlmError::ConnectionFailed(e.to_string()))?;
    match client.head(endpoint).send().await {
        Ok(_) => Ok(true),
        Err(e) if e.is_connect() || e.is_timeout() => Ok(false),
        Err(e) => Err(LlmError::ConnectionFailed(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config_for(server: &mockito::Server) -> LlmConfig {
        LlmConfig::new(format!("{}/v1/chat/completions", server.url()))
            .model("test-model")
            .max_tokens(64)
            .timeout(5)
    }

    #[test]
    fn test_llm_config_builder() {
        let config = LlmConfig::new("http://localhost:8080/v1/chat/completions")
            .model("qwen3")
            .api_key("sk-test")
            .max_tokens(200)
            .timeout(30);

        assert_eq!(config.endpoint, "http://localhost:8080/v1/chat/completions");
        assert_eq!(config.model, "qwen3");
        assert_eq!(config.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.max_tokens, 200);
        assert_eq!(config.timeout_duration(), Duration::from_secs(30));
    }

    #[test]
    fn test_reasoning_content_fallback() {
        let json = serde_json::json!({
            "choices": [{ "message": { "content": "", "reasoning_content": "<command>{}</command>" } }]
        });
        assert_eq!(extract_message_text(&json).unwrap(), "<command>{}</command>");

        let empty = serde_json::json!({ "choices": [] });
        assert!(matches!(extract_message_text(&empty), Err(LlmError::InvalidResponse(_))));
    }

    #[test]
    fn test_unusable_classification() {
        let unauthorized = LlmError::Unauthorized {
            status: 401,
            message: "bad key".into(),
        };
        let missing_model = LlmError::Http {
            status: 404,
            message: "model not found".into(),
        };
        let overloaded = LlmError::Http {
            status: 503,
            message: "busy".into(),
        };
        assert!(unauthorized.is_unusable());
        assert!(missing_model.is_unusable());
        assert!(!overloaded.is_unusable());
        assert!(!LlmError::Timeout(Duration::from_secs(1)).is_unusable());
    }

    #[tokio::test]
    async fn test_complete_reads_content() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"<command>{\"action\":\"click\"}</command>"}}]}"#)
            .create_async()
            .await;

        let backend = ChatCompletionsBackend::new(config_for(&server)).unwrap();
        let text = backend
            .complete("system", "user", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(text, r#"<command>{"action":"click"}</command>"#);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_complete_maps_auth_failure() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(401)
            .with_body("invalid api key")
            .create_async()
            .await;

        let backend = ChatCompletionsBackend::new(config_for(&server).api_key("wrong")).unwrap();
        let err = backend
            .complete("system", "user", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Unauthorized { status: 401, .. }));
        assert!(err.is_unusable());
    }

    #[tokio::test]
    async fn test_complete_maps_server_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(500)
            .create_async()
            .await;

        let backend = ChatCompletionsBackend::new(config_for(&server)).unwrap();
        let err = backend
            .complete("system", "user", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Http { status: 500, .. }));
        assert!(!err.is_unusable());
    }

    #[tokio::test]
    async fn test_check_health_reachable() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server.mock("HEAD", "/").with_status(404).create_async().await;
        assert!(check_health(&server.url(), Duration::from_secs(2)).await.unwrap());
    }
}
