//! OpenAI-compatible chat completions adapter.
//!
//! Works against api.openai.com and any server exposing the same
//! `/chat/completions` shape (vLLM, Ollama's OpenAI endpoint, gateways).
//!
//! # API Reference
//!
//! See: <https://platform.openai.com/docs/api-reference/chat/create>

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{GatewayError, LanguageModel};

/// Base URL for the OpenAI API.
const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// Model used when none is configured.
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

/// Low temperature keeps classification replies stable.
const TEMPERATURE: f32 = 0.2;

/// Client for OpenAI-compatible chat completion endpoints.
#[derive(Clone)]
pub struct OpenAiGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    request_timeout: Duration,
}

impl OpenAiGateway {
    /// Create a gateway against the public OpenAI API.
    pub fn new(api_key: &str, model: &str, request_timeout: Duration) -> anyhow::Result<Self> {
        Self::with_base_url(OPENAI_API_BASE, api_key, model, request_timeout)
    }

    /// Create a gateway against a compatible server at `base_url`.
    pub fn with_base_url(
        base_url: &str,
        api_key: &str,
        model: &str,
        request_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            request_timeout,
        })
    }

    fn map_transport_error(&self, e: reqwest::Error) -> GatewayError {
        if e.is_timeout() {
            GatewayError::Timeout(self.request_timeout)
        } else {
            GatewayError::unavailable(e.to_string())
        }
    }
}

#[async_trait]
impl LanguageModel for OpenAiGateway {
    async fn classify(&self, prompt: &str) -> Result<String, GatewayError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: TEMPERATURE,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::unavailable(format!(
                "OpenAI returned HTTP {status}"
            )));
        }

        let data = response
            .json::<ChatResponse>()
            .await
            .map_err(|e| GatewayError::malformed(format!("unreadable completion: {e}")))?;

        data.first_text()
            .ok_or_else(|| GatewayError::malformed("completion had no text content"))
    }

    fn provider(&self) -> &str {
        "openai"
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

/// Response from the chat completions endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    pub message: ChatChoiceMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatResponse {
    /// Text of the first choice, if it has any.
    pub fn first_text(self) -> Option<String> {
        self.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|t| !t.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chat_response() {
        let json = r#"{
            "id": "chatcmpl-1",
            "choices": [
                {"index": 0, "message": {"role": "assistant", "content": "{\"level\":\"GREEN\"}"}}
            ]
        }"#;

        let response: ChatResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.first_text().as_deref(), Some("{\"level\":\"GREEN\"}"));
    }

    #[test]
    fn test_empty_choices_have_no_text() {
        let response: ChatResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(response.first_text().is_none());
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let gateway = OpenAiGateway::with_base_url(
            "http://localhost:11434/v1/",
            "key",
            DEFAULT_OPENAI_MODEL,
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(gateway.base_url, "http://localhost:11434/v1");
        assert_eq!(gateway.provider(), "openai");
    }
}
