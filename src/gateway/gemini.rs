//! Google Gemini adapter.
//!
//! # API Reference
//!
//! See: <https://ai.google.dev/api/generate-content>

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{GatewayError, LanguageModel};

/// Base URL for the Gemini API.
const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Model used when none is configured.
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";

const TEMPERATURE: f32 = 0.2;

/// Client for the Gemini `generateContent` endpoint.
#[derive(Clone)]
pub struct GeminiGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    request_timeout: Duration,
}

impl GeminiGateway {
    pub fn new(api_key: &str, model: &str, request_timeout: Duration) -> anyhow::Result<Self> {
        Self::with_base_url(GEMINI_API_BASE, api_key, model, request_timeout)
    }

    /// Create a gateway with a custom base URL (for testing or proxies).
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
}

#[async_trait]
impl LanguageModel for GeminiGateway {
    async fn classify(&self, prompt: &str) -> Result<String, GatewayError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: TEMPERATURE,
            },
        };

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout(self.request_timeout)
                } else {
                    // Strip the URL: it carries the API key as a query parameter
                    GatewayError::unavailable(e.without_url().to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::unavailable(format!(
                "Gemini returned HTTP {status}"
            )));
        }

        let data = response
            .json::<GenerateResponse>()
            .await
            .map_err(|e| GatewayError::malformed(format!("unreadable candidate: {}", e.without_url())))?;

        data.text()
            .ok_or_else(|| GatewayError::malformed("candidate had no text parts"))
    }

    fn provider(&self) -> &str {
        "gemini"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Clone, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

/// Response from `generateContent`.
#[derive(Debug, Clone, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

impl GenerateResponse {
    /// Concatenated text parts of the first candidate.
    fn text(self) -> Option<String> {
        let content = self.candidates.into_iter().next()?.content?;
        let text: String = content.parts.into_iter().map(|p| p.text).collect();
        (!text.trim().is_empty()).then_some(text)
    }
}
