//! Language-model gateway.
//!
//! The core only ever needs one capability from a model: send a prompt, get
//! text back. [`LanguageModel`] is that capability; each provider gets its own
//! adapter and nothing outside this module knows which one is in use.
//!
//! # Providers
//!
//! - [`openai`]: OpenAI-compatible chat completions
//! - [`gemini`]: Google Gemini `generateContent`
//! - [`scripted`]: canned replies keyed on prompt markers, for tests
//!
//! Model output is untrusted. [`parse_json`] strips markdown fences and
//! surrounding prose before deserializing, and reports anything else as
//! [`GatewayError::Malformed`].

pub mod gemini;
pub mod openai;
#[doc(hidden)]
pub mod scripted;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::{DeserializeOwned, Deserializer};

pub use crate::error::GatewayError;
pub use gemini::GeminiGateway;
pub use openai::OpenAiGateway;
#[doc(hidden)]
pub use scripted::ScriptedGateway;

/// Free-text in, free-text out.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Send a prompt and return the model's raw text reply.
    async fn classify(&self, prompt: &str) -> Result<String, GatewayError>;

    /// Provider name, for logs only.
    fn provider(&self) -> &str;
}

/// Deadline and logging wrapper around a provider.
///
/// Every call is bounded by `timeout`; when it elapses the in-flight request
/// future is dropped and the caller gets [`GatewayError::Timeout`].
pub struct TimedGateway {
    inner: Arc<dyn LanguageModel>,
    timeout: Duration,
}

impl TimedGateway {
    pub fn new(inner: Arc<dyn LanguageModel>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl LanguageModel for TimedGateway {
    async fn classify(&self, prompt: &str) -> Result<String, GatewayError> {
        let start = Instant::now();
        let result = match tokio::time::timeout(self.timeout, self.inner.classify(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout(self.timeout)),
        };
        let duration_ms = start.elapsed().as_millis();

        // Log sizes only; prompts carry user symptom text.
        match &result {
            Ok(text) => tracing::info!(
                provider = %self.inner.provider(),
                duration_ms = %duration_ms,
                prompt_chars = prompt.chars().count(),
                reply_chars = text.chars().count(),
                "Model call completed"
            ),
            Err(e) => tracing::warn!(
                provider = %self.inner.provider(),
                duration_ms = %duration_ms,
                timeout = e.is_timeout(),
                error = %e,
                "Model call failed"
            ),
        }

        result
    }

    fn provider(&self) -> &str {
        self.inner.provider()
    }
}

/// Remove a markdown code fence around a model reply, if there is one.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();

    if let Some(start) = trimmed.find("```") {
        let after_fence = &trimmed[start + 3..];
        // Skip the opening line only when it is a bare info string ("json")
        let body = match after_fence.split_once('\n') {
            Some((info, rest)) if is_info_string(info) => rest,
            _ => after_fence,
        };
        return match body.find("```") {
            Some(end) => body[..end].trim(),
            None => body.trim(),
        };
    }

    trimmed
}

fn is_info_string(line: &str) -> bool {
    line.trim()
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '+' | '.'))
}

/// Treat an explicit `null` like a missing field.
///
/// Use with `#[serde(default, deserialize_with = "...")]`.
pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Outermost `{...}` or `[...]` span, whichever opens first.
fn json_span(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let close = if text[start..].starts_with('{') { '}' } else { ']' };
    let end = text.rfind(close)?;
    (start < end).then(|| &text[start..=end])
}

/// Deserialize a model reply, tolerating fences and leading/trailing prose.
pub fn parse_json<T: DeserializeOwned>(raw: &str) -> Result<T, GatewayError> {
    let body = strip_code_fences(raw);

    match serde_json::from_str(body) {
        Ok(value) => Ok(value),
        Err(first) => json_span(body)
            .and_then(|span| serde_json::from_str(span).ok())
            .ok_or_else(|| GatewayError::malformed(first.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Verdict {
        level: String,
    }

    #[test]
    fn test_strip_fenced_json() {
        let raw = "```json\n{\"level\": \"RED\"}\n```";
        assert_eq!(strip_code_fences(raw), "{\"level\": \"RED\"}");
    }

    #[test]
    fn test_strip_leaves_plain_text() {
        assert_eq!(strip_code_fences("  {\"a\":1} \n"), "{\"a\":1}");
    }

    #[test]
    fn test_json_on_fence_line_is_kept() {
        let raw = "```{\"level\": \"GREEN\",\n\"flags\": []}\n```";
        assert_eq!(strip_code_fences(raw), "{\"level\": \"GREEN\",\n\"flags\": []}");

        let verdict: Verdict = parse_json(raw).unwrap();
        assert_eq!(verdict.level, "GREEN");
    }

    #[test]
    fn test_null_field_reads_as_default() {
        #[derive(Debug, Deserialize)]
        struct Flags {
            #[serde(default, deserialize_with = "null_as_default")]
            flags: Vec<String>,
        }

        let parsed: Flags = parse_json(r#"{"flags": null}"#).unwrap();
        assert!(parsed.flags.is_empty());
        let parsed: Flags = parse_json("{}").unwrap();
        assert!(parsed.flags.is_empty());
    }

    #[test]
    fn test_parse_json_with_prose() {
        let raw = "Sure! Here is the result: {\"level\": \"YELLOW\"} Hope that helps.";
        let verdict: Verdict = parse_json(raw).unwrap();
        assert_eq!(verdict.level, "YELLOW");
    }

    #[test]
    fn test_parse_json_array_in_fence() {
        let raw = "```\n[1, 2, 3]\n```";
        let values: Vec<u32> = parse_json(raw).unwrap();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[test]
    fn test_parse_json_rejects_garbage() {
        let result: Result<Verdict, _> = parse_json("I cannot help with that.");
        assert!(matches!(result, Err(GatewayError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_timed_gateway_times_out() {
        let slow = ScriptedGateway::new()
            .with_default("{}")
            .with_delay(Duration::from_millis(200));
        let gateway = TimedGateway::new(Arc::new(slow), Duration::from_millis(20));

        let result = gateway.classify("anything").await;

        assert!(matches!(result, Err(GatewayError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_timed_gateway_passes_through() {
        let fast = ScriptedGateway::new().with_default("hello");
        let gateway = TimedGateway::new(Arc::new(fast), Duration::from_secs(1));

        let text = tokio_test::assert_ok!(gateway.classify("anything").await);
        assert_eq!(text, "hello");
    }
}
