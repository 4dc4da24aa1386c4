//! Scripted gateway returning canned replies.
//!
//! Replies are chosen by the first rule whose marker appears in the prompt.
//! Each rule holds a queue; the last reply in a queue repeats forever, so a
//! single reply behaves like a constant. Every prompt is recorded for
//! inspection.
//!
//! Used by the unit and HTTP integration tests in place of a real provider.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{GatewayError, LanguageModel};

type Reply = Result<String, GatewayError>;

struct Rule {
    marker: String,
    replies: Mutex<VecDeque<Reply>>,
}

/// In-process [`LanguageModel`] with scripted answers.
pub struct ScriptedGateway {
    rules: Vec<Rule>,
    default: Reply,
    delay: Option<Duration>,
    prompts: Mutex<Vec<String>>,
}

impl Default for ScriptedGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedGateway {
    /// A gateway that fails every call until rules are added.
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            default: Err(GatewayError::unavailable("no scripted reply")),
            delay: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Reply with `text` whenever the prompt contains `marker`.
    pub fn on(self, marker: &str, text: &str) -> Self {
        self.on_sequence(marker, vec![Ok(text.to_string())])
    }

    /// Fail with `error` whenever the prompt contains `marker`.
    pub fn on_error(self, marker: &str, error: GatewayError) -> Self {
        self.on_sequence(marker, vec![Err(error)])
    }

    /// Reply with each entry in turn; the last one repeats.
    pub fn on_sequence(mut self, marker: &str, replies: Vec<Reply>) -> Self {
        self.rules.push(Rule {
            marker: marker.to_string(),
            replies: Mutex::new(replies.into()),
        });
        self
    }

    /// Reply used when no rule matches.
    pub fn with_default(mut self, text: &str) -> Self {
        self.default = Ok(text.to_string());
        self
    }

    /// Sleep before every reply, to exercise deadlines.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every prompt received so far, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    /// Number of prompts containing `marker`.
    pub fn calls_matching(&self, marker: &str) -> usize {
        self.prompts()
            .iter()
            .filter(|p| p.contains(marker))
            .count()
    }

    fn next_reply(&self, prompt: &str) -> Reply {
        for rule in &self.rules {
            if !prompt.contains(&rule.marker) {
                continue;
            }
            let Ok(mut replies) = rule.replies.lock() else {
                return Err(GatewayError::unavailable("scripted rule poisoned"));
            };
            return if replies.len() > 1 {
                replies
                    .pop_front()
                    .unwrap_or_else(|| Err(GatewayError::unavailable("empty script")))
            } else {
                replies
                    .front()
                    .cloned()
                    .unwrap_or_else(|| Err(GatewayError::unavailable("empty script")))
            };
        }
        self.default.clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedGateway {
    async fn classify(&self, prompt: &str) -> Result<String, GatewayError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.next_reply(prompt)
    }

    fn provider(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_marker_selects_reply() {
        let gateway = ScriptedGateway::new()
            .on("TASK: a", "alpha")
            .on("TASK: b", "beta");

        assert_eq!(gateway.classify("TASK: b\nhello").await.unwrap(), "beta");
        assert_eq!(gateway.classify("TASK: a\nhello").await.unwrap(), "alpha");
        assert!(gateway.classify("TASK: c").await.is_err());
        assert_eq!(gateway.prompts().len(), 3);
    }

    #[tokio::test]
    async fn test_sequence_repeats_last() {
        let gateway = ScriptedGateway::new().on_sequence(
            "x",
            vec![Ok("one".to_string()), Ok("two".to_string())],
        );

        assert_eq!(gateway.classify("x").await.unwrap(), "one");
        assert_eq!(gateway.classify("x").await.unwrap(), "two");
        assert_eq!(gateway.classify("x").await.unwrap(), "two");
        assert_eq!(gateway.calls_matching("x"), 3);
    }
}
