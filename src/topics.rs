//! Topic mapping: free text to one key of a closed enumeration.
//!
//! The model is shown the literal list of keys and must answer with one of
//! them or with [`NO_TOPIC`]. Anything else is rejected with
//! [`Error::UnknownTopicKey`] and never coerced to a nearby topic, so a
//! hallucinated key cannot reach guidance lookup.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, GatewayError, Result};
use crate::gateway::{LanguageModel, parse_json};

/// Marker identifying topic-mapping prompts.
pub const PROMPT_TAG: &str = "TASK: topic_mapping";

/// Value the model returns when no topic fits.
pub const NO_TOPIC: &str = "none";

/// Canonical identifiers of approved guidance topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicKey {
    Headache,
    Cough,
    Fever,
    SoreThroat,
    CommonCold,
    StomachAche,
    Diarrhea,
    Constipation,
    Heartburn,
    BackPain,
    SkinRash,
    Insomnia,
}

impl TopicKey {
    pub const ALL: [TopicKey; 12] = [
        TopicKey::Headache,
        TopicKey::Cough,
        TopicKey::Fever,
        TopicKey::SoreThroat,
        TopicKey::CommonCold,
        TopicKey::StomachAche,
        TopicKey::Diarrhea,
        TopicKey::Constipation,
        TopicKey::Heartburn,
        TopicKey::BackPain,
        TopicKey::SkinRash,
        TopicKey::Insomnia,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TopicKey::Headache => "headache",
            TopicKey::Cough => "cough",
            TopicKey::Fever => "fever",
            TopicKey::SoreThroat => "sore_throat",
            TopicKey::CommonCold => "common_cold",
            TopicKey::StomachAche => "stomach_ache",
            TopicKey::Diarrhea => "diarrhea",
            TopicKey::Constipation => "constipation",
            TopicKey::Heartburn => "heartburn",
            TopicKey::BackPain => "back_pain",
            TopicKey::SkinRash => "skin_rash",
            TopicKey::Insomnia => "insomnia",
        }
    }

    /// Exact match against the enumeration. No fuzzy matching.
    pub fn parse(key: &str) -> Option<Self> {
        TopicKey::ALL.into_iter().find(|k| k.as_str() == key)
    }
}

impl std::fmt::Display for TopicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct TopicReply {
    #[serde(default)]
    topic_key: Option<String>,
}

/// Maps free text to a [`TopicKey`] through the language model.
pub struct TopicMapper {
    gateway: Arc<dyn LanguageModel>,
}

impl TopicMapper {
    pub fn new(gateway: Arc<dyn LanguageModel>) -> Self {
        Self { gateway }
    }

    /// Map `text` to exactly one topic key.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` for empty or oversized text (no model call is made)
    /// - `TopicMappingFailed` when the model is unreachable or its reply is unreadable
    /// - `NoMatchingTopic` when the model says nothing fits
    /// - `UnknownTopicKey` when the model invents a key
    pub async fn map_topic(&self, text: &str) -> Result<TopicKey> {
        let text = crate::model::check_symptom_text(text)?;
        let prompt = build_prompt(text);

        let raw = self
            .gateway
            .classify(&prompt)
            .await
            .map_err(Error::TopicMappingFailed)?;

        let key = interpret_reply(&raw)?;
        info!(topic_key = %key, "Topic mapped");
        Ok(key)
    }
}

fn build_prompt(text: &str) -> String {
    let keys = TopicKey::ALL
        .iter()
        .map(|k| format!("- {}", k.as_str()))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"{PROMPT_TAG}
You map a short health complaint to one self-care topic.
The complaint may be written in English or Amharic.

Allowed topic keys:
{keys}

Rules:
- Answer with exactly one key from the list above, copied verbatim.
- If no key fits, answer with "{NO_TOPIC}".
- Respond ONLY with JSON: {{"topic_key": "<key>"}}

Complaint:
"""{text}""""#
    )
}

fn interpret_reply(raw: &str) -> Result<TopicKey> {
    let reply: TopicReply = parse_json(raw).map_err(Error::TopicMappingFailed)?;

    let key = reply
        .topic_key
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .ok_or_else(|| {
            Error::TopicMappingFailed(GatewayError::malformed("reply has no topic_key"))
        })?;

    if key == NO_TOPIC {
        info!("No approved topic matches");
        return Err(Error::NoMatchingTopic);
    }

    TopicKey::parse(&key).ok_or_else(|| {
        warn!(topic_key = %key, "Model returned a topic key outside the enumeration");
        Error::UnknownTopicKey(key)
    })
}
