//! Guidance card assembly.
//!
//! Pure lookup over approved content: no model involvement, so the same
//! `(topic, language)` always yields the same card.

use std::sync::Arc;

use crate::content::ContentLibrary;
use crate::error::{Error, Result};
use crate::model::{GuidanceCard, Language};
use crate::topics::TopicKey;

/// Builds [`GuidanceCard`]s from the content library.
pub struct GuidanceComposer {
    content: Arc<ContentLibrary>,
}

impl GuidanceComposer {
    pub fn new(content: Arc<ContentLibrary>) -> Self {
        Self { content }
    }

    /// Compose the card for `topic_key` in `language`.
    ///
    /// # Errors
    ///
    /// - `UnknownTopicKey` if `topic_key` is not in the enumeration
    /// - `TopicNotFound` if the topic has no approved content
    /// - `LanguageNotAvailable` if the approved content lacks this language
    pub fn compose(&self, topic_key: &str, language: Language) -> Result<GuidanceCard> {
        let topic = TopicKey::parse(topic_key.trim())
            .ok_or_else(|| Error::UnknownTopicKey(topic_key.to_string()))?;
        let content = self.content.approved_topic_content(topic, language)?;

        Ok(GuidanceCard {
            topic_key: topic.as_str().to_string(),
            language,
            title: content.title.clone(),
            summary: content.summary.clone(),
            self_care: content.self_care.clone(),
            over_the_counter: content.over_the_counter.clone(),
            seek_care_when: content.seek_care_when.clone(),
            disclaimer: content
                .disclaimer
                .clone()
                .unwrap_or_else(|| default_disclaimer(language).to_string()),
        })
    }
}

fn default_disclaimer(language: Language) -> &'static str {
    match language {
        Language::En => {
            "This guidance is general information, not a diagnosis. If you are worried or your symptoms get worse, contact a health worker."
        }
        Language::Am => {
            "ይህ ምክር አጠቃላይ መረጃ እንጂ የህክምና ምርመራ አይደለም። ከተጨነቁ ወይም ምልክቶችዎ ከባሱ የጤና ባለሙያ ያማክሩ።"
        }
    }
}
