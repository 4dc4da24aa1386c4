//! Best-effort triage and guidance attached to a finished report.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::Error;
use crate::guidance::GuidanceComposer;
use crate::model::{Language, Remedy};
use crate::topics::TopicMapper;
use crate::triage::TriageClassifier;

/// Runs topic mapping, triage, and guidance composition on the original symptom.
pub struct RemedyPipeline {
    triage: Arc<TriageClassifier>,
    mapper: Arc<TopicMapper>,
    composer: Arc<GuidanceComposer>,
}

impl RemedyPipeline {
    pub fn new(
        triage: Arc<TriageClassifier>,
        mapper: Arc<TopicMapper>,
        composer: Arc<GuidanceComposer>,
    ) -> Self {
        Self {
            triage,
            mapper,
            composer,
        }
    }

    /// Build a remedy for `symptom`.
    ///
    /// `None` when triage fails or the topic mapper itself fails. A symptom
    /// that simply has no approved guidance still gets its triage verdict.
    pub async fn build(&self, symptom: &str, language: Language) -> Option<Remedy> {
        let (triage, topic) = tokio::join!(
            self.triage.classify(symptom, language),
            self.mapper.map_topic(symptom)
        );

        let triage = match triage {
            Ok(triage) => triage,
            Err(e) => {
                warn!(error = %e, "Remedy skipped: triage failed");
                return None;
            }
        };

        let guidance = match topic {
            Ok(topic) => match self.composer.compose(topic.as_str(), language) {
                Ok(card) => Some(card),
                Err(e @ (Error::TopicNotFound(_) | Error::LanguageNotAvailable { .. })) => {
                    info!(topic_key = %topic, reason = %e, "No guidance card for topic");
                    None
                }
                Err(e) => {
                    warn!(error = %e, "Remedy skipped: guidance failed");
                    return None;
                }
            },
            Err(Error::NoMatchingTopic) => None,
            Err(e) => {
                warn!(error = %e, "Remedy skipped: topic mapping failed");
                return None;
            }
        };

        Some(Remedy { triage, guidance })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::fixtures::library;
    use crate::error::GatewayError;
    use crate::gateway::{LanguageModel, ScriptedGateway};
    use crate::model::TriageLevel;
    use crate::{topics, triage};

    fn pipeline(gateway: ScriptedGateway) -> RemedyPipeline {
        let gateway: Arc<dyn LanguageModel> = Arc::new(gateway);
        let content = Arc::new(library());
        RemedyPipeline::new(
            Arc::new(TriageClassifier::new(gateway.clone(), content.clone())),
            Arc::new(TopicMapper::new(gateway)),
            Arc::new(GuidanceComposer::new(content)),
        )
    }

    const GREEN: &str = r#"{"level": "GREEN", "flags": []}"#;

    #[tokio::test]
    async fn test_full_remedy() {
        let remedy = pipeline(
            ScriptedGateway::new()
                .on(triage::PROMPT_TAG, GREEN)
                .on(topics::PROMPT_TAG, r#"{"topic_key": "headache"}"#),
        )
        .build("mild headache", Language::En)
        .await
        .unwrap();

        assert_eq!(remedy.triage.level, TriageLevel::Green);
        assert_eq!(remedy.guidance.unwrap().topic_key, "headache");
    }

    #[tokio::test]
    async fn test_no_topic_keeps_triage() {
        let remedy = pipeline(
            ScriptedGateway::new()
                .on(triage::PROMPT_TAG, GREEN)
                .on(topics::PROMPT_TAG, r#"{"topic_key": "none"}"#),
        )
        .build("strange tingling", Language::En)
        .await
        .unwrap();

        assert!(remedy.guidance.is_none());
    }

    #[tokio::test]
    async fn test_missing_translation_keeps_triage() {
        let remedy = pipeline(
            ScriptedGateway::new()
                .on(triage::PROMPT_TAG, GREEN)
                .on(topics::PROMPT_TAG, r#"{"topic_key": "cough"}"#),
        )
        .build("ደረቅ ሳል", Language::Am)
        .await
        .unwrap();

        assert!(remedy.guidance.is_none());
    }

    #[tokio::test]
    async fn test_triage_failure_drops_remedy() {
        let remedy = pipeline(
            ScriptedGateway::new()
                .on_error(triage::PROMPT_TAG, GatewayError::unavailable("down"))
                .on(topics::PROMPT_TAG, r#"{"topic_key": "headache"}"#),
        )
        .build("mild headache", Language::En)
        .await;

        assert!(remedy.is_none());
    }

    #[tokio::test]
    async fn test_hallucinated_topic_drops_remedy() {
        let remedy = pipeline(
            ScriptedGateway::new()
                .on(triage::PROMPT_TAG, GREEN)
                .on(topics::PROMPT_TAG, r#"{"topic_key": "migraine"}"#),
        )
        .build("mild headache", Language::En)
        .await;

        assert!(remedy.is_none());
    }
}
