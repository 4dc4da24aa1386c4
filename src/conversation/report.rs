//! Health report synthesis.
//!
//! The model summarizes the whole conversation into a [`HealthReport`].
//! Unlike validation there is no fallback: an unreadable reply fails the
//! stage with [`Error::ReportGenerationFailed`] rather than showing a
//! fabricated summary.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::info;

use crate::error::{Error, GatewayError, Result};
use crate::gateway::{LanguageModel, parse_json};
use crate::model::{Conversation, HealthReport, TriageLevel};

/// Marker identifying report prompts.
pub const PROMPT_TAG: &str = "TASK: health_report";

/// Produces the final report of a conversation.
pub struct ReportGenerator {
    gateway: Arc<dyn LanguageModel>,
}

impl ReportGenerator {
    pub fn new(gateway: Arc<dyn LanguageModel>) -> Self {
        Self { gateway }
    }

    /// Summarize `conversation`, which must hold every answer.
    pub async fn generate(&self, conversation: &Conversation) -> Result<HealthReport> {
        let failed = |source: GatewayError| Error::ReportGenerationFailed {
            conversation_id: conversation.id.clone(),
            source,
        };

        let prompt = build_prompt(conversation);
        let raw = self.gateway.classify(&prompt).await.map_err(failed)?;
        let report = parse_report(&raw, &conversation.symptom).map_err(failed)?;

        info!(
            conversation_id = %conversation.id,
            urgency = %report.urgency_level,
            "Health report generated"
        );
        Ok(report)
    }
}

fn build_prompt(conversation: &Conversation) -> String {
    let transcript = conversation
        .answered_pairs()
        .iter()
        .map(|(q, a)| format!("Q{} ({}): {}\nA{}: {}", q.id, q.category.as_str(), q.text, q.id, a.text))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"{PROMPT_TAG}
You are a careful health assistant. Summarize the conversation below into a health report.
Write every text value in {language_name}. Do not diagnose with certainty; list possible conditions.
"urgency_level" must be one of RED (emergency), YELLOW (see a health worker soon), GREEN (self-care).

Respond ONLY with one JSON object with these keys:
{{"symptom": "", "duration": "", "location": "", "severity": "",
  "associated_symptoms": [], "medical_history": "", "triggers": "",
  "possible_conditions": [], "recommendations": [], "urgency_level": ""}}

Symptom: """{symptom}"""
Language: {language_code}

Conversation:
{transcript}"#,
        language_name = conversation.language.name(),
        language_code = conversation.language.code(),
        symptom = conversation.symptom,
    )
}

/// Read a string field, accepting a list of strings joined with ", ".
fn text_field(fields: &Map<String, Value>, key: &str) -> String {
    match fields.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Array(items)) => list_items(items).join(", "),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// Read a list field, accepting a single string as a one-item list.
fn list_field(fields: &Map<String, Value>, key: &str) -> Vec<String> {
    match fields.get(key) {
        Some(Value::Array(items)) => list_items(items),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

fn list_items(items: &[Value]) -> Vec<String> {
    items
        .iter()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_report(raw: &str, symptom: &str) -> std::result::Result<HealthReport, GatewayError> {
    let fields: Map<String, Value> = parse_json(raw)?;

    let urgency = text_field(&fields, "urgency_level");
    if urgency.is_empty() {
        return Err(GatewayError::malformed("report has no urgency_level"));
    }
    // Keep free-text urgency the model wrote, but normalize recognized levels
    let urgency_level = TriageLevel::parse(&urgency)
        .map(|level| level.as_str().to_string())
        .unwrap_or(urgency);

    let mut reported_symptom = text_field(&fields, "symptom");
    if reported_symptom.is_empty() {
        reported_symptom = symptom.to_string();
    }

    Ok(HealthReport {
        symptom: reported_symptom,
        duration: text_field(&fields, "duration"),
        location: text_field(&fields, "location"),
        severity: text_field(&fields, "severity"),
        associated_symptoms: list_field(&fields, "associated_symptoms"),
        medical_history: text_field(&fields, "medical_history"),
        triggers: text_field(&fields, "triggers"),
        possible_conditions: list_field(&fields, "possible_conditions"),
        recommendations: list_field(&fields, "recommendations"),
        urgency_level,
        generated_at: Utc::now(),
        remedy: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::questions::default_questions;
    use crate::model::{Answer, Language};

    fn answered_conversation() -> Conversation {
        let mut conversation = Conversation::new(
            "c-1".to_string(),
            "mild headache".to_string(),
            Language::En,
            None,
            default_questions(Language::En),
            Utc::now(),
        );
        for (id, text) in [(1, "2 days"), (2, "forehead"), (3, "4"), (4, "none"), (5, "screens")] {
            conversation.answers.push(Answer {
                question_id: id,
                text: text.to_string(),
                is_valid: true,
                feedback: None,
                answered_at: Utc::now(),
            });
        }
        conversation.current_step = 6;
        conversation
    }

    const REPORT: &str = r#"```json
{
  "symptom": "Mild headache",
  "duration": "2 days",
  "location": "Forehead",
  "severity": 4,
  "associated_symptoms": ["tiredness"],
  "medical_history": "None reported",
  "triggers": ["screens", "stress"],
  "possible_conditions": "Tension headache",
  "recommendations": ["Rest", "Drink water"],
  "urgency_level": "green"
}
```"#;

    #[tokio::test]
    async fn test_report_parsed_leniently() {
        let gateway = Arc::new(crate::gateway::ScriptedGateway::new().on(PROMPT_TAG, REPORT));
        let report = ReportGenerator::new(gateway)
            .generate(&answered_conversation())
            .await
            .unwrap();

        assert_eq!(report.urgency_level, "GREEN");
        assert_eq!(report.severity, "4");
        assert_eq!(report.triggers, "screens, stress");
        assert_eq!(report.possible_conditions, vec!["Tension headache"]);
        assert_eq!(report.recommendations.len(), 2);
        assert!(report.remedy.is_none());
    }

    #[tokio::test]
    async fn test_prompt_contains_every_answer() {
        let gateway = Arc::new(crate::gateway::ScriptedGateway::new().on(PROMPT_TAG, REPORT));
        ReportGenerator::new(gateway.clone())
            .generate(&answered_conversation())
            .await
            .unwrap();

        let prompts = gateway.prompts();
        assert_eq!(prompts.len(), 1);
        for answer in ["2 days", "forehead", "screens"] {
            assert!(prompts[0].contains(answer));
        }
    }

    #[tokio::test]
    async fn test_missing_urgency_is_fatal() {
        let gateway = Arc::new(
            crate::gateway::ScriptedGateway::new().on(PROMPT_TAG, r#"{"symptom": "headache"}"#),
        );
        let err = ReportGenerator::new(gateway)
            .generate(&answered_conversation())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::ReportGenerationFailed { ref conversation_id, .. } if conversation_id == "c-1"
        ));
    }

    #[tokio::test]
    async fn test_prose_reply_is_fatal() {
        let gateway = Arc::new(
            crate::gateway::ScriptedGateway::new()
                .on(PROMPT_TAG, "You probably have a tension headache."),
        );
        let err = ReportGenerator::new(gateway)
            .generate(&answered_conversation())
            .await
            .unwrap_err();

        assert!(matches!(
            err.gateway_error(),
            Some(GatewayError::Malformed(_))
        ));
    }
}
