//! Answer and symptom validation.
//!
//! Validation only protects report quality, so it fails open: when the model
//! is unavailable or replies with something unreadable the input is accepted
//! and a warning is logged. Triage makes the opposite choice.

use std::sync::Arc;

use serde::Deserialize;
use tracing::warn;

use crate::gateway::{LanguageModel, parse_json};
use crate::model::{Language, Question, QuestionCategory};

/// Marker identifying answer-validation prompts.
pub const ANSWER_PROMPT_TAG: &str = "TASK: answer_validation";

/// Marker identifying symptom-validation prompts.
pub const SYMPTOM_PROMPT_TAG: &str = "TASK: symptom_validation";

/// Outcome of a validation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationVerdict {
    pub is_valid: bool,

    /// Why the input was rejected. Empty when valid.
    pub feedback: String,
}

impl ValidationVerdict {
    fn accepted() -> Self {
        Self {
            is_valid: true,
            feedback: String::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct VerdictReply {
    #[serde(alias = "is_valid")]
    valid: bool,
    #[serde(default)]
    feedback: Option<String>,
}

/// Checks answers and opening symptoms with the language model.
pub struct AnswerValidator {
    gateway: Arc<dyn LanguageModel>,
}

impl AnswerValidator {
    pub fn new(gateway: Arc<dyn LanguageModel>) -> Self {
        Self { gateway }
    }

    /// Check that `answer` actually answers `question`.
    pub async fn validate_answer(
        &self,
        question: &Question,
        answer: &str,
        language: Language,
    ) -> ValidationVerdict {
        let prompt = answer_prompt(question, answer, language);
        let verdict = self.ask(&prompt, "answer").await;
        with_default_feedback(verdict, || invalid_answer_feedback(question.category, language))
    }

    /// Check that `symptom` describes a health complaint.
    pub async fn validate_symptom(&self, symptom: &str, language: Language) -> ValidationVerdict {
        let prompt = symptom_prompt(symptom, language);
        let verdict = self.ask(&prompt, "symptom").await;
        with_default_feedback(verdict, || invalid_symptom_feedback(language))
    }

    async fn ask(&self, prompt: &str, stage: &'static str) -> ValidationVerdict {
        let raw = match self.gateway.classify(prompt).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(stage, error = %e, "Validator unavailable, accepting input");
                return ValidationVerdict::accepted();
            }
        };

        match parse_json::<VerdictReply>(&raw) {
            Ok(reply) => ValidationVerdict {
                is_valid: reply.valid,
                feedback: reply.feedback.unwrap_or_default().trim().to_string(),
            },
            Err(e) => {
                warn!(stage, error = %e, "Unreadable validation reply, accepting input");
                ValidationVerdict::accepted()
            }
        }
    }
}

fn with_default_feedback(
    mut verdict: ValidationVerdict,
    default: impl FnOnce() -> &'static str,
) -> ValidationVerdict {
    if verdict.is_valid {
        verdict.feedback.clear();
    } else if verdict.feedback.is_empty() {
        verdict.feedback = default().to_string();
    }
    verdict
}

fn answer_hint(category: QuestionCategory) -> &'static str {
    match category {
        QuestionCategory::Duration => {
            "The answer must state a length of time with a unit (hours, days, weeks) or a starting point."
        }
        QuestionCategory::Location => "The answer must name a body area or say the feeling is general.",
        QuestionCategory::Severity => {
            "The answer must describe intensity, as a number or in words such as mild or severe."
        }
        QuestionCategory::History => {
            "The answer must mention past conditions or medication, or clearly say there are none."
        }
        QuestionCategory::Triggers => {
            "The answer must mention something that changes the symptom, or clearly say nothing does."
        }
    }
}

fn answer_prompt(question: &Question, answer: &str, language: Language) -> String {
    format!(
        r#"{ANSWER_PROMPT_TAG}
You check whether a patient's answer responds to a follow-up question.
Category: {category}
{hint}
Short or informal answers are fine. Reject only answers that do not address the question.
Write any feedback in {language_name}, as one short sentence telling the patient what is missing.

Respond ONLY with JSON: {{"valid": true|false, "feedback": "..."}}

Question: {question}
Answer:
"""{answer}""""#,
        category = question.category.as_str(),
        hint = answer_hint(question.category),
        language_name = language.name(),
        question = question.text,
    )
}

fn symptom_prompt(symptom: &str, language: Language) -> String {
    format!(
        r#"{SYMPTOM_PROMPT_TAG}
You check whether a message describes a health symptom or complaint.
Greetings, questions unrelated to health, and random text are not symptoms.
Write any feedback in {language_name}, as one short sentence asking the user to describe how they feel.

Respond ONLY with JSON: {{"valid": true|false, "feedback": "..."}}

Message:
"""{symptom}""""#,
        language_name = language.name(),
    )
}

fn invalid_answer_feedback(category: QuestionCategory, language: Language) -> &'static str {
    match (language, category) {
        (Language::En, QuestionCategory::Duration) => {
            "Please tell us how long, for example \"since yesterday\" or \"3 days\"."
        }
        (Language::En, QuestionCategory::Location) => "Please tell us where in your body you feel it.",
        (Language::En, QuestionCategory::Severity) => {
            "Please rate how strong it is, for example from 1 to 10."
        }
        (Language::En, _) => "Please answer the question so we can understand your symptom.",
        (Language::Am, QuestionCategory::Duration) => {
            "እባክዎ ምን ያህል ጊዜ እንደሆነ ይንገሩን፤ ለምሳሌ \"ከትናንት ጀምሮ\" ወይም \"3 ቀን\"።"
        }
        (Language::Am, QuestionCategory::Location) => "እባክዎ በሰውነትዎ የት እንደሚሰማዎት ይንገሩን።",
        (Language::Am, QuestionCategory::Severity) => {
            "እባክዎ ምን ያህል እንደሚጠነክር ከ1 እስከ 10 ይግለጹ።"
        }
        (Language::Am, _) => "ምልክትዎን እንድንረዳ እባክዎ ጥያቄውን ይመልሱ።",
    }
}

fn invalid_symptom_feedback(language: Language) -> &'static str {
    match language {
        Language::En => "Please describe a health symptom, for example \"headache since morning\".",
        Language::Am => "እባክዎ የሚሰማዎትን የጤና ምልክት ይግለጹ፤ ለምሳሌ \"ከጠዋት ጀምሮ ራስ ምታት\"።",
    }
}
