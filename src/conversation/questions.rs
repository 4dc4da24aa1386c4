//! Follow-up question generation.
//!
//! Always yields exactly one question per [`QuestionCategory`], in category
//! order, with ids `1..=5`. The model drafts the wording; anything it gets
//! wrong (too few, too many, duplicates, no reply at all) is patched from the
//! built-in question bank for the conversation language.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::gateway::{LanguageModel, parse_json};
use crate::model::{Language, Question, QuestionCategory, TOTAL_STEPS};

/// Marker identifying question-generation prompts.
pub const PROMPT_TAG: &str = "TASK: follow_up_questions";

/// Accepted reply shapes: a bare array or `{"questions": [...]}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum QuestionsReply {
    List(Vec<DraftQuestion>),
    Wrapped { questions: Vec<DraftQuestion> },
}

impl QuestionsReply {
    fn into_drafts(self) -> Vec<DraftQuestion> {
        match self {
            QuestionsReply::List(drafts) | QuestionsReply::Wrapped { questions: drafts } => drafts,
        }
    }
}

/// A question as the model wrote it: plain text or an object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DraftQuestion {
    Text(String),
    Detailed {
        #[serde(alias = "question")]
        text: String,
        #[serde(default)]
        category: Option<String>,
    },
}

impl DraftQuestion {
    fn text(&self) -> &str {
        match self {
            DraftQuestion::Text(text) | DraftQuestion::Detailed { text, .. } => text.trim(),
        }
    }

    /// Category name as written, if the draft gave one.
    fn named_category(&self) -> Option<&str> {
        match self {
            DraftQuestion::Detailed {
                category: Some(c), ..
            } if !c.trim().is_empty() => Some(c.trim()),
            _ => None,
        }
    }
}

/// Generates the five follow-up questions for a new conversation.
pub struct QuestionGenerator {
    gateway: Arc<dyn LanguageModel>,
}

impl QuestionGenerator {
    pub fn new(gateway: Arc<dyn LanguageModel>) -> Self {
        Self { gateway }
    }

    /// Generate questions for `symptom`. Never fails: gateway trouble falls
    /// back to the default bank.
    pub async fn generate(&self, symptom: &str, language: Language) -> Vec<Question> {
        let prompt = build_prompt(symptom, language);

        let drafts = match self.gateway.classify(&prompt).await {
            Ok(raw) => match parse_json::<QuestionsReply>(&raw) {
                Ok(reply) => reply.into_drafts(),
                Err(e) => {
                    warn!(error = %e, "Unreadable question list, using default questions");
                    Vec::new()
                }
            },
            Err(e) => {
                warn!(error = %e, "Question generation failed, using default questions");
                Vec::new()
            }
        };

        let drafted = drafts.len();
        let questions = assemble(drafts, language);
        info!(
            drafted,
            language = language.code(),
            "Follow-up questions prepared"
        );
        questions
    }
}

fn build_prompt(symptom: &str, language: Language) -> String {
    let categories = QuestionCategory::ALL
        .iter()
        .map(|c| format!("- {}: {}", c.as_str(), category_hint(*c)))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"{PROMPT_TAG}
You are a friendly health assistant collecting details about a symptom.
Write exactly {TOTAL_STEPS} short follow-up questions in {language_name}, one per category, in this order:
{categories}

Respond ONLY with a JSON array:
[{{"category": "duration", "text": "..."}}, ...]

Symptom:
"""{symptom}""""#,
        language_name = language.name(),
    )
}

fn category_hint(category: QuestionCategory) -> &'static str {
    match category {
        QuestionCategory::Duration => "how long the symptom has lasted",
        QuestionCategory::Location => "where in the body it is felt",
        QuestionCategory::Severity => "how strong it is",
        QuestionCategory::History => "relevant past conditions or medication",
        QuestionCategory::Triggers => "what makes it better or worse",
    }
}

/// Place drafts into category slots and fill the gaps from the bank.
///
/// Only the first five drafts are considered. A draft naming a category
/// takes that slot unless it is already taken. A draft naming a category
/// outside the five is dropped. Drafts without a category fill the remaining
/// empty slots in order.
fn assemble(drafts: Vec<DraftQuestion>, language: Language) -> Vec<Question> {
    let mut slots: [Option<String>; 5] = Default::default();
    let mut uncategorized = Vec::new();

    for draft in drafts.into_iter().take(TOTAL_STEPS as usize) {
        if draft.text().is_empty() {
            continue;
        }
        let Some(name) = draft.named_category() else {
            uncategorized.push(draft.text().to_string());
            continue;
        };
        match QuestionCategory::parse(name) {
            Some(category) => {
                let slot = &mut slots[(category.step() - 1) as usize];
                if slot.is_none() {
                    *slot = Some(draft.text().to_string());
                }
            }
            None => debug!(category = name, "Dropping draft with unknown category"),
        }
    }

    let mut uncategorized = uncategorized.into_iter();
    for slot in slots.iter_mut().filter(|s| s.is_none()) {
        match uncategorized.next() {
            Some(text) => *slot = Some(text),
            None => break,
        }
    }

    QuestionCategory::ALL
        .iter()
        .zip(slots)
        .map(|(category, text)| Question {
            id: category.step(),
            text: text.unwrap_or_else(|| default_question(*category, language).to_string()),
            category: *category,
            required: true,
        })
        .collect()
}

/// Built-in question for `category` in `language`.
pub fn default_question(category: QuestionCategory, language: Language) -> &'static str {
    match (language, category) {
        (Language::En, QuestionCategory::Duration) => {
            "How long have you had this symptom? (for example: 2 hours, 3 days, 1 week)"
        }
        (Language::En, QuestionCategory::Location) => {
            "Where in your body do you feel it?"
        }
        (Language::En, QuestionCategory::Severity) => {
            "How strong is it on a scale from 1 (mild) to 10 (worst)?"
        }
        (Language::En, QuestionCategory::History) => {
            "Do you have any ongoing health conditions, or take any medication?"
        }
        (Language::En, QuestionCategory::Triggers) => {
            "Does anything make it better or worse, such as food, movement, or rest?"
        }
        (Language::Am, QuestionCategory::Duration) => {
            "ይህ ምልክት ከጀመረ ምን ያህል ጊዜ ሆነው? (ለምሳሌ፦ 2 ሰዓት፣ 3 ቀን፣ 1 ሳምንት)"
        }
        (Language::Am, QuestionCategory::Location) => "በሰውነትዎ የት አካባቢ ይሰማዎታል?",
        (Language::Am, QuestionCategory::Severity) => {
            "ከ1 (ቀላል) እስከ 10 (በጣም ከባድ) ባለው መለኪያ ምን ያህል ይጠነክራል?"
        }
        (Language::Am, QuestionCategory::History) => {
            "ቀደም ሲል ያለብዎት የጤና ችግር ወይም የሚወስዱት መድሃኒት አለ?"
        }
        (Language::Am, QuestionCategory::Triggers) => {
            "ምልክቱን የሚያባብሰው ወይም የሚያቀልለው ነገር አለ? (ምግብ፣ እንቅስቃሴ፣ እረፍት)"
        }
    }
}

/// The full default bank for `language`.
pub fn default_questions(language: Language) -> Vec<Question> {
    assemble(Vec::new(), language)
}
