//! Data models for Tena.
//!
//! Everything that crosses a boundary lives here: the persisted conversation
//! document, triage verdicts, guidance cards, and the request/response bodies
//! of the HTTP API.
//!
//! # Safety Notes
//!
//! - `TriageLevel` is ordered `Green < Yellow < Red` so escalation is a plain `max`.
//! - A `HealthReport` is written once when a conversation completes and never
//!   modified afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Number of follow-up questions asked in every conversation.
pub const TOTAL_STEPS: u32 = 5;

/// Symptom text bounds, in characters.
pub const MIN_SYMPTOM_CHARS: usize = 3;
pub const MAX_SYMPTOM_CHARS: usize = 500;

/// Longest accepted answer to a follow-up question, in characters.
pub const MAX_ANSWER_CHARS: usize = 1000;

/// Flag placed in `TriageResult::flags` when the model could not decide.
///
/// An unclear verdict carries `TriageLevel::Green` so callers that only read
/// the level stay conservative-neutral, but it must never be shown as a
/// confirmed mild result.
pub const UNCLEAR_FLAG: &str = "UNCLEAR";

/// Trim symptom text and check it is within bounds.
pub fn check_symptom_text(text: &str) -> Result<&str, Error> {
    let trimmed = text.trim();
    let chars = trimmed.chars().count();
    if chars < MIN_SYMPTOM_CHARS || chars > MAX_SYMPTOM_CHARS {
        return Err(Error::InvalidInput(format!(
            "symptom text must be {MIN_SYMPTOM_CHARS}-{MAX_SYMPTOM_CHARS} characters, got {chars}"
        )));
    }
    Ok(trimmed)
}

/// Trim an answer and check it is non-empty and within bounds.
pub fn check_answer_text(text: &str) -> Result<&str, Error> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidInput("answer must not be empty".to_string()));
    }
    if trimmed.chars().count() > MAX_ANSWER_CHARS {
        return Err(Error::InvalidInput(format!(
            "answer must be at most {MAX_ANSWER_CHARS} characters"
        )));
    }
    Ok(trimmed)
}

/// Languages with rule sets, question banks, and guidance translations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// English.
    En,
    /// Amharic.
    Am,
}

impl Language {
    /// Parse a language code, rejecting anything unsupported.
    pub fn parse(code: &str) -> Result<Self, Error> {
        match code.trim().to_ascii_lowercase().as_str() {
            "en" => Ok(Language::En),
            "am" => Ok(Language::Am),
            other => Err(Error::InvalidInput(format!(
                "unsupported language '{other}', expected 'en' or 'am'"
            ))),
        }
    }

    /// The wire/storage code.
    pub fn code(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Am => "am",
        }
    }

    /// English name of the language, used inside model prompts.
    pub fn name(&self) -> &'static str {
        match self {
            Language::En => "English",
            Language::Am => "Amharic",
        }
    }
}

/// Severity bucket produced by triage.
///
/// Ordering matters: when several signals disagree the highest level wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TriageLevel {
    /// Mild; self-care is appropriate.
    Green,
    /// Monitor closely; see a clinician if it persists or worsens.
    Yellow,
    /// Emergency; seek care immediately.
    Red,
}

impl TriageLevel {
    /// Parse a level as written by the model or a rule file.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "RED" => Some(TriageLevel::Red),
            "YELLOW" => Some(TriageLevel::Yellow),
            "GREEN" => Some(TriageLevel::Green),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TriageLevel::Red => "RED",
            TriageLevel::Yellow => "YELLOW",
            TriageLevel::Green => "GREEN",
        }
    }
}

/// Lifecycle status of a conversation.
///
/// `Active` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConversationStatus {
    Active,
    Complete,
    Expired,
}

impl ConversationStatus {
    /// Get the string form for database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStatus::Active => "ACTIVE",
            ConversationStatus::Complete => "COMPLETE",
            ConversationStatus::Expired => "EXPIRED",
        }
    }

    /// Parse from the database form.
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(ConversationStatus::Active),
            "COMPLETE" => Some(ConversationStatus::Complete),
            "EXPIRED" => Some(ConversationStatus::Expired),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fixed question categories, one question each, in asking order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionCategory {
    Duration,
    Location,
    Severity,
    History,
    Triggers,
}

impl QuestionCategory {
    /// All categories in the order they are asked.
    pub const ALL: [QuestionCategory; 5] = [
        QuestionCategory::Duration,
        QuestionCategory::Location,
        QuestionCategory::Severity,
        QuestionCategory::History,
        QuestionCategory::Triggers,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionCategory::Duration => "duration",
            QuestionCategory::Location => "location",
            QuestionCategory::Severity => "severity",
            QuestionCategory::History => "history",
            QuestionCategory::Triggers => "triggers",
        }
    }

    /// Lenient parse used on model output.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "duration" => Some(QuestionCategory::Duration),
            "location" => Some(QuestionCategory::Location),
            "severity" => Some(QuestionCategory::Severity),
            "history" => Some(QuestionCategory::History),
            "triggers" | "trigger" => Some(QuestionCategory::Triggers),
            _ => None,
        }
    }

    /// 1-based question id for this category.
    pub fn step(&self) -> u32 {
        match self {
            QuestionCategory::Duration => 1,
            QuestionCategory::Location => 2,
            QuestionCategory::Severity => 3,
            QuestionCategory::History => 4,
            QuestionCategory::Triggers => 5,
        }
    }
}

/// One generated follow-up question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    /// Dense 1-based id, equal to the step at which it is asked.
    pub id: u32,

    /// Display text in the conversation language.
    pub text: String,

    pub category: QuestionCategory,

    pub required: bool,
}

/// A user's accepted answer to one question.
///
/// Rejected answers are returned to the caller with feedback but never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub question_id: u32,
    pub text: String,
    pub is_valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    pub answered_at: DateTime<Utc>,
}

/// A guided symptom conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// The symptom text that opened the conversation.
    pub symptom: String,

    pub language: Language,

    pub status: ConversationStatus,

    pub questions: Vec<Question>,

    pub answers: Vec<Answer>,

    /// 1-based index of the question being asked; `total_steps + 1` once complete.
    pub current_step: u32,

    pub total_steps: u32,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_report: Option<HealthReport>,
}

impl Conversation {
    /// Create a fresh `Active` conversation positioned at the first question.
    pub fn new(
        id: String,
        symptom: String,
        language: Language,
        user_id: Option<String>,
        questions: Vec<Question>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            symptom,
            language,
            status: ConversationStatus::Active,
            total_steps: questions.len() as u32,
            questions,
            answers: Vec::new(),
            current_step: 1,
            created_at: now,
            updated_at: now,
            completed_at: None,
            final_report: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ConversationStatus::Active
    }

    /// The question at `current_step`, if any remain.
    pub fn current_question(&self) -> Option<&Question> {
        self.questions
            .iter()
            .find(|q| q.id == self.current_step)
    }

    /// Whether the answer at `current_step` would be the last one.
    pub fn is_final_step(&self) -> bool {
        self.current_step >= self.total_steps
    }

    /// Pair every answered question with its answer, in asking order.
    pub fn answered_pairs(&self) -> Vec<(&Question, &Answer)> {
        self.answers
            .iter()
            .filter_map(|a| {
                self.questions
                    .iter()
                    .find(|q| q.id == a.question_id)
                    .map(|q| (q, a))
            })
            .collect()
    }
}

/// Structured summary produced when a conversation completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub symptom: String,
    pub duration: String,
    pub location: String,
    pub severity: String,
    pub associated_symptoms: Vec<String>,
    pub medical_history: String,
    pub triggers: String,
    pub possible_conditions: Vec<String>,
    pub recommendations: Vec<String>,

    /// Urgency estimated by the model from the whole conversation.
    pub urgency_level: String,

    pub generated_at: DateTime<Utc>,

    /// Triage verdict and self-care content for the original symptom, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remedy: Option<Remedy>,
}

/// Triage plus self-care guidance attached to a health report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Remedy {
    pub triage: TriageResult,

    /// `None` when no approved topic fits the symptom.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance: Option<GuidanceCard>,
}

/// Output of the triage classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriageResult {
    pub level: TriageLevel,

    /// Matched rule keywords or model tags. Contains [`UNCLEAR_FLAG`] when
    /// the model asked for clarification.
    pub flags: Vec<String>,

    /// Localized, user-facing message.
    pub message: String,
}

impl TriageResult {
    /// Whether this result is a clarification request rather than a verdict.
    pub fn is_unclear(&self) -> bool {
        self.flags.iter().any(|f| f == UNCLEAR_FLAG)
    }
}

/// Self-care card assembled from approved content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuidanceCard {
    pub topic_key: String,
    pub language: Language,
    pub title: String,
    pub summary: String,
    pub self_care: Vec<String>,
    pub over_the_counter: Vec<String>,
    pub seek_care_when: Vec<String>,
    pub disclaimer: String,
}

// ============================================================================
// HTTP request/response bodies
// ============================================================================

/// Request body for POST /conversations.
#[derive(Debug, Clone, Deserialize)]
pub struct StartConversationRequest {
    pub symptom: String,

    /// Language code (default: "en").
    #[serde(default = "default_language")]
    pub language: String,

    #[serde(default)]
    pub user_id: Option<String>,
}

/// Response for POST /conversations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartConversationResponse {
    pub conversation_id: String,
    pub first_question: Question,
    pub total_steps: u32,
    pub current_step: u32,
}

/// Request body for POST /conversations/:id/answers.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitAnswerRequest {
    pub answer: String,

    /// Question being answered. When present it must match the current step.
    #[serde(default)]
    pub question_id: Option<u32>,
}

/// Response for POST /conversations/:id/answers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitAnswerResponse {
    /// The question to ask next; the same question again when the answer was rejected.
    pub next_question: Option<Question>,

    /// Why the answer was rejected; `None` when it was accepted.
    pub feedback: Option<String>,

    pub is_complete: bool,
    pub current_step: u32,
    pub total_steps: u32,
}

/// Response for GET /conversations/:id/report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportResponse {
    pub conversation_id: String,
    pub report: HealthReport,
}

/// Request body for POST /triage.
#[derive(Debug, Clone, Deserialize)]
pub struct TriageRequest {
    pub text: String,

    #[serde(default = "default_language")]
    pub language: String,
}

/// Request body for POST /topics/map.
#[derive(Debug, Clone, Deserialize)]
pub struct TopicMapRequest {
    pub text: String,
}

/// Response for POST /topics/map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicMapResponse {
    pub topic_key: String,
}

/// Query parameters for GET /guidance/:topic_key and GET /topics.
#[derive(Debug, Deserialize)]
pub struct LanguageQuery {
    /// Language code (default: "en").
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_language() -> String {
    "en".to_string()
}
