//! Conversation state machine.
//!
//! ```text
//! ACTIVE(step 1) --valid answer--> ACTIVE(step 2) ... ACTIVE(step 5) --valid answer--> COMPLETE
//!      |                                                   |
//!      +------------------- reaper ------------------------+--> EXPIRED
//! ```
//!
//! An invalid answer leaves the conversation untouched and re-asks the same
//! question. Every model call of a transition happens before the single store
//! write that commits it, so dropping a request future mid-flight never
//! leaves a half-applied step behind.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};

use super::questions::QuestionGenerator;
use super::remedy::RemedyPipeline;
use super::report::ReportGenerator;
use super::validation::AnswerValidator;
use crate::error::{Error, Result};
use crate::gateway::LanguageModel;
use crate::model::{
    Answer, Conversation, ConversationStatus, Language, ReportResponse,
    StartConversationResponse, SubmitAnswerResponse, check_answer_text, check_symptom_text,
};
use crate::storage::ConversationStore;

/// Drives conversations from first question to final report.
pub struct ConversationEngine {
    store: Arc<dyn ConversationStore>,
    questions: QuestionGenerator,
    validator: AnswerValidator,
    reports: ReportGenerator,
    remedy: Arc<RemedyPipeline>,
    validate_symptoms: bool,
}

impl ConversationEngine {
    pub fn new(
        gateway: Arc<dyn LanguageModel>,
        store: Arc<dyn ConversationStore>,
        remedy: Arc<RemedyPipeline>,
    ) -> Self {
        Self {
            store,
            questions: QuestionGenerator::new(gateway.clone()),
            validator: AnswerValidator::new(gateway.clone()),
            reports: ReportGenerator::new(gateway),
            remedy,
            validate_symptoms: true,
        }
    }

    /// Ask the model whether the opening text is a symptom before starting.
    pub fn with_symptom_validation(mut self, enabled: bool) -> Self {
        self.validate_symptoms = enabled;
        self
    }

    /// Start a conversation about `symptom`.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` for out-of-bounds text, or text the validator says is
    ///   not a symptom (the message carries the validator's feedback)
    /// - `Storage` if the conversation cannot be saved
    #[instrument(skip(self, symptom, language, user_id), fields(language = language.code()))]
    pub async fn start(
        &self,
        symptom: &str,
        language: Language,
        user_id: Option<String>,
    ) -> Result<StartConversationResponse> {
        let symptom = check_symptom_text(symptom)?;

        if self.validate_symptoms {
            let verdict = self.validator.validate_symptom(symptom, language).await;
            if !verdict.is_valid {
                info!("Opening text rejected as not a symptom");
                return Err(Error::InvalidInput(verdict.feedback));
            }
        }

        let questions = self.questions.generate(symptom, language).await;
        let conversation = Conversation::new(
            uuid::Uuid::new_v4().to_string(),
            symptom.to_string(),
            language,
            user_id,
            questions,
            Utc::now(),
        );
        self.store.create(&conversation).await?;

        let first_question = conversation
            .current_question()
            .cloned()
            .ok_or_else(|| Error::CorruptRecord("conversation has no questions".to_string()))?;

        info!(conversation_id = %conversation.id, "Conversation started");

        Ok(StartConversationResponse {
            conversation_id: conversation.id,
            first_question,
            total_steps: conversation.total_steps,
            current_step: conversation.current_step,
        })
    }

    /// Submit an answer to the current question.
    ///
    /// When `question_id` is given it must equal the current step.
    ///
    /// # Errors
    ///
    /// - `ConversationNotFound`, `ConversationNotActive`, `StepMismatch`
    /// - `InvalidInput` for an empty or oversized answer
    /// - `ReportGenerationFailed` on the last step; nothing is stored and the
    ///   last answer can be submitted again
    /// - `Conflict` if another submission advanced the conversation first
    #[instrument(skip(self, id, answer), fields(conversation_id = %id))]
    pub async fn submit_answer(
        &self,
        id: &str,
        answer: &str,
        question_id: Option<u32>,
    ) -> Result<SubmitAnswerResponse> {
        let conversation = self.load(id).await?;

        if !conversation.is_active() {
            return Err(Error::ConversationNotActive {
                id: id.to_string(),
                status: conversation.status,
            });
        }
        let step = conversation.current_step;
        if let Some(submitted) = question_id
            && submitted != step
        {
            return Err(Error::StepMismatch {
                current: step,
                submitted,
            });
        }

        let text = check_answer_text(answer)?;
        let question = conversation.current_question().cloned().ok_or_else(|| {
            Error::CorruptRecord(format!("conversation {id} has no question for step {step}"))
        })?;

        let verdict = self
            .validator
            .validate_answer(&question, text, conversation.language)
            .await;

        if !verdict.is_valid {
            info!(step, "Answer rejected, asking again");
            return Ok(SubmitAnswerResponse {
                next_question: Some(question),
                feedback: Some(verdict.feedback),
                is_complete: false,
                current_step: step,
                total_steps: conversation.total_steps,
            });
        }

        let answer = Answer {
            question_id: question.id,
            text: text.to_string(),
            is_valid: true,
            feedback: None,
            answered_at: Utc::now(),
        };

        if conversation.is_final_step() {
            return self.finish(conversation, answer).await;
        }

        let updated = self.store.append_answer(id, step, &answer).await?;
        info!(step, next_step = updated.current_step, "Answer accepted");

        Ok(SubmitAnswerResponse {
            next_question: updated.current_question().cloned(),
            feedback: None,
            is_complete: false,
            current_step: updated.current_step,
            total_steps: updated.total_steps,
        })
    }

    /// Generate the report for the last answer and commit both at once.
    async fn finish(&self, conversation: Conversation, answer: Answer) -> Result<SubmitAnswerResponse> {
        let step = conversation.current_step;

        let mut answered = conversation.clone();
        answered.answers.push(answer.clone());
        answered.current_step += 1;

        let mut report = self.reports.generate(&answered).await?;
        report.remedy = self
            .remedy
            .build(&conversation.symptom, conversation.language)
            .await;
        if report.remedy.is_none() {
            warn!(conversation_id = %conversation.id, "Report completed without remedy");
        }

        let completed = self
            .store
            .complete_with_answer(&conversation.id, step, &answer, &report)
            .await?;

        info!(
            conversation_id = %completed.id,
            urgency = %report.urgency_level,
            "Conversation complete"
        );

        Ok(SubmitAnswerResponse {
            next_question: None,
            feedback: None,
            is_complete: true,
            current_step: completed.current_step,
            total_steps: completed.total_steps,
        })
    }

    /// The final report of a completed conversation.
    pub async fn get_report(&self, id: &str) -> Result<ReportResponse> {
        let conversation = self.load(id).await?;

        match (conversation.status, conversation.final_report) {
            (ConversationStatus::Complete, Some(report)) => Ok(ReportResponse {
                conversation_id: conversation.id,
                report,
            }),
            _ => Err(Error::ReportNotReady(id.to_string())),
        }
    }

    /// Snapshot of a conversation.
    pub async fn get_conversation(&self, id: &str) -> Result<Conversation> {
        self.load(id).await
    }

    /// Expire active conversations older than `max_age`.
    pub async fn expire_stale(&self, max_age: chrono::Duration) -> Result<u64> {
        let expired = self.store.expire_before(Utc::now() - max_age).await?;
        if expired > 0 {
            info!(expired, "Expired stale conversations");
        }
        Ok(expired)
    }

    async fn load(&self, id: &str) -> Result<Conversation> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| Error::ConversationNotFound(id.to_string()))
    }
}
