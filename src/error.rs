//! Error types for Tena.
//!
//! Gateway failures are kept in their own [`GatewayError`] so each stage can
//! wrap them with context while callers can still tell a timeout apart from
//! any other failure.

use std::time::Duration;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::model::ConversationStatus;

/// Failure talking to, or understanding, the language model.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// The call did not finish within its deadline.
    #[error("language model call timed out after {0:?}")]
    Timeout(Duration),

    /// Transport failure or non-success status from the provider.
    #[error("language model unavailable: {0}")]
    Unavailable(String),

    /// The model answered, but not in the structure we asked for.
    #[error("malformed model response: {0}")]
    Malformed(String),
}

impl GatewayError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Library error.
#[derive(Debug, Error)]
pub enum Error {
    /// Caller-supplied text or language failed validation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Triage could not produce a verdict. Never replaced by a guessed level.
    #[error("triage classification failed")]
    ClassificationFailed(#[source] GatewayError),

    /// Topic mapping could not get a usable answer from the model.
    #[error("topic mapping failed")]
    TopicMappingFailed(#[source] GatewayError),

    /// The model reported that no approved topic fits the text.
    #[error("no approved topic matches the description")]
    NoMatchingTopic,

    /// A topic key outside the closed enumeration was produced or requested.
    #[error("unknown topic key '{0}'")]
    UnknownTopicKey(String),

    #[error("health report generation failed for conversation {conversation_id}")]
    ReportGenerationFailed {
        conversation_id: String,
        #[source]
        source: GatewayError,
    },

    #[error("conversation {0} not found")]
    ConversationNotFound(String),

    #[error("conversation {id} is {status}, not ACTIVE")]
    ConversationNotActive {
        id: String,
        status: ConversationStatus,
    },

    /// An answer targeted a question other than the one currently asked.
    #[error("answer targets question {submitted}, but the current question is {current}")]
    StepMismatch { current: u32, submitted: u32 },

    #[error("report for conversation {0} is not ready")]
    ReportNotReady(String),

    #[error("no approved content for topic '{0}'")]
    TopicNotFound(String),

    #[error("topic '{topic}' has no '{language}' translation")]
    LanguageNotAvailable { topic: String, language: String },

    /// Concurrent modification detected by the store.
    #[error("conflicting update: {0}")]
    Conflict(String),

    /// A stored row could not be decoded into a conversation.
    #[error("corrupt stored record: {0}")]
    CorruptRecord(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// The gateway failure behind this error, if any.
    pub fn gateway_error(&self) -> Option<&GatewayError> {
        match self {
            Error::ClassificationFailed(e)
            | Error::TopicMappingFailed(e)
            | Error::ReportGenerationFailed { source: e, .. } => Some(e),
            _ => None,
        }
    }

    /// Whether the operation failed because a model call ran out of time.
    pub fn is_gateway_timeout(&self) -> bool {
        self.gateway_error().is_some_and(GatewayError::is_timeout)
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::ConversationNotFound(_)
            | Error::TopicNotFound(_)
            | Error::LanguageNotAvailable { .. } => StatusCode::NOT_FOUND,
            Error::ConversationNotActive { .. }
            | Error::StepMismatch { .. }
            | Error::ReportNotReady(_)
            | Error::Conflict(_) => StatusCode::CONFLICT,
            Error::NoMatchingTopic | Error::UnknownTopicKey(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Error::ClassificationFailed(_)
            | Error::TopicMappingFailed(_)
            | Error::ReportGenerationFailed { .. } => {
                if self.is_gateway_timeout() {
                    StatusCode::GATEWAY_TIMEOUT
                } else {
                    StatusCode::BAD_GATEWAY
                }
            }
            Error::CorruptRecord(_) | Error::Storage(_) | Error::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to show an end user.
    ///
    /// Stage errors render only their own description, never the wrapped
    /// gateway detail, so raw model output cannot leak.
    pub fn public_message(&self) -> String {
        match self {
            Error::CorruptRecord(_) | Error::Storage(_) | Error::Serialization(_) => {
                "internal error".to_string()
            }
            Error::UnknownTopicKey(_) => "unknown topic".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.public_message(),
            "timeout": self.is_gateway_timeout(),
        }));
        (status, body).into_response()
    }
}
