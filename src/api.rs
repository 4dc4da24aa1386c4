//! HTTP API handlers for Tena.
//!
//! Thin adapters over the conversation engine, triage classifier, topic
//! mapper, and guidance composer. Failures are rendered by
//! [`Error`](crate::error::Error)'s `IntoResponse` impl.
//!
//! # Logging
//!
//! Handlers log ids, steps, levels, and topic keys. Symptom and answer text is
//! health data and is never logged.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};

use crate::content::{ContentLibrary, TopicSummary};
use crate::conversation::{ConversationEngine, RemedyPipeline};
use crate::error::Result;
use crate::gateway::LanguageModel;
use crate::guidance::GuidanceComposer;
use crate::model::{
    Conversation, GuidanceCard, Language, LanguageQuery, ReportResponse,
    StartConversationRequest, StartConversationResponse, SubmitAnswerRequest,
    SubmitAnswerResponse, TopicMapRequest, TopicMapResponse, TriageRequest, TriageResult,
};
use crate::storage::ConversationStore;
use crate::topics::TopicMapper;
use crate::triage::TriageClassifier;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ConversationEngine>,
    pub triage: Arc<TriageClassifier>,
    pub mapper: Arc<TopicMapper>,
    pub composer: Arc<GuidanceComposer>,
    pub content: Arc<ContentLibrary>,
}

impl AppState {
    /// Wire every component to one gateway, content library, and store.
    pub fn new(
        gateway: Arc<dyn LanguageModel>,
        content: Arc<ContentLibrary>,
        store: Arc<dyn ConversationStore>,
        validate_symptoms: bool,
    ) -> Self {
        let triage = Arc::new(TriageClassifier::new(gateway.clone(), content.clone()));
        let mapper = Arc::new(TopicMapper::new(gateway.clone()));
        let composer = Arc::new(GuidanceComposer::new(content.clone()));
        let remedy = Arc::new(RemedyPipeline::new(
            triage.clone(),
            mapper.clone(),
            composer.clone(),
        ));
        let engine = Arc::new(
            ConversationEngine::new(gateway, store, remedy)
                .with_symptom_validation(validate_symptoms),
        );

        Self {
            engine,
            triage,
            mapper,
            composer,
            content,
        }
    }
}

/// Build the router with every route.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/conversations", post(start_conversation))
        .route("/conversations/:id", get(get_conversation))
        .route("/conversations/:id/answers", post(submit_answer))
        .route("/conversations/:id/report", get(get_report))
        .route("/triage", post(classify_triage))
        .route("/topics", get(list_topics))
        .route("/topics/map", post(map_topic))
        .route("/guidance/:topic_key", get(get_guidance))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// POST /conversations - Start a conversation.
///
/// # Request Body
///
/// ```json
/// {
///     "symptom": "mild headache since this morning",
///     "language": "en",
///     "user_id": "optional-opaque-id"
/// }
/// ```
///
/// # Response
///
/// Returns `201 Created` with the conversation id and first question.
#[instrument(skip(state, request))]
pub async fn start_conversation(
    State(state): State<AppState>,
    Json(request): Json<StartConversationRequest>,
) -> Result<(StatusCode, Json<StartConversationResponse>)> {
    let language = Language::parse(&request.language)?;

    match state
        .engine
        .start(&request.symptom, language, request.user_id)
        .await
    {
        Ok(response) => {
            info!(
                conversation_id = %response.conversation_id,
                language = language.code(),
                "Conversation created"
            );
            Ok((StatusCode::CREATED, Json(response)))
        }
        Err(e) => {
            warn!(language = language.code(), error = %e, "Failed to start conversation");
            Err(e)
        }
    }
}

/// GET /conversations/:id - Current state of a conversation.
#[instrument(skip(state))]
pub async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Conversation>> {
    let conversation = state.engine.get_conversation(&id).await?;
    Ok(Json(conversation))
}

/// POST /conversations/:id/answers - Answer the current question.
///
/// # Request Body
///
/// ```json
/// {
///     "answer": "about two days",
///     "question_id": 1
/// }
/// ```
///
/// `question_id` is optional; when present it must be the current step.
#[instrument(skip(state, request))]
pub async fn submit_answer(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<SubmitAnswerRequest>,
) -> Result<Json<SubmitAnswerResponse>> {
    match state
        .engine
        .submit_answer(&id, &request.answer, request.question_id)
        .await
    {
        Ok(response) => {
            info!(
                conversation_id = %id,
                current_step = response.current_step,
                accepted = response.feedback.is_none(),
                is_complete = response.is_complete,
                "Answer processed"
            );
            Ok(Json(response))
        }
        Err(e) => {
            warn!(conversation_id = %id, error = %e, "Failed to process answer");
            Err(e)
        }
    }
}

/// GET /conversations/:id/report - Final health report.
///
/// `409 Conflict` until the conversation is complete.
#[instrument(skip(state))]
pub async fn get_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ReportResponse>> {
    let report = state.engine.get_report(&id).await?;
    info!(conversation_id = %id, "Report retrieved");
    Ok(Json(report))
}

/// POST /triage - Classify symptom urgency.
///
/// # Response
///
/// ```json
/// {
///     "level": "RED",
///     "flags": ["chest pain"],
///     "message": "Your symptoms may be a medical emergency..."
/// }
/// ```
///
/// A `flags` entry of `"UNCLEAR"` marks a request for clarification rather
/// than a confirmed GREEN verdict.
#[instrument(skip(state, request))]
pub async fn classify_triage(
    State(state): State<AppState>,
    Json(request): Json<TriageRequest>,
) -> Result<Json<TriageResult>> {
    let language = Language::parse(&request.language)?;

    match state.triage.classify(&request.text, language).await {
        Ok(result) => {
            info!(
                level = result.level.as_str(),
                unclear = result.is_unclear(),
                "Triage request served"
            );
            Ok(Json(result))
        }
        Err(e) => {
            warn!(timeout = e.is_gateway_timeout(), error = %e, "Triage failed");
            Err(e)
        }
    }
}

/// POST /topics/map - Map free text to a topic key.
#[instrument(skip(state, request))]
pub async fn map_topic(
    State(state): State<AppState>,
    Json(request): Json<TopicMapRequest>,
) -> Result<Json<TopicMapResponse>> {
    match state.mapper.map_topic(&request.text).await {
        Ok(key) => Ok(Json(TopicMapResponse {
            topic_key: key.as_str().to_string(),
        })),
        Err(e) => {
            warn!(error = %e, "Topic mapping failed");
            Err(e)
        }
    }
}

/// Response for GET /topics.
#[derive(Debug, Serialize)]
pub struct TopicsResponse {
    pub language: Language,
    pub topics: Vec<TopicSummary>,
}

/// GET /topics - Approved topics available in a language.
#[instrument(skip(state))]
pub async fn list_topics(
    State(state): State<AppState>,
    Query(query): Query<LanguageQuery>,
) -> Result<Json<TopicsResponse>> {
    let language = Language::parse(&query.language)?;
    let topics = state.content.approved_topics(language);
    info!(language = language.code(), count = topics.len(), "Topics listed");
    Ok(Json(TopicsResponse { language, topics }))
}

/// GET /guidance/:topic_key - Self-care guidance card.
///
/// # Query Parameters
///
/// - `language` (optional): `en` or `am` (default: `en`)
#[instrument(skip(state))]
pub async fn get_guidance(
    State(state): State<AppState>,
    Path(topic_key): Path<String>,
    Query(query): Query<LanguageQuery>,
) -> Result<Json<GuidanceCard>> {
    let language = Language::parse(&query.language)?;

    match state.composer.compose(&topic_key, language) {
        Ok(card) => {
            info!(topic_key = %card.topic_key, language = language.code(), "Guidance served");
            Ok(Json(card))
        }
        Err(e) => {
            warn!(topic_key = %topic_key, error = %e, "Guidance unavailable");
            Err(e)
        }
    }
}

/// GET /health - Simple health check endpoint.
pub async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::fixtures::library;
    use crate::gateway::ScriptedGateway;
    use crate::storage::Storage;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn app(gateway: ScriptedGateway) -> Router {
        let store = Arc::new(Storage::new("sqlite::memory:").await.unwrap());
        router(AppState::new(
            Arc::new(gateway),
            Arc::new(library()),
            store,
            false,
        ))
    }

    #[tokio::test]
    async fn test_health_via_oneshot() {
        let response = app(ScriptedGateway::new())
            .await
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_language_is_bad_request() {
        let response = app(ScriptedGateway::new())
            .await
            .oneshot(
                Request::get("/guidance/headache?language=fr")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
