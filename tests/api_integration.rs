//! Integration tests for Tena API endpoints.
//!
//! These tests drive the full router with a scripted language model, the
//! bundled content files, and an in-memory database.

use std::path::Path;
use std::sync::Arc;

use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::{Value, json};

use tena::api::{AppState, router};
use tena::content::ContentLibrary;
use tena::conversation::{questions, report, validation};
use tena::gateway::{GatewayError, ScriptedGateway};
use tena::storage::Storage;
use tena::{topics, triage};

const VALID: &str = r#"{"valid": true}"#;

const REPORT: &str = r#"```json
{"symptom": "mild headache", "duration": "2 days", "location": "forehead",
 "severity": "3/10", "associated_symptoms": ["tired eyes"],
 "medical_history": "none", "triggers": "screen time",
 "possible_conditions": ["tension headache"],
 "recommendations": ["rest", "drink water"], "urgency_level": "GREEN"}
```"#;

fn happy_gateway() -> ScriptedGateway {
    ScriptedGateway::new()
        .on(validation::SYMPTOM_PROMPT_TAG, VALID)
        .on(validation::ANSWER_PROMPT_TAG, VALID)
        .on(questions::PROMPT_TAG, "[]")
        .on(report::PROMPT_TAG, REPORT)
        .on(triage::PROMPT_TAG, r#"{"level": "GREEN", "flags": ["mild headache"]}"#)
        .on(topics::PROMPT_TAG, r#"{"topic_key": "headache"}"#)
}

async fn create_test_server(gateway: ScriptedGateway) -> TestServer {
    let content_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("data");
    let content = Arc::new(ContentLibrary::load_dir(&content_dir).unwrap());
    let storage = Storage::new("sqlite::memory:").await.unwrap();

    let state = AppState::new(Arc::new(gateway), content, Arc::new(storage), true);

    TestServer::new(router(state)).unwrap()
}

async fn start(server: &TestServer, symptom: &str) -> String {
    let response = server
        .post("/conversations")
        .json(&json!({ "symptom": symptom, "language": "en" }))
        .await;
    response.assert_status(StatusCode::CREATED);

    let body: Value = response.json();
    body["conversation_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health_endpoint() {
    let server = create_test_server(ScriptedGateway::new()).await;

    let response = server.get("/health").await;

    response.assert_status_ok();
}

#[tokio::test]
async fn test_chest_pain_triage_is_red() {
    let server = create_test_server(ScriptedGateway::new().on(
        triage::PROMPT_TAG,
        r#"{"level": "RED", "flags": ["chest pain", "shortness of breath"]}"#,
    ))
    .await;

    let response = server
        .post("/triage")
        .json(&json!({
            "text": "severe chest pain and shortness of breath",
            "language": "en"
        }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["level"], "RED");
    let flags: Vec<&str> = body["flags"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert!(flags.contains(&"chest pain"));
}

#[tokio::test]
async fn test_triage_gateway_timeout_is_504() {
    let server = create_test_server(ScriptedGateway::new().on_error(
        triage::PROMPT_TAG,
        GatewayError::Timeout(std::time::Duration::from_secs(20)),
    ))
    .await;

    let response = server
        .post("/triage")
        .json(&json!({ "text": "mild headache", "language": "en" }))
        .await;

    response.assert_status(StatusCode::GATEWAY_TIMEOUT);
    let body: Value = response.json();
    assert_eq!(body["timeout"], true);
}

#[tokio::test]
async fn test_triage_rejects_short_text() {
    let server = create_test_server(happy_gateway()).await;

    let response = server
        .post("/triage")
        .json(&json!({ "text": "ok", "language": "en" }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_full_conversation_produces_report() {
    let server = create_test_server(happy_gateway()).await;

    let response = server
        .post("/conversations")
        .json(&json!({ "symptom": "mild headache", "language": "en" }))
        .await;
    response.assert_status(StatusCode::CREATED);
    let started: Value = response.json();
    assert_eq!(started["current_step"], 1);
    assert_eq!(started["total_steps"], 5);
    assert_eq!(started["first_question"]["id"], 1);
    assert_eq!(started["first_question"]["category"], "duration");
    let id = started["conversation_id"].as_str().unwrap().to_string();

    let snapshot: Value = server.get(&format!("/conversations/{id}")).await.json();
    assert_eq!(snapshot["questions"].as_array().unwrap().len(), 5);

    let mut last = Value::Null;
    for step in 1..=5 {
        let response = server
            .post(&format!("/conversations/{id}/answers"))
            .json(&json!({ "answer": format!("answer {step}"), "question_id": step }))
            .await;
        response.assert_status_ok();
        last = response.json();
    }
    assert_eq!(last["is_complete"], true);
    assert!(last["next_question"].is_null());

    let response = server.get(&format!("/conversations/{id}/report")).await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["report"]["urgency_level"], "GREEN");
    assert_eq!(body["report"]["remedy"]["triage"]["level"], "GREEN");
    assert_eq!(
        body["report"]["remedy"]["guidance"]["topic_key"],
        "headache"
    );

    // Immutable once written
    let again = server.get(&format!("/conversations/{id}/report")).await;
    assert_eq!(again.text(), response.text());
}

#[tokio::test]
async fn test_invalid_answer_repeats_question() {
    let gateway = ScriptedGateway::new()
        .on(validation::SYMPTOM_PROMPT_TAG, VALID)
        .on(questions::PROMPT_TAG, "[]")
        .on(
            validation::ANSWER_PROMPT_TAG,
            r#"{"valid": false, "feedback": "Please say how long, for example 2 days."}"#,
        );
    let server = create_test_server(gateway).await;
    let id = start(&server, "mild headache").await;

    let response = server
        .post(&format!("/conversations/{id}/answers"))
        .json(&json!({ "answer": "purple" }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["next_question"]["id"], 1);
    assert_eq!(body["is_complete"], false);
    assert_eq!(body["current_step"], 1);
    assert!(!body["feedback"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_answer_after_completion_conflicts() {
    let server = create_test_server(happy_gateway()).await;
    let id = start(&server, "mild headache").await;
    for _ in 0..5 {
        server
            .post(&format!("/conversations/{id}/answers"))
            .json(&json!({ "answer": "fine" }))
            .await
            .assert_status_ok();
    }

    let response = server
        .post(&format!("/conversations/{id}/answers"))
        .json(&json!({ "answer": "one more" }))
        .await;

    response.assert_status(StatusCode::CONFLICT);
    let snapshot: Value = server.get(&format!("/conversations/{id}")).await.json();
    assert_eq!(snapshot["status"], "COMPLETE");
    assert_eq!(snapshot["answers"].as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn test_out_of_order_answer_conflicts() {
    let server = create_test_server(happy_gateway()).await;
    let id = start(&server, "mild headache").await;

    let response = server
        .post(&format!("/conversations/{id}/answers"))
        .json(&json!({ "answer": "my forehead", "question_id": 2 }))
        .await;

    response.assert_status(StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_report_before_completion_conflicts() {
    let server = create_test_server(happy_gateway()).await;
    let id = start(&server, "mild headache").await;

    let response = server.get(&format!("/conversations/{id}/report")).await;

    response.assert_status(StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_unknown_conversation_is_404() {
    let server = create_test_server(happy_gateway()).await;

    server
        .get("/conversations/does-not-exist")
        .await
        .assert_status(StatusCode::NOT_FOUND);
    server
        .post("/conversations/does-not-exist/answers")
        .json(&json!({ "answer": "2 days" }))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_non_symptom_rejected() {
    let server = create_test_server(ScriptedGateway::new().on(
        validation::SYMPTOM_PROMPT_TAG,
        r#"{"valid": false, "feedback": "Please describe how you feel."}"#,
    ))
    .await;

    let response = server
        .post("/conversations")
        .json(&json!({ "symptom": "what time is it", "language": "en" }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert!(body["error"].as_str().unwrap().contains("Please describe how you feel."));
}

#[tokio::test]
async fn test_unsupported_language_rejected() {
    let server = create_test_server(happy_gateway()).await;

    let response = server
        .post("/conversations")
        .json(&json!({ "symptom": "mild headache", "language": "fr" }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_topic_mapping() {
    let server = create_test_server(happy_gateway()).await;

    let response = server
        .post("/topics/map")
        .json(&json!({ "text": "my head is pounding" }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["topic_key"], "headache");
}

#[tokio::test]
async fn test_hallucinated_topic_is_422() {
    let server = create_test_server(
        ScriptedGateway::new().on(topics::PROMPT_TAG, r#"{"topic_key": "migraine"}"#),
    )
    .await;

    let response = server
        .post("/topics/map")
        .json(&json!({ "text": "my head is pounding" }))
        .await;

    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = response.json();
    assert!(!body["error"].as_str().unwrap().contains("migraine"));
}

#[tokio::test]
async fn test_guidance_lookup() {
    let server = create_test_server(ScriptedGateway::new()).await;

    let response = server.get("/guidance/headache?language=am").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["topic_key"], "headache");
    assert_eq!(body["language"], "am");

    server
        .get("/guidance/common_cold?language=am")
        .await
        .assert_status(StatusCode::NOT_FOUND);
    server
        .get("/guidance/insomnia")
        .await
        .assert_status(StatusCode::NOT_FOUND);
    server
        .get("/guidance/migraine")
        .await
        .assert_status(StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_list_topics() {
    let server = create_test_server(ScriptedGateway::new()).await;

    let en: Value = server.get("/topics").await.json();
    let am: Value = server.get("/topics?language=am").await.json();

    let en_count = en["topics"].as_array().unwrap().len();
    let am_count = am["topics"].as_array().unwrap().len();
    assert!(en_count > am_count);
    assert!(
        en["topics"]
            .as_array()
            .unwrap()
            .iter()
            .all(|t| t["topic_key"] != "insomnia")
    );
}
