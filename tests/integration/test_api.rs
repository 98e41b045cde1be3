//! End-to-end tests for the HTTP API
//!
//! A real server is bound to an ephemeral port and driven with `reqwest`.
//! External services are replaced by in-process fakes.

mod common;

use std::path::PathBuf;
use std::sync::Arc;

use common::{
    spawn_server, Breakage, FakeSandboxes, ScriptedCompletion, EXPLANATION_REPLY, PROGRAM_REPLY,
};
use serde_json::{json, Value};
use tutor_service::{create_router, AppState, Config, MemoryStorage, MemoryStore, StoreBackend};

fn fixture_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
}

async fn start(replies: &[&str], sandboxes: Arc<FakeSandboxes>) -> String {
    let config = Config::load_from_file(&fixture_path().join("tutor.json")).unwrap();
    let state = AppState::new(
        &config,
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryStorage::new()),
        ScriptedCompletion::new(replies),
        sandboxes,
        None,
    );
    let addr = spawn_server(create_router(state)).await;
    format!("http://{addr}")
}

async fn post(base: &str, path: &str, body: &Value) -> (u16, Value) {
    let response = reqwest::Client::new()
        .post(format!("{base}{path}"))
        .json(body)
        .send()
        .await
        .unwrap();
    let status = response.status().as_u16();
    (status, response.json().await.unwrap())
}

async fn get(base: &str, path: &str) -> (u16, Value) {
    let response = reqwest::get(format!("{base}{path}")).await.unwrap();
    let status = response.status().as_u16();
    (status, response.json().await.unwrap())
}

/// The sample config fixture loads and validates.
#[test]
fn test_sample_config_loads() {
    let config = Config::load_from_file(&fixture_path().join("tutor.json")).unwrap();
    config.validate().unwrap();

    assert_eq!(config.port, 8080);
    assert_eq!(config.fast_model, "claude-haiku-4-5-20251001");
    assert_eq!(config.sandbox.memory_mb, 4096);
    assert_eq!(config.storage.retention_hours, 24);
    assert_eq!(config.store, StoreBackend::Memory);
}

/// A student opens a session, misses a question three times, and gets a
/// video.
#[tokio::test]
async fn test_tutoring_session_end_to_end() {
    let sandboxes = FakeSandboxes::new(b"\x00\x00\x00\x18ftypmp42", Breakage::None);
    let base = start(
        &[
            r#"{"question": "12 ÷ 3 = ?", "topic": "Long Division"}"#,
            r#"{"correct": false, "feedback": "Count the groups again."}"#,
            r#"{"correct": false, "feedback": "Count the groups again."}"#,
            r#"{"hint": "How many 3s fit in 12?"}"#,
            r#"{"correct": false, "feedback": "12 / 3 is 4."}"#,
            EXPLANATION_REPLY,
            PROGRAM_REPLY,
        ],
        Arc::clone(&sandboxes),
    )
    .await;

    let (status, health) = get(&base, "/").await;
    assert_eq!(status, 200);
    assert_eq!(health["message"], "API is running");

    let (status, session) = post(&base, "/sessions", &json!({"user_id": "student_1"})).await;
    assert_eq!(status, 200);
    let session_id = session["session_id"].as_str().unwrap().to_string();

    let (status, next) = get(&base, &format!("/questions/next?session_id={session_id}")).await;
    assert_eq!(status, 200);
    assert_eq!(next["question"], "12 ÷ 3 = ?");
    assert_eq!(next["difficulty"], 1);
    let question_id = next["question_id"].as_str().unwrap().to_string();

    let answer = json!({"session_id": session_id, "question_id": question_id, "answer": "3"});
    let (_, first) = post(&base, "/questions/validate", &answer).await;
    assert_eq!(first["feedback"], "Incorrect. Please try again.");
    let (_, second) = post(&base, "/questions/validate", &answer).await;
    assert_eq!(
        second["feedback"],
        "Not quite right. Here's a hint: How many 3s fit in 12?"
    );
    let (_, third) = post(&base, "/questions/validate", &answer).await;
    assert_eq!(third["attempts"], 3);
    assert_eq!(third["offer_video"], true);
    assert_eq!(third["feedback"], "That's not correct. 12 / 3 is 4.");

    let (status, video) = post(
        &base,
        "/videos/generate",
        &json!({"session_id": session_id, "question_id": question_id}),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(video["status"], "completed");
    assert!(video["error"].is_null());
    assert_eq!(sandboxes.counters.deleted(), 1);
}

/// Video failures are reported in the body, not as HTTP errors.
#[tokio::test]
async fn test_failed_video_is_a_normal_response() {
    let sandboxes = FakeSandboxes::new(b"unused", Breakage::NoVideo);
    let base = start(
        &[
            r#"{"question": "12 ÷ 3 = ?"}"#,
            EXPLANATION_REPLY,
            PROGRAM_REPLY,
        ],
        Arc::clone(&sandboxes),
    )
    .await;
    let (_, session) = post(&base, "/sessions", &json!({"user_id": "student_2"})).await;
    let session_id = session["session_id"].as_str().unwrap().to_string();
    let (_, next) = get(&base, &format!("/questions/next?session_id={session_id}")).await;

    let (status, video) = post(
        &base,
        "/videos/generate",
        &json!({"session_id": session_id, "question_id": next["question_id"]}),
    )
    .await;

    assert_eq!(status, 200);
    assert_eq!(video["status"], "failed");
    assert!(video["video_url"].is_null());
    assert!(video["error"].as_str().unwrap().starts_with("Video not found."));
    assert_eq!(sandboxes.counters.deleted(), 1);
}

/// Errors use the `{"error": ...}` body with matching status codes.
#[tokio::test]
async fn test_error_statuses() {
    let base = start(&[], FakeSandboxes::new(b"", Breakage::None)).await;

    let (status, body) = post(
        &base,
        "/messages",
        &json!({"session_id": "nope", "content": "hi"}),
    )
    .await;
    assert_eq!(status, 404);
    assert_eq!(body["error"], "Session not found: nope");

    let (status, body) = post(&base, "/sessions", &json!({"user_id": ""})).await;
    assert_eq!(status, 400);
    assert!(body["error"].as_str().unwrap().contains("user_id"));

    let (status, body) = get(&base, "/users/ghost").await;
    assert_eq!(status, 404);
    assert_eq!(body["error"], "User not found: ghost");
}
