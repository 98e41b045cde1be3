//! Wire-level tests for the REST clients against local mock servers.

mod common;

use std::sync::{Arc, Mutex};

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json, Router,
};
use chrono::Utc;
use common::spawn_server;
use serde_json::{json, Value};
use tutor_service::completion::{ChatMessage, CompletionRequest, Role};
use tutor_service::storage::UploadOptions;
use tutor_service::store::StoredMessage;
use tutor_service::{
    AnthropicClient, CompletionClient, CompletionError, ModelTier, ObjectStorage, Store,
    SupabaseClient, TutorError,
};

#[derive(Debug, Clone)]
struct Recorded {
    method: Method,
    path: String,
    query: Option<String>,
    headers: HeaderMap,
    body: Bytes,
}

impl Recorded {
    fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

type Log = Arc<Mutex<Vec<Recorded>>>;

async fn mock_server(respond: fn(&Recorded) -> Response) -> (String, Log) {
    let log: Log = Arc::default();
    let router = Router::new()
        .fallback(
            |State((log, respond)): State<(Log, fn(&Recorded) -> Response)>,
             method: Method,
             uri: Uri,
             headers: HeaderMap,
             body: Bytes| async move {
                let recorded = Recorded {
                    method,
                    path: uri.path().to_string(),
                    query: uri.query().map(str::to_string),
                    headers,
                    body,
                };
                let response = respond(&recorded);
                log.lock().unwrap().push(recorded);
                response
            },
        )
        .with_state((Arc::clone(&log), respond));
    let addr = spawn_server(router).await;
    (format!("http://{addr}"), log)
}

// ============================================================================
// Completion client
// ============================================================================

fn anthropic_ok(_: &Recorded) -> Response {
    Json(json!({
        "id": "msg_1",
        "type": "message",
        "role": "assistant",
        "content": [{"type": "text", "text": "Bring down the next digit."}],
        "stop_reason": "end_turn"
    }))
    .into_response()
}

fn anthropic_rate_limited(_: &Recorded) -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        [("retry-after", "30")],
        Json(json!({"type": "error"})),
    )
        .into_response()
}

fn anthropic_overloaded(_: &Recorded) -> Response {
    (StatusCode::SERVICE_UNAVAILABLE, "overloaded").into_response()
}

fn anthropic_empty(_: &Recorded) -> Response {
    Json(json!({"content": []})).into_response()
}

fn client(base: &str) -> AnthropicClient {
    AnthropicClient::new("sk-test", "fast-model", "capable-model").with_base_url(base)
}

#[tokio::test]
async fn test_completion_request_shape() {
    let (base, log) = mock_server(anthropic_ok).await;

    let reply = client(&base)
        .complete(CompletionRequest {
            tier: ModelTier::Fast,
            system: Some("You are a tutor.".to_string()),
            messages: vec![
                ChatMessage::user("What is 84 / 4?"),
                ChatMessage::assistant("Start with 8."),
                ChatMessage::user("Then?"),
            ],
            max_tokens: 2048,
        })
        .await
        .unwrap();
    assert_eq!(reply, "Bring down the next digit.");

    let log = log.lock().unwrap();
    let request = &log[0];
    assert_eq!(request.method, Method::POST);
    assert_eq!(request.path, "/v1/messages");
    assert_eq!(request.header("x-api-key"), Some("sk-test"));
    assert_eq!(request.header("anthropic-version"), Some("2023-06-01"));
    let body = request.json();
    assert_eq!(body["model"], "fast-model");
    assert_eq!(body["max_tokens"], 2048);
    assert_eq!(body["system"], "You are a tutor.");
    assert_eq!(body["messages"][1], json!({"role": "assistant", "content": "Start with 8."}));
}

#[tokio::test]
async fn test_capable_tier_selects_capable_model_without_system() {
    let (base, log) = mock_server(anthropic_ok).await;

    client(&base)
        .complete(CompletionRequest::prompt(ModelTier::Capable, "Animate it", 8192))
        .await
        .unwrap();

    let body = log.lock().unwrap()[0].json();
    assert_eq!(body["model"], "capable-model");
    assert!(body.get("system").is_none());
}

#[tokio::test]
async fn test_completion_error_statuses() {
    let (base, _) = mock_server(anthropic_rate_limited).await;
    let err = client(&base)
        .complete(CompletionRequest::prompt(ModelTier::Fast, "hi", 16))
        .await
        .unwrap_err();
    assert!(matches!(err, CompletionError::RateLimited { retry_after: Some(30) }));

    let (base, _) = mock_server(anthropic_overloaded).await;
    let err = client(&base)
        .complete(CompletionRequest::prompt(ModelTier::Fast, "hi", 16))
        .await
        .unwrap_err();
    match err {
        CompletionError::Api { status, message } => {
            assert_eq!(status, 503);
            assert_eq!(message, "overloaded");
        }
        other => panic!("unexpected error: {other}"),
    }

    let (base, _) = mock_server(anthropic_empty).await;
    let err = client(&base)
        .complete(CompletionRequest::prompt(ModelTier::Fast, "hi", 16))
        .await
        .unwrap_err();
    assert!(matches!(err, CompletionError::InvalidResponse(_)));
}

// ============================================================================
// Supabase store and storage
// ============================================================================

fn supabase(request: &Recorded) -> Response {
    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/rest/v1/sessions") => Json(json!([{
            "id": "s1",
            "user_id": "user_1",
            "is_active": true,
            "created_at": "2025-04-01T10:00:00Z"
        }]))
        .into_response(),
        ("GET", "/rest/v1/questions") => Json(json!([])).into_response(),
        ("GET", "/rest/v1/users") => {
            (StatusCode::INTERNAL_SERVER_ERROR, "relation does not exist").into_response()
        }
        ("POST", "/rest/v1/messages") => StatusCode::CREATED.into_response(),
        ("PATCH", "/rest/v1/questions") => StatusCode::NO_CONTENT.into_response(),
        ("POST", "/storage/v1/object/videos/clip.mp4") => {
            Json(json!({"Key": "videos/clip.mp4"})).into_response()
        }
        ("POST", "/storage/v1/object/list/videos") => Json(json!([
            {"name": "old.mp4", "created_at": "2025-01-01T00:00:00Z", "id": "1"},
            {"name": "folder", "created_at": null, "id": null}
        ]))
        .into_response(),
        ("DELETE", "/storage/v1/object/videos") => Json(json!([])).into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

#[tokio::test]
async fn test_supabase_select_and_insert() {
    let (base, log) = mock_server(supabase).await;
    let client = SupabaseClient::new(&base, "service-key");

    let session = client.get_session("s1").await.unwrap().unwrap();
    assert_eq!(session.user_id, "user_1");
    assert!(session.is_active);
    assert!(client.get_question("missing").await.unwrap().is_none());

    client
        .insert_message(&StoredMessage {
            session_id: "s1".to_string(),
            user_id: "user_1".to_string(),
            role: Role::User,
            content: "Hello".to_string(),
            video_url: None,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
    client.set_question_attempts("q1", 2).await.unwrap();

    let log = log.lock().unwrap();
    let select = &log[0];
    assert_eq!(select.header("apikey"), Some("service-key"));
    assert_eq!(select.header("authorization"), Some("Bearer service-key"));
    let query = select.query.clone().unwrap();
    assert!(query.contains("select=*"), "{query}");
    assert!(query.contains("id=eq.s1"), "{query}");

    let insert = &log[2];
    assert_eq!(insert.header("prefer"), Some("return=minimal"));
    assert_eq!(insert.json()["role"], "user");
    assert!(insert.json().get("video_url").is_none());

    let update = &log[3];
    assert_eq!(update.method, Method::PATCH);
    assert_eq!(update.query.as_deref(), Some("id=eq.q1"));
    assert_eq!(update.json(), json!({"attempts": 2}));
}

#[tokio::test]
async fn test_supabase_error_status_maps_to_store_error() {
    let (base, _) = mock_server(supabase).await;
    let client = SupabaseClient::new(&base, "service-key");

    let err = client.get_user("user_1").await.unwrap_err();
    assert!(matches!(err, TutorError::Store { .. }));
    assert!(err.to_string().contains("relation does not exist"));
}

#[tokio::test]
async fn test_supabase_storage_round() {
    let (base, log) = mock_server(supabase).await;
    let client = SupabaseClient::new(&base, "service-key");

    client
        .upload("videos", "clip.mp4", vec![0, 159, 146, 150], &UploadOptions::mp4())
        .await
        .unwrap();
    assert_eq!(
        client.public_url("videos", "clip.mp4"),
        format!("{base}/storage/v1/object/public/videos/clip.mp4")
    );
    let listed = client.list("videos").await.unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed[1].created_at().is_none());
    client
        .remove("videos", &["old.mp4".to_string()])
        .await
        .unwrap();

    let log = log.lock().unwrap();
    let upload = &log[0];
    assert_eq!(upload.header("content-type"), Some("video/mp4"));
    assert_eq!(upload.header("x-upsert"), Some("true"));
    assert_eq!(upload.body.as_ref(), &[0, 159, 146, 150]);

    assert_eq!(log[1].json()["sortBy"]["column"], "name");
    assert_eq!(log[2].json(), json!({"prefixes": ["old.mp4"]}));
}

#[tokio::test]
async fn test_supabase_upload_failure_maps_to_storage_error() {
    let (base, _) = mock_server(supabase).await;
    let client = SupabaseClient::new(&base, "service-key");

    let err = client
        .upload("videos", "other.mp4", vec![1], &UploadOptions::mp4())
        .await
        .unwrap_err();
    assert!(matches!(err, TutorError::Storage { .. }));
}
