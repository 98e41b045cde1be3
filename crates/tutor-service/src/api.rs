//! HTTP API of the tutoring service.
//!
//! # Endpoints
//!
//! - `GET /` - Health check
//! - `POST /sessions` - Open a session
//! - `POST /messages` - Send a chat message
//! - `GET /messages/:session_id` - Chat history of a session
//! - `GET /questions/next` - Generate the next practice question
//! - `POST /questions/validate` - Judge an answer
//! - `POST /videos/generate` - Render an explanation video
//! - `POST /videos/cleanup` - Delete videos past retention
//! - `POST /webhooks/clerk` - Identity-provider user events
//! - `GET /users/:user_id` - Mirrored user record
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use tutor_service::{create_router, AppState, Config};
//! # use tutor_service::{completion::CompletionClient, storage::MemoryStorage, store::MemoryStore};
//! # async fn example(
//! #     completion: Arc<dyn CompletionClient>,
//! #     sandboxes: Arc<dyn tutor_sandbox::SandboxProvider>,
//! # ) {
//! let state = AppState::new(
//!     &Config::default(),
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(MemoryStorage::new()),
//!     completion,
//!     sandboxes,
//!     None,
//! );
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8000").await.unwrap();
//! axum::serve(listener, create_router(state)).await.unwrap();
//! # }
//! ```

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tutor_sandbox::SandboxProvider;

use crate::chat::{ChatReply, ChatService, SessionCreated};
use crate::completion::CompletionClient;
use crate::config::Config;
use crate::error::TutorError;
use crate::questions::{AnswerVerdict, NextQuestion, QuestionEngine};
use crate::storage::ObjectStorage;
use crate::store::{Store, StoredMessage, User};
use crate::video::{CleanupReport, VideoPipeline, VideoResult};
use crate::webhook::{header, SignatureHeaders, WebhookHandler};

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for `POST /sessions`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSessionRequest {
    /// Owning user.
    pub user_id: String,
    /// Caller-chosen session id.
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Request body for `POST /messages`.
#[derive(Debug, Clone, Deserialize)]
pub struct SendMessageRequest {
    /// Target session.
    pub session_id: String,
    /// Message text.
    pub content: String,
}

/// Response body for `GET /messages/:session_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageHistory {
    /// Messages, oldest first.
    pub messages: Vec<StoredMessage>,
}

/// Query of `GET /questions/next`.
#[derive(Debug, Clone, Deserialize)]
pub struct NextQuestionQuery {
    /// Target session.
    pub session_id: String,
    /// Requested difficulty; clamped to `[1, 10]`.
    #[serde(default)]
    pub difficulty: Option<i64>,
}

/// Request body for `POST /questions/validate`.
#[derive(Debug, Clone, Deserialize)]
pub struct ValidateAnswerRequest {
    /// Session the question was asked in.
    pub session_id: String,
    /// Question being answered.
    pub question_id: String,
    /// The student's answer.
    pub answer: String,
}

/// Request body for `POST /videos/generate`.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateVideoRequest {
    /// Session the question was asked in.
    pub session_id: String,
    /// Question to explain.
    pub question_id: String,
}

/// Error response body returned on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Description of the error.
    pub error: String,
}

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for the HTTP server.
///
/// Every collaborator is built once at startup and shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Sessions and chat.
    pub chat: ChatService,
    /// Practice questions and explanation videos.
    pub questions: QuestionEngine,
    /// Identity-provider events.
    pub webhook: WebhookHandler,
    /// Direct store access for user lookups.
    pub store: Arc<dyn Store>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("chat", &self.chat)
            .field("questions", &self.questions)
            .field("webhook", &self.webhook)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Wires the services from validated configuration and collaborators.
    #[must_use]
    pub fn new(
        config: &Config,
        store: Arc<dyn Store>,
        storage: Arc<dyn ObjectStorage>,
        completion: Arc<dyn CompletionClient>,
        sandboxes: Arc<dyn SandboxProvider>,
        webhook_secret: Option<String>,
    ) -> Self {
        let video = VideoPipeline::new(
            Arc::clone(&completion),
            sandboxes,
            storage,
            config.sandbox.spec(),
            config.storage.bucket.clone(),
            config.retention(),
        );
        Self {
            chat: ChatService::new(Arc::clone(&store), Arc::clone(&completion)),
            questions: QuestionEngine::new(
                Arc::clone(&store),
                completion,
                video,
                config.topic.clone(),
            ),
            webhook: WebhookHandler::new(Arc::clone(&store), webhook_secret),
            store,
        }
    }
}

// ============================================================================
// API Error Type
// ============================================================================

/// Internal error type for API handlers.
#[derive(Debug)]
enum ApiError {
    /// A service call failed.
    Service(TutorError),
    /// A spawned task did not complete.
    Task(String),
}

impl From<TutorError> for ApiError {
    fn from(e: TutorError) -> Self {
        Self::Service(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Service(e) if e.is_not_found() => (StatusCode::NOT_FOUND, e.to_string()),
            Self::Service(e) if e.is_bad_request() => (StatusCode::BAD_REQUEST, e.to_string()),
            Self::Service(e) => {
                error!(error = %e, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            Self::Task(msg) => {
                error!(error = %msg, "Background task failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(ErrorResponse { error: message });
        (status, body).into_response()
    }
}

// ============================================================================
// Router Setup
// ============================================================================

/// Creates the HTTP router with all endpoints, permissive CORS, and request
/// tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_health))
        .route("/sessions", post(handle_create_session))
        .route("/messages", post(handle_send_message))
        .route("/messages/:session_id", get(handle_list_messages))
        .route("/questions/next", get(handle_next_question))
        .route("/questions/validate", post(handle_validate_answer))
        .route("/videos/generate", post(handle_generate_video))
        .route("/videos/cleanup", post(handle_cleanup_videos))
        .route("/webhooks/clerk", post(handle_clerk_webhook))
        .route("/users/:user_id", get(handle_get_user))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(Arc::new(state))
}

// ============================================================================
// Handlers
// ============================================================================

async fn handle_health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "message": "API is running",
        "endpoints": {
            "sessions": "/sessions",
            "messages": "/messages",
            "questions": "/questions/next",
            "validate": "/questions/validate",
        }
    }))
}

async fn handle_create_session(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<Json<SessionCreated>, ApiError> {
    let created = state
        .chat
        .create_session(&request.user_id, request.session_id)
        .await?;
    Ok(Json(created))
}

async fn handle_send_message(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SendMessageRequest>,
) -> Result<Json<ChatReply>, ApiError> {
    let reply = state
        .chat
        .send_message(&request.session_id, &request.content)
        .await?;
    Ok(Json(reply))
}

async fn handle_list_messages(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<MessageHistory>, ApiError> {
    let messages = state.chat.list_messages(&session_id).await?;
    Ok(Json(MessageHistory { messages }))
}

async fn handle_next_question(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NextQuestionQuery>,
) -> Result<Json<NextQuestion>, ApiError> {
    let next = state
        .questions
        .next_question(&query.session_id, query.difficulty)
        .await?;
    Ok(Json(next))
}

async fn handle_validate_answer(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ValidateAnswerRequest>,
) -> Result<Json<AnswerVerdict>, ApiError> {
    let verdict = state
        .questions
        .validate_answer(&request.session_id, &request.question_id, &request.answer)
        .await?;
    Ok(Json(verdict))
}

/// Handler for `POST /videos/generate`.
///
/// Generation runs on its own task so that a dropped connection does not
/// cancel the sandbox session midway.
async fn handle_generate_video(
    State(state): State<Arc<AppState>>,
    Json(request): Json<GenerateVideoRequest>,
) -> Result<Json<VideoResult>, ApiError> {
    info!(question_id = %request.question_id, "Video requested");
    let engine = state.questions.clone();
    let task = tokio::spawn(async move {
        engine
            .generate_video(&request.session_id, &request.question_id)
            .await
    });
    let result = task
        .await
        .map_err(|e| ApiError::Task(format!("video generation task failed: {e}")))?;
    Ok(Json(result))
}

async fn handle_cleanup_videos(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CleanupReport>, ApiError> {
    let report = state.questions.video().cleanup_old_videos(Utc::now()).await?;
    Ok(Json(report))
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn handle_clerk_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let signature = SignatureHeaders {
        id: header_value(&headers, header::ID),
        timestamp: header_value(&headers, header::TIMESTAMP),
        signature: header_value(&headers, header::SIGNATURE),
    };
    let response = state
        .webhook
        .handle(&signature, &body, Utc::now())
        .await
        .map_err(|e| {
            warn!(error = %e, "Webhook rejected");
            e
        })?;
    Ok(Json(response))
}

async fn handle_get_user(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<User>, ApiError> {
    let user = state
        .store
        .get_user(&user_id)
        .await?
        .ok_or(TutorError::UserNotFound(user_id))?;
    Ok(Json(user))
}
