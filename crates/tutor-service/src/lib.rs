//! Tutoring service.
//!
//! Chat sessions, adaptive practice questions, sandboxed explanation videos,
//! identity-provider webhooks, and the HTTP API that exposes them.

pub mod api;
pub mod chat;
pub mod completion;
pub mod config;
pub mod error;
pub mod prompts;
pub mod questions;
pub mod storage;
pub mod store;
pub mod structured;
pub mod supabase;
pub mod video;
pub mod webhook;

#[cfg(test)]
mod test_support;

pub use api::{create_router, AppState, ErrorResponse};
pub use chat::{ChatReply, ChatService, SessionCreated};
pub use completion::{AnthropicClient, CompletionClient, CompletionError, ModelTier};
pub use config::{Config, Credentials, SandboxConfig, StorageConfig, StoreBackend};
pub use error::{Result, TutorError};
pub use questions::{AnswerVerdict, NextQuestion, QuestionEngine};
pub use storage::{MemoryStorage, ObjectStorage};
pub use store::{MemoryStore, Store};
pub use supabase::SupabaseClient;
pub use video::{CleanupReport, VideoPipeline, VideoResult, VideoStatus};
pub use webhook::WebhookHandler;
