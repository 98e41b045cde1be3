//! Relational store collaborator.
//!
//! The service persists sessions, chat messages, questions, and users through
//! the [`Store`] trait. [`MemoryStore`] keeps everything in process;
//! the Supabase backend lives in [`crate::supabase`].

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::completion::Role;
use crate::error::{Result, TutorError};

/// Table names shared by every backend.
pub mod table {
    /// Chat sessions.
    pub const SESSIONS: &str = "sessions";
    /// Chat messages.
    pub const MESSAGES: &str = "messages";
    /// Generated questions.
    pub const QUESTIONS: &str = "questions";
    /// Users mirrored from the identity provider.
    pub const USERS: &str = "users";
}

/// A tutoring session. At most one per user is active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Session id.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Whether this is the user's current session.
    pub is_active: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// A persisted chat turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Session the message belongs to.
    pub session_id: String,
    /// Session owner.
    pub user_id: String,
    /// Speaker.
    pub role: Role,
    /// Message text.
    pub content: String,
    /// Video attached to the message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    /// Creation time; history is ordered by it.
    pub created_at: DateTime<Utc>,
}

/// A generated practice question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    /// Question id.
    pub id: String,
    /// Session the question was asked in.
    pub session_id: String,
    /// Session owner.
    pub user_id: String,
    /// Question text.
    pub question: String,
    /// Topic label.
    pub topic: String,
    /// Difficulty in `[1, 10]`.
    pub difficulty: u8,
    /// Answers submitted so far.
    pub attempts: u32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

fn default_tier() -> String {
    "free".to_string()
}

fn default_status() -> String {
    "active".to_string()
}

/// A user mirrored from the identity provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Identity provider user id.
    pub id: String,
    /// Primary email address.
    pub email: Option<String>,
    /// Given name.
    pub first_name: Option<String>,
    /// Family name.
    pub last_name: Option<String>,
    /// Avatar URL.
    pub image_url: Option<String>,
    /// Billing tier.
    #[serde(default = "default_tier")]
    pub subscription_tier: String,
    /// Account status; `"deleted"` after a delete event.
    #[serde(default = "default_status")]
    pub subscription_status: String,
    /// Provider metadata snapshot.
    #[serde(default)]
    pub metadata: Value,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// Profile fields replaced by a user update event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Primary email address.
    pub email: Option<String>,
    /// Given name.
    pub first_name: Option<String>,
    /// Family name.
    pub last_name: Option<String>,
    /// Avatar URL.
    pub image_url: Option<String>,
    /// Provider metadata snapshot.
    pub metadata: Value,
    /// Update time.
    pub updated_at: DateTime<Utc>,
}

/// Keyed table operations used by the service.
///
/// Lookups return `Ok(None)` for missing rows; callers decide whether that
/// is a not-found error. Updates of missing rows are no-ops.
#[async_trait]
pub trait Store: Send + Sync {
    /// Marks every session of `user_id` inactive.
    async fn deactivate_sessions(&self, user_id: &str) -> Result<()>;

    /// Inserts a session.
    async fn insert_session(&self, session: &Session) -> Result<()>;

    /// Loads a session by id.
    async fn get_session(&self, id: &str) -> Result<Option<Session>>;

    /// Appends a chat message.
    async fn insert_message(&self, message: &StoredMessage) -> Result<()>;

    /// Messages of a session, oldest first.
    async fn list_messages(&self, session_id: &str) -> Result<Vec<StoredMessage>>;

    /// Inserts a question.
    async fn insert_question(&self, question: &Question) -> Result<()>;

    /// Loads a question by id.
    async fn get_question(&self, id: &str) -> Result<Option<Question>>;

    /// Questions of a session, oldest first.
    async fn list_questions(&self, session_id: &str) -> Result<Vec<Question>>;

    /// Overwrites the attempt counter of a question.
    async fn set_question_attempts(&self, id: &str, attempts: u32) -> Result<()>;

    /// Inserts a user.
    async fn insert_user(&self, user: &User) -> Result<()>;

    /// Replaces the profile fields of a user.
    async fn update_user_profile(&self, id: &str, profile: &UserProfile) -> Result<()>;

    /// Sets the account status of a user.
    async fn set_user_status(&self, id: &str, status: &str, updated_at: DateTime<Utc>)
        -> Result<()>;

    /// Loads a user by id.
    async fn get_user(&self, id: &str) -> Result<Option<User>>;
}

#[derive(Debug, Default)]
struct Tables {
    sessions: HashMap<String, Session>,
    messages: Vec<StoredMessage>,
    questions: HashMap<String, Question>,
    users: HashMap<String, User>,
}

/// Process-local store. Data does not survive a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn deactivate_sessions(&self, user_id: &str) -> Result<()> {
        let mut tables = self.tables.lock().await;
        for session in tables.sessions.values_mut() {
            if session.user_id == user_id {
                session.is_active = false;
            }
        }
        Ok(())
    }

    async fn insert_session(&self, session: &Session) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if tables.sessions.contains_key(&session.id) {
            return Err(TutorError::store(format!(
                "{}: duplicate key '{}'",
                table::SESSIONS,
                session.id
            )));
        }
        tables.sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>> {
        Ok(self.tables.lock().await.sessions.get(id).cloned())
    }

    async fn insert_message(&self, message: &StoredMessage) -> Result<()> {
        self.tables.lock().await.messages.push(message.clone());
        Ok(())
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<StoredMessage>> {
        let tables = self.tables.lock().await;
        let mut messages: Vec<StoredMessage> = tables
            .messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }

    async fn insert_question(&self, question: &Question) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if tables.questions.contains_key(&question.id) {
            return Err(TutorError::store(format!(
                "{}: duplicate key '{}'",
                table::QUESTIONS,
                question.id
            )));
        }
        tables.questions.insert(question.id.clone(), question.clone());
        Ok(())
    }

    async fn get_question(&self, id: &str) -> Result<Option<Question>> {
        Ok(self.tables.lock().await.questions.get(id).cloned())
    }

    async fn list_questions(&self, session_id: &str) -> Result<Vec<Question>> {
        let tables = self.tables.lock().await;
        let mut questions: Vec<Question> = tables
            .questions
            .values()
            .filter(|q| q.session_id == session_id)
            .cloned()
            .collect();
        questions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(questions)
    }

    async fn set_question_attempts(&self, id: &str, attempts: u32) -> Result<()> {
        if let Some(question) = self.tables.lock().await.questions.get_mut(id) {
            question.attempts = attempts;
        }
        Ok(())
    }

    async fn insert_user(&self, user: &User) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if tables.users.contains_key(&user.id) {
            return Err(TutorError::store(format!(
                "{}: duplicate key '{}'",
                table::USERS,
                user.id
            )));
        }
        tables.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn update_user_profile(&self, id: &str, profile: &UserProfile) -> Result<()> {
        if let Some(user) = self.tables.lock().await.users.get_mut(id) {
            user.email.clone_from(&profile.email);
            user.first_name.clone_from(&profile.first_name);
            user.last_name.clone_from(&profile.last_name);
            user.image_url.clone_from(&profile.image_url);
            user.metadata = profile.metadata.clone();
            user.updated_at = profile.updated_at;
        }
        Ok(())
    }

    async fn set_user_status(
        &self,
        id: &str,
        status: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        if let Some(user) = self.tables.lock().await.users.get_mut(id) {
            user.subscription_status = status.to_string();
            user.updated_at = updated_at;
        }
        Ok(())
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>> {
        Ok(self.tables.lock().await.users.get(id).cloned())
    }
}
