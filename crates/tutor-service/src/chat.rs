//! Tutoring sessions and free-form chat.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::completion::{ChatMessage, CompletionClient, CompletionRequest, ModelTier, Role};
use crate::error::{Result, TutorError};
use crate::prompts::CHAT_SYSTEM_PROMPT;
use crate::store::{Session, Store, StoredMessage};

const CHAT_MAX_TOKENS: u32 = 2048;

/// A newly opened session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCreated {
    /// Session id.
    pub session_id: String,
    /// Owning user.
    pub user_id: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// The assistant's answer to a chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatReply {
    /// Assistant turn.
    pub message: ChatMessage,
    /// Question attached to the reply. Chat never attaches one.
    pub question_id: Option<String>,
}

/// Opens sessions and relays chat turns to the fast model.
#[derive(Clone)]
pub struct ChatService {
    store: Arc<dyn Store>,
    completion: Arc<dyn CompletionClient>,
}

impl std::fmt::Debug for ChatService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatService").finish_non_exhaustive()
    }
}

impl ChatService {
    /// Creates a chat service.
    pub fn new(store: Arc<dyn Store>, completion: Arc<dyn CompletionClient>) -> Self {
        Self { store, completion }
    }

    /// Opens a session for `user_id`, deactivating the user's other sessions.
    ///
    /// A caller-chosen `session_id` is used as is; otherwise one is
    /// generated.
    ///
    /// # Errors
    ///
    /// [`TutorError::InvalidRequest`] for a blank user id, and store
    /// failures.
    #[instrument(skip(self))]
    pub async fn create_session(
        &self,
        user_id: &str,
        session_id: Option<String>,
    ) -> Result<SessionCreated> {
        if user_id.trim().is_empty() {
            return Err(TutorError::InvalidRequest("user_id is required".to_string()));
        }
        self.store.deactivate_sessions(user_id).await?;

        let session = Session {
            id: session_id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            user_id: user_id.to_string(),
            is_active: true,
            created_at: Utc::now(),
        };
        self.store.insert_session(&session).await?;
        info!(session_id = %session.id, "Session opened");

        Ok(SessionCreated {
            session_id: session.id,
            user_id: session.user_id,
            created_at: session.created_at,
        })
    }

    /// Sends `content` with the session history and persists both turns.
    ///
    /// Nothing is persisted when the model call fails.
    ///
    /// # Errors
    ///
    /// [`TutorError::SessionNotFound`], [`TutorError::InvalidRequest`] for
    /// blank content, plus store and completion failures.
    #[instrument(skip(self, content))]
    pub async fn send_message(&self, session_id: &str, content: &str) -> Result<ChatReply> {
        if content.trim().is_empty() {
            return Err(TutorError::InvalidRequest("content is required".to_string()));
        }
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| TutorError::SessionNotFound(session_id.to_string()))?;

        let mut conversation: Vec<ChatMessage> = self
            .store
            .list_messages(session_id)
            .await?
            .into_iter()
            .filter(|m| m.role != Role::System)
            .map(|m| ChatMessage {
                role: m.role,
                content: m.content,
            })
            .collect();
        conversation.push(ChatMessage::user(content));

        let answer = self
            .completion
            .complete(CompletionRequest {
                tier: ModelTier::Fast,
                system: Some(CHAT_SYSTEM_PROMPT.to_string()),
                messages: conversation,
                max_tokens: CHAT_MAX_TOKENS,
            })
            .await?;

        let asked_at = Utc::now();
        self.store
            .insert_message(&StoredMessage {
                session_id: session_id.to_string(),
                user_id: session.user_id.clone(),
                role: Role::User,
                content: content.to_string(),
                video_url: None,
                created_at: asked_at,
            })
            .await?;
        self.store
            .insert_message(&StoredMessage {
                session_id: session_id.to_string(),
                user_id: session.user_id,
                role: Role::Assistant,
                content: answer.clone(),
                video_url: None,
                created_at: Utc::now().max(asked_at),
            })
            .await?;

        Ok(ChatReply {
            message: ChatMessage::assistant(answer),
            question_id: None,
        })
    }

    /// Messages of a session, oldest first.
    ///
    /// # Errors
    ///
    /// [`TutorError::SessionNotFound`] and store failures.
    pub async fn list_messages(&self, session_id: &str) -> Result<Vec<StoredMessage>> {
        if self.store.get_session(session_id).await?.is_none() {
            return Err(TutorError::SessionNotFound(session_id.to_string()));
        }
        self.store.list_messages(session_id).await
    }
}
