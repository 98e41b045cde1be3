//! Supabase backends for the store and object storage collaborators.
//!
//! Tables are reached through `PostgREST` (`/rest/v1`) and videos through the
//! Storage API (`/storage/v1`). Every request carries the admin key both as
//! `apikey` and as a bearer token.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, instrument};

use crate::error::{Result, TutorError};
use crate::storage::{ObjectStorage, StoredObject, UploadOptions};
use crate::store::{table, Question, Session, Store, StoredMessage, User, UserProfile};

/// Page size for bucket listings.
const LIST_PAGE_SIZE: usize = 1000;

/// HTTP client for one Supabase project.
#[derive(Debug, Clone)]
pub struct SupabaseClient {
    http: Client,
    url: String,
    key: String,
}

impl SupabaseClient {
    /// Creates a client for the project at `url` using `key`.
    pub fn new(url: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            url: url.into().trim_end_matches('/').to_string(),
            key: key.into(),
        }
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.key)
            .header("Authorization", format!("Bearer {}", self.key))
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.url)
    }

    fn storage_url(&self, suffix: &str) -> String {
        format!("{}/storage/v1/{suffix}", self.url)
    }

    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        filters: &[(&str, &str)],
        order_by_creation: bool,
    ) -> Result<Vec<T>> {
        let mut query: Vec<(String, String)> = vec![("select".to_string(), "*".to_string())];
        query.extend(
            filters
                .iter()
                .map(|(column, value)| ((*column).to_string(), format!("eq.{value}"))),
        );
        if order_by_creation {
            query.push(("order".to_string(), "created_at.asc".to_string()));
        }

        let response = self
            .authorized(self.http.get(self.rest_url(table)))
            .query(&query)
            .send()
            .await
            .map_err(|e| TutorError::store(format!("{table}: {e}")))?;
        let response = check(response, table, TutorError::store).await?;
        response
            .json()
            .await
            .map_err(|e| TutorError::store(format!("{table}: invalid response: {e}")))
    }

    async fn select_one<T: DeserializeOwned>(&self, table: &str, id: &str) -> Result<Option<T>> {
        Ok(self
            .select(table, &[("id", id)], false)
            .await?
            .into_iter()
            .next())
    }

    async fn insert<T: Serialize + Sync>(&self, table: &str, row: &T) -> Result<()> {
        let response = self
            .authorized(self.http.post(self.rest_url(table)))
            .header("Prefer", "return=minimal")
            .json(row)
            .send()
            .await
            .map_err(|e| TutorError::store(format!("{table}: {e}")))?;
        check(response, table, TutorError::store).await?;
        Ok(())
    }

    async fn update<T: Serialize + Sync>(
        &self,
        table: &str,
        column: &str,
        value: &str,
        patch: &T,
    ) -> Result<()> {
        let response = self
            .authorized(self.http.patch(self.rest_url(table)))
            .query(&[(column, format!("eq.{value}"))])
            .header("Prefer", "return=minimal")
            .json(patch)
            .send()
            .await
            .map_err(|e| TutorError::store(format!("{table}: {e}")))?;
        check(response, table, TutorError::store).await?;
        Ok(())
    }
}

/// Maps an error status to `make(message)`.
async fn check(
    response: Response,
    context: &str,
    make: fn(String) -> TutorError,
) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "(no body)".to_string());
    Err(make(format!("{context}: HTTP {}: {body}", status.as_u16())))
}

#[async_trait]
impl Store for SupabaseClient {
    async fn deactivate_sessions(&self, user_id: &str) -> Result<()> {
        self.update(
            table::SESSIONS,
            "user_id",
            user_id,
            &json!({ "is_active": false }),
        )
        .await
    }

    async fn insert_session(&self, session: &Session) -> Result<()> {
        self.insert(table::SESSIONS, session).await
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>> {
        self.select_one(table::SESSIONS, id).await
    }

    async fn insert_message(&self, message: &StoredMessage) -> Result<()> {
        self.insert(table::MESSAGES, message).await
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<StoredMessage>> {
        self.select(table::MESSAGES, &[("session_id", session_id)], true)
            .await
    }

    async fn insert_question(&self, question: &Question) -> Result<()> {
        self.insert(table::QUESTIONS, question).await
    }

    async fn get_question(&self, id: &str) -> Result<Option<Question>> {
        self.select_one(table::QUESTIONS, id).await
    }

    async fn list_questions(&self, session_id: &str) -> Result<Vec<Question>> {
        self.select(table::QUESTIONS, &[("session_id", session_id)], true)
            .await
    }

    async fn set_question_attempts(&self, id: &str, attempts: u32) -> Result<()> {
        self.update(table::QUESTIONS, "id", id, &json!({ "attempts": attempts }))
            .await
    }

    async fn insert_user(&self, user: &User) -> Result<()> {
        self.insert(table::USERS, user).await
    }

    async fn update_user_profile(&self, id: &str, profile: &UserProfile) -> Result<()> {
        self.update(table::USERS, "id", id, profile).await
    }

    async fn set_user_status(
        &self,
        id: &str,
        status: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        self.update(
            table::USERS,
            "id",
            id,
            &json!({ "subscription_status": status, "updated_at": updated_at }),
        )
        .await
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>> {
        self.select_one(table::USERS, id).await
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ListRequest<'a> {
    prefix: &'a str,
    limit: usize,
    offset: usize,
    sort_by: SortBy<'a>,
}

#[derive(Debug, Serialize)]
struct SortBy<'a> {
    column: &'a str,
    order: &'a str,
}

#[derive(Debug, Deserialize)]
struct ListEntry {
    name: String,
    #[serde(default)]
    created_at: Option<String>,
}

#[async_trait]
impl ObjectStorage for SupabaseClient {
    #[instrument(skip(self, bytes, options), fields(size = bytes.len()))]
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        options: &UploadOptions,
    ) -> Result<()> {
        let context = format!("upload {bucket}/{path}");
        let response = self
            .authorized(self.http.post(self.storage_url(&format!("object/{bucket}/{path}"))))
            .header("content-type", &options.content_type)
            .header("x-upsert", if options.overwrite { "true" } else { "false" })
            .body(bytes)
            .send()
            .await
            .map_err(|e| TutorError::storage(format!("{context}: {e}")))?;
        check(response, &context, TutorError::storage).await?;
        debug!("Object uploaded");
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        self.storage_url(&format!("object/public/{bucket}/{path}"))
    }

    async fn list(&self, bucket: &str) -> Result<Vec<StoredObject>> {
        let context = format!("list {bucket}");
        let mut objects = Vec::new();
        let mut offset = 0;
        loop {
            let request = ListRequest {
                prefix: "",
                limit: LIST_PAGE_SIZE,
                offset,
                sort_by: SortBy {
                    column: "name",
                    order: "asc",
                },
            };
            let response = self
                .authorized(self.http.post(self.storage_url(&format!("object/list/{bucket}"))))
                .json(&request)
                .send()
                .await
                .map_err(|e| TutorError::storage(format!("{context}: {e}")))?;
            let page: Vec<ListEntry> = check(response, &context, TutorError::storage)
                .await?
                .json()
                .await
                .map_err(|e| TutorError::storage(format!("{context}: invalid response: {e}")))?;

            let page_len = page.len();
            objects.extend(page.into_iter().map(|entry| StoredObject {
                name: entry.name,
                created_at: entry.created_at,
            }));
            if page_len < LIST_PAGE_SIZE {
                return Ok(objects);
            }
            offset += page_len;
        }
    }

    async fn remove(&self, bucket: &str, names: &[String]) -> Result<()> {
        let context = format!("remove from {bucket}");
        let response = self
            .authorized(self.http.delete(self.storage_url(&format!("object/{bucket}"))))
            .json(&json!({ "prefixes": names }))
            .send()
            .await
            .map_err(|e| TutorError::storage(format!("{context}: {e}")))?;
        check(response, &context, TutorError::storage).await?;
        Ok(())
    }
}
