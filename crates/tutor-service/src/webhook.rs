//! Identity-provider webhooks.
//!
//! Deliveries are signed with the Svix scheme: the secret is `whsec_`
//! followed by base64 key bytes, the signed content is
//! `{svix-id}.{svix-timestamp}.{body}`, and `svix-signature` carries one or
//! more space-separated `v1,<base64 hmac-sha256>` entries.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::{info, instrument, warn};

use crate::error::{Result, TutorError};
use crate::store::{Store, User, UserProfile};

type HmacSha256 = Hmac<Sha256>;

/// Maximum distance between the delivery timestamp and now, in seconds.
pub const TIMESTAMP_TOLERANCE_SECS: i64 = 300;

/// Prefix of Svix signing secrets.
pub const SECRET_PREFIX: &str = "whsec_";

/// Header names of a signed delivery.
pub mod header {
    /// Message id.
    pub const ID: &str = "svix-id";
    /// Unix timestamp in seconds.
    pub const TIMESTAMP: &str = "svix-timestamp";
    /// Signature list.
    pub const SIGNATURE: &str = "svix-signature";
}

/// Signature headers of one delivery. Missing headers are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureHeaders {
    /// `svix-id`.
    pub id: Option<String>,
    /// `svix-timestamp`.
    pub timestamp: Option<String>,
    /// `svix-signature`.
    pub signature: Option<String>,
}

fn rejected(message: impl Into<String>) -> TutorError {
    TutorError::WebhookVerification(message.into())
}

fn signing_key(secret: &str) -> Result<Vec<u8>> {
    let encoded = secret.strip_prefix(SECRET_PREFIX).unwrap_or(secret);
    STANDARD
        .decode(encoded.trim())
        .map_err(|e| rejected(format!("signing secret is not valid base64: {e}")))
}

fn mac_for(key: &[u8], id: &str, timestamp: &str, body: &[u8]) -> Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| rejected(format!("unusable signing key: {e}")))?;
    mac.update(id.as_bytes());
    mac.update(b".");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(mac)
}

/// Computes the `v1,<base64>` signature of a delivery.
///
/// # Errors
///
/// [`TutorError::WebhookVerification`] for an undecodable secret.
pub fn sign(secret: &str, id: &str, timestamp: &str, body: &[u8]) -> Result<String> {
    let mac = mac_for(&signing_key(secret)?, id, timestamp, body)?;
    Ok(format!("v1,{}", STANDARD.encode(mac.finalize().into_bytes())))
}

/// Verifies a delivery against `secret` at time `now`.
///
/// # Errors
///
/// [`TutorError::WebhookVerification`] when a header is missing, the
/// timestamp is outside the tolerance, or no `v1` signature matches.
pub fn verify(
    secret: &str,
    headers: &SignatureHeaders,
    body: &[u8],
    now: DateTime<Utc>,
) -> Result<()> {
    let (Some(id), Some(timestamp), Some(signatures)) = (
        headers.id.as_deref(),
        headers.timestamp.as_deref(),
        headers.signature.as_deref(),
    ) else {
        return Err(rejected("missing signature headers"));
    };

    let sent: i64 = timestamp
        .trim()
        .parse()
        .map_err(|_| rejected("invalid timestamp"))?;
    if (now.timestamp() - sent).abs() > TIMESTAMP_TOLERANCE_SECS {
        return Err(rejected("timestamp outside tolerance"));
    }

    let key = signing_key(secret)?;
    for entry in signatures.split_whitespace() {
        let Some(("v1", encoded)) = entry.split_once(',') else {
            continue;
        };
        let Ok(expected) = STANDARD.decode(encoded) else {
            continue;
        };
        if mac_for(&key, id, timestamp, body)?
            .verify_slice(&expected)
            .is_ok()
        {
            return Ok(());
        }
    }
    Err(rejected("no matching signature"))
}

/// An email address entry of a user payload.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailAddress {
    /// Entry id.
    pub id: String,
    /// The address.
    pub email_address: String,
}

/// User object carried by `user.*` events.
#[derive(Debug, Clone, Deserialize)]
pub struct UserPayload {
    /// User id.
    pub id: String,
    /// Given name.
    #[serde(default)]
    pub first_name: Option<String>,
    /// Family name.
    #[serde(default)]
    pub last_name: Option<String>,
    /// Email addresses.
    #[serde(default)]
    pub email_addresses: Vec<EmailAddress>,
    /// Id of the primary email entry.
    #[serde(default)]
    pub primary_email_address_id: Option<String>,
    /// Avatar URL, used when `profile_image_url` is absent.
    #[serde(default)]
    pub image_url: Option<String>,
    /// Preferred avatar URL.
    #[serde(default)]
    pub profile_image_url: Option<String>,
    /// Creation time in milliseconds.
    #[serde(default)]
    pub created_at: Option<i64>,
    /// Update time in milliseconds.
    #[serde(default)]
    pub updated_at: Option<i64>,
    /// Public metadata.
    #[serde(default)]
    pub public_metadata: Value,
}

impl UserPayload {
    fn avatar(&self) -> Option<String> {
        self.profile_image_url
            .clone()
            .or_else(|| self.image_url.clone())
    }
}

/// Address of the primary email entry, or of the first entry when the
/// primary id is absent or does not match any entry.
pub fn extract_primary_email(user: &UserPayload) -> Option<String> {
    user.primary_email_address_id
        .as_deref()
        .and_then(|primary| user.email_addresses.iter().find(|e| e.id == primary))
        .or_else(|| user.email_addresses.first())
        .map(|e| e.email_address.clone())
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct DeletedUser {
    id: String,
}

/// Verifies deliveries and mirrors user events into the store.
#[derive(Clone)]
pub struct WebhookHandler {
    store: Arc<dyn Store>,
    secret: Option<String>,
}

impl std::fmt::Debug for WebhookHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookHandler")
            .field("verifies", &self.secret.is_some())
            .finish_non_exhaustive()
    }
}

impl WebhookHandler {
    /// Creates a handler. Without a secret, signatures are not checked.
    pub fn new(store: Arc<dyn Store>, secret: Option<String>) -> Self {
        if secret.is_none() {
            warn!("No webhook signing secret configured, deliveries will not be verified");
        }
        Self { store, secret }
    }

    /// Verifies and applies one delivery, returning the response body.
    ///
    /// # Errors
    ///
    /// [`TutorError::WebhookVerification`] for bad signatures,
    /// [`TutorError::InvalidRequest`] for unparseable payloads, and store
    /// failures.
    #[instrument(skip_all)]
    pub async fn handle(
        &self,
        headers: &SignatureHeaders,
        body: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Value> {
        if let Some(secret) = &self.secret {
            verify(secret, headers, body, now)?;
        }
        let envelope: Envelope = serde_json::from_slice(body)
            .map_err(|e| TutorError::InvalidRequest(format!("invalid webhook payload: {e}")))?;
        self.apply(&envelope.event_type, envelope.data, now).await
    }

    async fn apply(&self, event: &str, data: Value, now: DateTime<Utc>) -> Result<Value> {
        match event {
            "user.created" => {
                let user: UserPayload = payload(data)?;
                let email = extract_primary_email(&user);
                self.user_created(&user, email.clone(), now).await?;
                info!(user_id = %user.id, "User created");
                Ok(json!({ "status": "success", "event": event, "user_id": user.id, "email": email }))
            }
            "user.updated" => {
                let user: UserPayload = payload(data)?;
                let email = extract_primary_email(&user);
                let profile = UserProfile {
                    email: email.clone(),
                    first_name: user.first_name.clone(),
                    last_name: user.last_name.clone(),
                    image_url: user.avatar(),
                    metadata: json!({
                        "public_metadata": user.public_metadata,
                        "updated_at_ms": user.updated_at,
                    }),
                    updated_at: now,
                };
                self.store.update_user_profile(&user.id, &profile).await?;
                info!(user_id = %user.id, "User updated");
                Ok(json!({ "status": "success", "event": event, "user_id": user.id, "email": email }))
            }
            "user.deleted" => {
                let user: DeletedUser = payload(data)?;
                self.store.set_user_status(&user.id, "deleted", now).await?;
                info!(user_id = %user.id, "User marked deleted");
                Ok(json!({ "status": "success", "event": event, "user_id": user.id }))
            }
            other => {
                info!(event = %other, "Ignoring webhook event");
                Ok(json!({
                    "status": "ignored",
                    "event": other,
                    "message": format!("Event type {other} not handled"),
                }))
            }
        }
    }

    /// Inserts the user, or refreshes the profile when a redelivered
    /// creation finds it already mirrored.
    async fn user_created(
        &self,
        user: &UserPayload,
        email: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let metadata = json!({
            "public_metadata": user.public_metadata,
            "created_at_ms": user.created_at,
        });
        if self.store.get_user(&user.id).await?.is_some() {
            let profile = UserProfile {
                email,
                first_name: user.first_name.clone(),
                last_name: user.last_name.clone(),
                image_url: user.avatar(),
                metadata,
                updated_at: now,
            };
            return self.store.update_user_profile(&user.id, &profile).await;
        }
        self.store
            .insert_user(&User {
                id: user.id.clone(),
                email,
                first_name: user.first_name.clone(),
                last_name: user.last_name.clone(),
                image_url: user.avatar(),
                subscription_tier: "free".to_string(),
                subscription_status: "active".to_string(),
                metadata,
                created_at: now,
                updated_at: now,
            })
            .await
    }
}

fn payload<T: serde::de::DeserializeOwned>(data: Value) -> Result<T> {
    serde_json::from_value(data)
        .map_err(|e| TutorError::InvalidRequest(format!("invalid event data: {e}")))
}
