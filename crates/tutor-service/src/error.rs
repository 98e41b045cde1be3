//! Error types for the tutoring service.
//!
//! This module defines the error hierarchy for every service operation,
//! including configuration loading, completion calls, structured-output
//! recovery, the render pipeline, storage, and webhook verification.

use std::path::PathBuf;

use tutor_sandbox::{SandboxError, TransportError};

use crate::completion::CompletionError;

/// A specialized `Result` type for tutoring service operations.
pub type Result<T> = std::result::Result<T, TutorError>;

/// Errors that can occur while serving tutoring requests.
///
/// Variants are grouped by subsystem. Configuration variants carry
/// actionable suggestions because they surface at startup.
#[derive(Debug, thiserror::Error)]
pub enum TutorError {
    // ========================================================================
    // Configuration
    // ========================================================================
    /// Invalid JSON syntax in configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your tutor.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    /// A required credential is absent from the environment.
    #[error("Missing credential: {name} is not set\n\nSuggestion: Export {name} or add it to your .env file")]
    MissingCredential {
        /// Environment variable name.
        name: String,
    },

    // ========================================================================
    // Language model
    // ========================================================================
    /// The completion service failed.
    #[error("Completion failed: {0}")]
    Completion(#[from] CompletionError),

    /// Model output could not be recovered as the expected JSON object.
    #[error("Malformed model output: {message}")]
    MalformedOutput {
        /// Parse error from the first recovery strategy.
        message: String,
        /// The offending text.
        text: String,
    },

    // ========================================================================
    // Render pipeline
    // ========================================================================
    /// The render ran but produced no artifact.
    #[error("{message}")]
    RenderFailed {
        /// Diagnostic including the verification snippet and render log.
        message: String,
    },

    /// The artifact could not be moved across the text transport.
    #[error("Artifact transport failed: {message}")]
    EncodingFailure {
        /// Description of the transport failure.
        message: String,
    },

    /// Sandbox provisioning or execution failed.
    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    // ========================================================================
    // Collaborators
    // ========================================================================
    /// The object storage collaborator failed.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the failure.
        message: String,
    },

    /// The relational store collaborator failed.
    #[error("Store error: {message}")]
    Store {
        /// Description of the failure.
        message: String,
    },

    // ========================================================================
    // Lookups and requests
    // ========================================================================
    /// Session does not exist.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Question does not exist or belongs to another session.
    #[error("Question not found: {0}")]
    QuestionNotFound(String),

    /// User does not exist.
    #[error("User not found: {0}")]
    UserNotFound(String),

    /// The request is malformed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A webhook delivery failed signature verification.
    #[error("Webhook verification failed: {0}")]
    WebhookVerification(String),

    // ========================================================================
    // General
    // ========================================================================
    /// General I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<TransportError> for TutorError {
    fn from(err: TransportError) -> Self {
        Self::encoding_failure(err.to_string())
    }
}

impl TutorError {
    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `MissingCredential` error.
    #[must_use]
    pub fn missing_credential(name: impl Into<String>) -> Self {
        Self::MissingCredential { name: name.into() }
    }

    /// Creates a new `MalformedOutput` error.
    #[must_use]
    pub fn malformed(message: impl Into<String>, text: impl Into<String>) -> Self {
        Self::MalformedOutput {
            message: message.into(),
            text: text.into(),
        }
    }

    /// Creates a new `RenderFailed` error.
    #[must_use]
    pub fn render_failed(message: impl Into<String>) -> Self {
        Self::RenderFailed {
            message: message.into(),
        }
    }

    /// Creates a new `EncodingFailure` error.
    #[must_use]
    pub fn encoding_failure(message: impl Into<String>) -> Self {
        Self::EncodingFailure {
            message: message.into(),
        }
    }

    /// Creates a new `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new `Store` error.
    #[must_use]
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Returns `true` when the error means a requested row does not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::SessionNotFound(_) | Self::QuestionNotFound(_) | Self::UserNotFound(_)
        )
    }

    /// Returns `true` when the caller sent something unusable.
    #[must_use]
    pub const fn is_bad_request(&self) -> bool {
        matches!(
            self,
            Self::InvalidRequest(_) | Self::WebhookVerification(_)
        )
    }

    /// Returns `true` if this error is fatal at startup.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigParseError { .. }
                | Self::ConfigValidationError { .. }
                | Self::MissingCredential { .. }
        )
    }
}
