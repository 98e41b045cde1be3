//! Tutor Sandbox Management
//!
//! Ephemeral sandbox lifecycle for running generated render programs.
//!
//! The crate exposes the sandbox collaborator as two traits,
//! [`SandboxProvider`] (create) and [`Sandbox`] (exec / delete), a Docker
//! backend built on bollard ([`SandboxManager`]), a scoped [`SandboxLease`]
//! that guarantees teardown, and the [`transport`] codec used to move program
//! text in and binary artifacts out over the command channel.

pub mod lease;
pub mod manager;
pub mod transport;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use lease::SandboxLease;
pub use manager::{DockerSandbox, SandboxManager};
pub use transport::TransportError;

/// Errors that can occur during sandbox operations.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// Failed to provision the sandbox.
    #[error("failed to create sandbox: {0}")]
    CreateFailed(String),

    /// Failed to start the sandbox after provisioning.
    #[error("failed to start sandbox: {0}")]
    StartFailed(String),

    /// A command could not be executed inside the sandbox.
    #[error("failed to execute command in sandbox {id}: {message}")]
    ExecFailed {
        /// Sandbox identifier.
        id: String,
        /// Description of the failure.
        message: String,
    },

    /// Failed to delete the sandbox.
    #[error("failed to delete sandbox {id}: {message}")]
    DeleteFailed {
        /// Sandbox identifier.
        id: String,
        /// Description of the failure.
        message: String,
    },

    /// Docker API error.
    #[error("docker API error: {0}")]
    DockerApi(#[from] bollard::errors::Error),

    /// Invalid sandbox state for the requested operation.
    #[error("invalid sandbox state: expected {expected}, found {actual}")]
    InvalidState {
        /// The expected sandbox state.
        expected: SandboxState,
        /// The actual sandbox state.
        actual: SandboxState,
    },
}

/// A specialized `Result` type for sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;

/// Lifecycle state of a sandbox owned by one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SandboxState {
    /// Provisioned, no command has run yet.
    #[default]
    Created,
    /// At least one command has been issued.
    Executing,
    /// Work is finished and deletion is about to be requested.
    ReadyForTeardown,
    /// The sandbox no longer exists.
    Deleted,
}

impl std::fmt::Display for SandboxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Executing => write!(f, "executing"),
            Self::ReadyForTeardown => write!(f, "ready_for_teardown"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

/// Compute resources requested for a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    /// Number of virtual CPUs.
    pub cpus: f64,
    /// Memory limit in mebibytes.
    pub memory_mb: u64,
}

impl Default for Resources {
    fn default() -> Self {
        Self {
            cpus: 2.0,
            memory_mb: 4096,
        }
    }
}

/// Everything needed to provision a sandbox from a pre-baked image.
///
/// The image must already contain the rendering toolchain; building it is a
/// one-time setup step outside the runtime pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxSpec {
    /// Image reference (e.g. `"tutor-manim:latest"`).
    pub image: String,
    /// Requested compute resources.
    pub resources: Resources,
    /// Working directory inside the sandbox; relative commands run here.
    pub workdir: String,
    /// Prefix for generated sandbox names.
    pub name_prefix: String,
}

impl SandboxSpec {
    /// Creates a spec for the given image with default resources.
    #[must_use]
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            resources: Resources::default(),
            workdir: "/home/tutor".to_string(),
            name_prefix: "tutor-render".to_string(),
        }
    }

    /// Sets the requested resources.
    #[must_use]
    pub const fn with_resources(mut self, resources: Resources) -> Self {
        self.resources = resources;
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn with_workdir(mut self, workdir: impl Into<String>) -> Self {
        self.workdir = workdir.into();
        self
    }
}

/// Output of a single command executed in a sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    /// Exit code reported by the sandbox, when available.
    pub exit_code: Option<i64>,
    /// Combined stdout and stderr text.
    pub output: String,
}

impl ExecOutput {
    /// Creates an output with exit code 0.
    #[must_use]
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            output: output.into(),
        }
    }

    /// Returns whether the command reported a zero exit code.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Metadata describing a provisioned sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxInfo {
    /// Backend-assigned identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Image the sandbox was provisioned from.
    pub image: String,
    /// Provisioning timestamp.
    pub created_at: DateTime<Utc>,
}

impl SandboxInfo {
    /// Creates sandbox metadata stamped with the current time.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            image: image.into(),
            created_at: Utc::now(),
        }
    }
}

/// Provisions sandboxes.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Creates a fresh sandbox from `spec`. The caller owns it exclusively.
    async fn create(&self, spec: &SandboxSpec) -> Result<Box<dyn Sandbox>>;
}

/// A running sandbox accepting shell commands.
///
/// Commands are opaque shell text; there is no structured RPC.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Metadata for this sandbox.
    fn info(&self) -> &SandboxInfo;

    /// Runs a shell command and returns its combined output.
    async fn exec(&self, command: &str) -> Result<ExecOutput>;

    /// Deletes the sandbox and releases its compute.
    async fn delete(&self) -> Result<()>;
}
