//! Scoped ownership of a sandbox.
//!
//! A [`SandboxLease`] is the only way the render pipeline touches a sandbox.
//! It tracks the lifecycle state and guarantees deletion: either explicitly
//! through [`SandboxLease::release`] or, if the lease is dropped early, by a
//! background task spawned from `Drop`.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::{ExecOutput, Result, Sandbox, SandboxError, SandboxProvider, SandboxSpec, SandboxState};

/// Exclusive handle on a provisioned sandbox.
pub struct SandboxLease {
    sandbox: Arc<dyn Sandbox>,
    state: SandboxState,
    released: bool,
}

impl std::fmt::Debug for SandboxLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxLease")
            .field("sandbox_id", &self.sandbox.info().id)
            .field("state", &self.state)
            .field("released", &self.released)
            .finish()
    }
}

impl SandboxLease {
    /// Provisions a sandbox from `provider` and wraps it in a lease.
    ///
    /// # Errors
    ///
    /// Propagates the provider's creation error. Nothing needs tearing down
    /// in that case.
    pub async fn acquire(provider: &dyn SandboxProvider, spec: &SandboxSpec) -> Result<Self> {
        let sandbox = provider.create(spec).await?;
        debug!(sandbox_id = %sandbox.info().id, "Sandbox lease acquired");
        Ok(Self {
            sandbox: Arc::from(sandbox),
            state: SandboxState::Created,
            released: false,
        })
    }

    /// Identifier of the leased sandbox.
    pub fn id(&self) -> &str {
        &self.sandbox.info().id
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> SandboxState {
        self.state
    }

    /// Runs a shell command in the leased sandbox.
    ///
    /// # Errors
    ///
    /// Returns the sandbox's execution error.
    pub async fn exec(&mut self, command: &str) -> Result<ExecOutput> {
        if self.state == SandboxState::Created {
            self.state = SandboxState::Executing;
        }
        self.sandbox.exec(command).await
    }

    /// Deletes the sandbox, consuming the lease.
    ///
    /// The lease is marked released before deletion is attempted, so a
    /// failed delete is reported here and never retried from `Drop`.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::DeleteFailed`] (or the backend's error) when the
    /// sandbox could not be deleted.
    pub async fn release(mut self) -> Result<SandboxState> {
        self.state = SandboxState::ReadyForTeardown;
        self.released = true;
        let id = self.id().to_string();
        match self.sandbox.delete().await {
            Ok(()) => {
                self.state = SandboxState::Deleted;
                info!(sandbox_id = %id, "Sandbox released");
                Ok(self.state)
            }
            Err(e) => {
                error!(sandbox_id = %id, error = %e, "Sandbox teardown failed");
                Err(e)
            }
        }
    }
}

impl Drop for SandboxLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let sandbox = Arc::clone(&self.sandbox);
        let id = sandbox.info().id.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            warn!(sandbox_id = %id, "Sandbox lease dropped without release, deleting in background");
            handle.spawn(async move {
                if let Err(e) = sandbox.delete().await {
                    error!(sandbox_id = %id, error = %e, "Background sandbox teardown failed");
                }
            });
        } else {
            warn!(sandbox_id = %id, "Sandbox lease dropped outside a runtime, sandbox leaked");
        }
    }
}

/// Ensures a command reported success, turning a non-zero exit into an error.
///
/// # Errors
///
/// Returns [`SandboxError::ExecFailed`] carrying the command output when the
/// exit code is known and non-zero.
pub fn require_success(id: &str, output: ExecOutput) -> Result<ExecOutput> {
    match output.exit_code {
        Some(code) if code != 0 => Err(SandboxError::ExecFailed {
            id: id.to_string(),
            message: format!("exit code {code}: {}", output.output),
        }),
        _ => Ok(output),
    }
}
