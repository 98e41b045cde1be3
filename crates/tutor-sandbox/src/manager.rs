//! Docker-backed sandbox provider.
//!
//! This module provides [`SandboxManager`], which provisions sandboxes as
//! Docker containers through the bollard crate, and [`DockerSandbox`], the
//! handle used to run shell commands inside one of them.

use async_trait::async_trait;
use bollard::container::{
    Config as BollardConfig, CreateContainerOptions, RemoveContainerOptions,
    StartContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use tracing::{debug, info, instrument, warn};

use crate::{
    ExecOutput, Resources, Result, Sandbox, SandboxError, SandboxInfo, SandboxProvider,
    SandboxSpec,
};

/// Provisions sandboxes as Docker containers.
///
/// Each sandbox is a container created from the [`SandboxSpec`] pre-baked image and
/// kept alive with `sleep infinity` so that commands can be issued through
/// `docker exec`.
///
/// # Example
///
/// ```no_run
/// use tutor_sandbox::{SandboxManager, SandboxProvider, SandboxSpec};
///
/// # async fn example() -> Result<(), tutor_sandbox::SandboxError> {
/// let manager = SandboxManager::new()?;
/// manager.health_check().await?;
///
/// let sandbox = manager.create(&SandboxSpec::new("tutor-manim:latest")).await?;
/// let output = sandbox.exec("python3 --version").await?;
/// println!("{}", output.output);
/// sandbox.delete().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SandboxManager {
    /// The bollard Docker client instance.
    docker: Docker,
}

impl SandboxManager {
    /// Creates a new `SandboxManager` by connecting to the Docker daemon.
    ///
    /// Uses the default local connection method (Unix socket on Linux/macOS,
    /// named pipe on Windows).
    ///
    /// # Errors
    ///
    /// Returns a [`SandboxError::DockerApi`] if the connection fails.
    pub fn new() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        debug!("Connected to Docker daemon");
        Ok(Self { docker })
    }

    /// Wraps an existing Docker client.
    #[must_use]
    pub const fn with_docker(docker: Docker) -> Self {
        Self { docker }
    }

    /// Returns a reference to the underlying Docker client.
    #[must_use]
    pub const fn docker(&self) -> &Docker {
        &self.docker
    }

    /// Checks if the Docker daemon is reachable and healthy.
    ///
    /// # Errors
    ///
    /// Returns a [`SandboxError::DockerApi`] if the ping fails.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<()> {
        self.docker.ping().await?;
        debug!("Docker daemon health check passed");
        Ok(())
    }

    /// Force-removes a container, used when provisioning fails half-way.
    async fn discard(&self, id: &str) {
        if let Err(e) = self.docker.remove_container(id, Some(force_remove())).await {
            warn!(container_id = %id, error = %e, "Failed to discard partially created sandbox");
        }
    }
}

#[async_trait]
impl SandboxProvider for SandboxManager {
    #[instrument(skip(self, spec), fields(image = %spec.image))]
    async fn create(&self, spec: &SandboxSpec) -> Result<Box<dyn Sandbox>> {
        let name = sandbox_name(&spec.name_prefix);

        let config = BollardConfig {
            image: Some(spec.image.clone()),
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            working_dir: Some(spec.workdir.clone()),
            host_config: Some(host_config(spec.resources)),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: name.as_str(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| SandboxError::CreateFailed(e.to_string()))?;

        for warning in &response.warnings {
            warn!(container_id = %response.id, warning = %warning, "Docker warning during sandbox creation");
        }

        if let Err(e) = self
            .docker
            .start_container(&response.id, None::<StartContainerOptions<String>>)
            .await
        {
            self.discard(&response.id).await;
            return Err(SandboxError::StartFailed(e.to_string()));
        }

        info!(
            sandbox_id = %response.id,
            sandbox_name = %name,
            "Sandbox created"
        );

        Ok(Box::new(DockerSandbox {
            docker: self.docker.clone(),
            info: SandboxInfo::new(response.id, name, &spec.image),
            workdir: spec.workdir.clone(),
        }))
    }
}

/// A sandbox backed by a running Docker container.
#[derive(Debug, Clone)]
pub struct DockerSandbox {
    docker: Docker,
    info: SandboxInfo,
    workdir: String,
}

#[async_trait]
impl Sandbox for DockerSandbox {
    fn info(&self) -> &SandboxInfo {
        &self.info
    }

    #[instrument(skip(self, command), fields(sandbox_id = %self.info.id, command_len = command.len()))]
    async fn exec(&self, command: &str) -> Result<ExecOutput> {
        let exec_failed = |message: String| SandboxError::ExecFailed {
            id: self.info.id.clone(),
            message,
        };

        let options = CreateExecOptions {
            cmd: Some(vec!["sh".to_string(), "-c".to_string(), command.to_string()]),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            working_dir: Some(self.workdir.clone()),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(&self.info.id, options)
            .await
            .map_err(|e| exec_failed(format!("create exec: {e}")))?;

        let mut collected = Vec::new();
        match self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| exec_failed(format!("start exec: {e}")))?
        {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(chunk) = output.next().await {
                    let chunk = chunk.map_err(|e| exec_failed(format!("output stream: {e}")))?;
                    collected.extend_from_slice(&chunk.into_bytes());
                }
            }
            StartExecResults::Detached => {
                return Err(exec_failed("exec started detached".to_string()));
            }
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| exec_failed(format!("inspect exec: {e}")))?;

        debug!(
            exit_code = ?inspect.exit_code,
            output_len = collected.len(),
            "Sandbox command finished"
        );

        Ok(ExecOutput {
            exit_code: inspect.exit_code,
            output: String::from_utf8_lossy(&collected).into_owned(),
        })
    }

    #[instrument(skip(self), fields(sandbox_id = %self.info.id))]
    async fn delete(&self) -> Result<()> {
        self.docker
            .remove_container(&self.info.id, Some(force_remove()))
            .await
            .map_err(|e| SandboxError::DeleteFailed {
                id: self.info.id.clone(),
                message: e.to_string(),
            })?;
        info!("Sandbox deleted");
        Ok(())
    }
}

/// Builds a unique container name from a prefix.
fn sandbox_name(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4().simple())
}

/// Converts requested resources to a Docker host config.
#[allow(clippy::cast_possible_truncation)]
fn host_config(resources: Resources) -> HostConfig {
    let memory_bytes = i64::try_from(resources.memory_mb.saturating_mul(1024 * 1024))
        .unwrap_or(i64::MAX);
    HostConfig {
        nano_cpus: Some((resources.cpus * 1_000_000_000.0) as i64),
        memory: Some(memory_bytes),
        ..Default::default()
    }
}

fn force_remove() -> RemoveContainerOptions {
    RemoveContainerOptions {
        v: true,
        force: true,
        ..Default::default()
    }
}
