//! Explanation video pipeline.
//!
//! [`VideoPipeline::generate`] turns a question into a published video in
//! four strictly sequential stages:
//!
//! 1. **Explain**: the fast model writes a step-by-step explanation.
//! 2. **Codegen**: the capable model turns it into a Manim program.
//! 3. **Execute**: the program runs in a fresh sandbox and the rendered MP4
//!    is read back over the base64 text transport.
//! 4. **Publish**: the MP4 is uploaded and its public URL returned.
//!
//! Any failure yields a failed [`VideoResult`]; `generate` never errors.
//! The sandbox is torn down exactly once on every path out of stage 3.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};
use tutor_sandbox::lease::require_success;
use tutor_sandbox::{transport, SandboxLease, SandboxProvider, SandboxSpec};

use crate::completion::{strip_code_fences, CompletionClient, CompletionRequest, ModelTier};
use crate::error::{Result, TutorError};
use crate::prompts::Prompt;
use crate::storage::{ObjectStorage, StoredObject, UploadOptions};
use crate::structured::parse_as;

/// File the program is written to inside the sandbox.
pub const SCENE_FILE: &str = "scene.py";

/// Scene class every generated program must define.
pub const SCENE_CLASS: &str = "ExplanationScene";

const EXPLANATION_MAX_TOKENS: u32 = 1024;
const PROGRAM_MAX_TOKENS: u32 = 2048;

/// Characters of the verification output kept in diagnostics.
const VERIFY_SNIPPET_CHARS: usize = 200;

/// Characters of the render log kept in diagnostics.
const RENDER_LOG_CHARS: usize = 1000;

/// Outcome of a generation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoStatus {
    /// The video was published.
    Completed,
    /// A stage failed.
    Failed,
}

/// Result of [`VideoPipeline::generate`].
///
/// Exactly one of `video_url` and `error` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoResult {
    /// Id the video was (or would have been) published under.
    pub video_id: String,
    /// Outcome.
    pub status: VideoStatus,
    /// Public URL when completed.
    pub video_url: Option<String>,
    /// Failure description when failed.
    pub error: Option<String>,
}

impl VideoResult {
    /// A published video.
    pub fn completed(video_id: impl Into<String>, video_url: impl Into<String>) -> Self {
        Self {
            video_id: video_id.into(),
            status: VideoStatus::Completed,
            video_url: Some(video_url.into()),
            error: None,
        }
    }

    /// A failed generation.
    pub fn failed(video_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            video_id: video_id.into(),
            status: VideoStatus::Failed,
            video_url: None,
            error: Some(error.into()),
        }
    }
}

/// Binary output of a render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderArtifact {
    /// File contents.
    pub bytes: Vec<u8>,
    /// MIME type.
    pub mime_type: String,
}

/// What the execute stage hands to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOutput {
    /// The rendered video.
    pub artifact: RenderArtifact,
    /// Combined render output.
    pub log: String,
}

/// Result of a retention sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// Number of removed objects.
    pub deleted: usize,
    /// Names of removed objects.
    pub files: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ExplanationReply {
    explanation: String,
}

/// Shell command writing the encoded program into the sandbox.
pub fn write_program_command(program: &str) -> String {
    transport::write_file_command(&transport::encode_program(program), SCENE_FILE)
}

/// Shell command printing a line count and the head of the program.
pub fn verify_command() -> String {
    format!("wc -l {SCENE_FILE} && head -5 {SCENE_FILE}")
}

/// Shell command rendering the scene at low quality.
pub fn render_command() -> String {
    format!("python3 -m manim -ql {SCENE_FILE} {SCENE_CLASS} 2>&1")
}

/// Shell command locating the rendered video.
pub fn locate_command() -> String {
    format!("find media -name '{SCENE_CLASS}.mp4' -type f 2>/dev/null")
}

/// First non-empty line of `find` output.
fn first_path(output: &str) -> Option<&str> {
    output.lines().map(str::trim).find(|line| !line.is_empty())
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Diagnostic for a render that produced no video.
pub fn missing_video_message(verify_output: &str, render_log: &str) -> String {
    format!(
        "Video not found. Code verify: {}. Render: {}",
        truncate_chars(verify_output, VERIFY_SNIPPET_CHARS),
        truncate_chars(render_log, RENDER_LOG_CHARS)
    )
}

/// Names of objects created strictly before `cutoff`.
///
/// Objects without a parseable timestamp are kept.
pub fn select_expired(objects: &[StoredObject], cutoff: DateTime<Utc>) -> Vec<String> {
    objects
        .iter()
        .filter(|object| object.created_at().is_some_and(|created| created < cutoff))
        .map(|object| object.name.clone())
        .collect()
}

/// Orchestrates explanation, program generation, rendering, and publishing.
#[derive(Clone)]
pub struct VideoPipeline {
    completion: Arc<dyn CompletionClient>,
    sandboxes: Arc<dyn SandboxProvider>,
    storage: Arc<dyn ObjectStorage>,
    sandbox_spec: SandboxSpec,
    bucket: String,
    retention: Duration,
}

impl std::fmt::Debug for VideoPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoPipeline")
            .field("sandbox_spec", &self.sandbox_spec)
            .field("bucket", &self.bucket)
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}

impl VideoPipeline {
    /// Creates a pipeline publishing to `bucket` and keeping videos for
    /// `retention`.
    pub fn new(
        completion: Arc<dyn CompletionClient>,
        sandboxes: Arc<dyn SandboxProvider>,
        storage: Arc<dyn ObjectStorage>,
        sandbox_spec: SandboxSpec,
        bucket: impl Into<String>,
        retention: Duration,
    ) -> Self {
        Self {
            completion,
            sandboxes,
            storage,
            sandbox_spec,
            bucket: bucket.into(),
            retention,
        }
    }

    /// Runs every stage for `question`. Never fails; see [`VideoResult`].
    pub async fn generate(&self, question: &str) -> VideoResult {
        let video_id = uuid::Uuid::new_v4().to_string();
        match self.run(&video_id, question).await {
            Ok(url) => {
                info!(video_id = %video_id, url = %url, "Video published");
                VideoResult::completed(video_id, url)
            }
            Err(e) => {
                warn!(video_id = %video_id, error = %e, "Video generation failed");
                VideoResult::failed(video_id, e.to_string())
            }
        }
    }

    #[instrument(skip(self, question), fields(video_id = %video_id))]
    async fn run(&self, video_id: &str, question: &str) -> Result<String> {
        let explanation = self.explain(question).await?;
        let program = self.generate_program(question, &explanation).await?;
        let output = self.render(&program).await?;
        debug!(log_len = output.log.len(), "Render finished");
        self.publish(video_id, output.artifact).await
    }

    /// Stage 1: asks the fast model for a step-by-step explanation.
    ///
    /// # Errors
    ///
    /// Completion failures and unrecoverable replies.
    pub async fn explain(&self, question: &str) -> Result<String> {
        let prompt = Prompt::ExplainSolution { question }.render();
        let reply = self
            .completion
            .complete(CompletionRequest::prompt(
                ModelTier::Fast,
                prompt,
                EXPLANATION_MAX_TOKENS,
            ))
            .await?;
        let parsed: ExplanationReply = parse_as(&reply)?;
        debug!(explanation_len = parsed.explanation.len(), "Explanation generated");
        Ok(parsed.explanation)
    }

    /// Stage 2: asks the capable model for the animation program.
    ///
    /// # Errors
    ///
    /// Completion failures.
    pub async fn generate_program(&self, question: &str, explanation: &str) -> Result<String> {
        let prompt = Prompt::GenerateAnimation {
            question,
            explanation,
        }
        .render();
        let reply = self
            .completion
            .complete(CompletionRequest::prompt(
                ModelTier::Capable,
                prompt,
                PROGRAM_MAX_TOKENS,
            ))
            .await?;
        let program = strip_code_fences(&reply);
        debug!(program_len = program.len(), "Program generated");
        Ok(program)
    }

    /// Stage 3: renders `program` in a fresh sandbox.
    ///
    /// The sandbox is deleted before this returns, whatever the outcome. A
    /// failed deletion is logged and does not change the result.
    ///
    /// # Errors
    ///
    /// Provisioning and command failures, [`TutorError::RenderFailed`] when
    /// no video was produced, and [`TutorError::EncodingFailure`] when the
    /// video could not be read back.
    pub async fn render(&self, program: &str) -> Result<RenderOutput> {
        let mut lease = SandboxLease::acquire(self.sandboxes.as_ref(), &self.sandbox_spec).await?;
        let sandbox_id = lease.id().to_string();
        info!(sandbox_id = %sandbox_id, "Render sandbox provisioned");

        let result = execute(&mut lease, program).await;

        if let Err(e) = lease.release().await {
            error!(sandbox_id = %sandbox_id, error = %e, "Failed to tear down render sandbox");
        }
        result
    }

    /// Stage 4: uploads the video as `{video_id}.mp4` and returns its URL.
    ///
    /// # Errors
    ///
    /// Storage failures.
    pub async fn publish(&self, video_id: &str, artifact: RenderArtifact) -> Result<String> {
        let path = format!("{video_id}.mp4");
        let options = UploadOptions {
            content_type: artifact.mime_type,
            overwrite: true,
        };
        self.storage
            .upload(&self.bucket, &path, artifact.bytes, &options)
            .await?;
        Ok(self.storage.public_url(&self.bucket, &path))
    }

    /// Removes videos created before `now - retention` in one batch.
    ///
    /// # Errors
    ///
    /// Storage failures while listing or removing.
    #[instrument(skip(self), fields(bucket = %self.bucket))]
    pub async fn cleanup_old_videos(&self, now: DateTime<Utc>) -> Result<CleanupReport> {
        let cutoff = now - self.retention;
        let objects = self.storage.list(&self.bucket).await?;
        let files = select_expired(&objects, cutoff);
        if !files.is_empty() {
            self.storage.remove(&self.bucket, &files).await?;
        }
        info!(
            listed = objects.len(),
            deleted = files.len(),
            "Retention sweep finished"
        );
        Ok(CleanupReport {
            deleted: files.len(),
            files,
        })
    }
}

/// Write, verify, render, locate, read back.
async fn execute(lease: &mut SandboxLease, program: &str) -> Result<RenderOutput> {
    let write = lease.exec(&write_program_command(program)).await?;
    require_success(lease.id(), write)?;

    let verify = lease.exec(&verify_command()).await?;
    let render = lease.exec(&render_command()).await?;
    debug!(exit_code = ?render.exit_code, "Render command finished");

    let located = lease.exec(&locate_command()).await?;
    let Some(path) = first_path(&located.output) else {
        return Err(TutorError::render_failed(missing_video_message(
            &verify.output,
            &render.output,
        )));
    };

    let encoded = lease.exec(&transport::read_file_command(path)).await?;
    let bytes = transport::decode(&encoded.output)?;
    debug!(artifact_len = bytes.len(), path = %path, "Artifact retrieved");

    Ok(RenderOutput {
        artifact: RenderArtifact {
            bytes,
            mime_type: "video/mp4".to_string(),
        },
        log: render.output,
    })
}
