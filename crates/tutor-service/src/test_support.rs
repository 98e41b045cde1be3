//! Scripted collaborators for unit tests.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tutor_sandbox::{
    transport, ExecOutput, Sandbox, SandboxError, SandboxInfo, SandboxProvider, SandboxSpec,
};

use crate::completion::{CompletionClient, CompletionError, CompletionRequest};
use crate::storage::MemoryStorage;
use crate::store::{MemoryStore, Session, Store};
use crate::video::VideoPipeline;

/// Replays canned replies in order and records every request.
#[derive(Default)]
pub struct ScriptedCompletion {
    replies: Mutex<VecDeque<Result<String, CompletionError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletion {
    pub fn new<I, S>(replies: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn push_error(&self, error: CompletionError) {
        self.replies.lock().unwrap().push_back(Err(error));
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletion {
    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionError> {
        self.requests.lock().unwrap().push(request);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(CompletionError::InvalidResponse("script exhausted".into())))
    }
}

/// How the fake sandbox answers each render command.
#[derive(Clone)]
pub struct RenderScript {
    pub verify: String,
    pub render_log: String,
    pub found_path: Option<String>,
    pub artifact: Vec<u8>,
    /// Command prefix whose execution fails with a sandbox error.
    pub fail_on: Option<&'static str>,
}

impl RenderScript {
    pub fn success(artifact: &[u8]) -> Self {
        Self {
            verify: "12 scene.py\nfrom manim import *".to_string(),
            render_log: "File ready at media/videos/scene/480p15/ExplanationScene.mp4".to_string(),
            found_path: Some("media/videos/scene/480p15/ExplanationScene.mp4".to_string()),
            artifact: artifact.to_vec(),
            fail_on: None,
        }
    }
}

#[derive(Default)]
pub struct SandboxCounters {
    pub created: AtomicUsize,
    pub deleted: AtomicUsize,
    pub commands: Mutex<Vec<String>>,
}

impl SandboxCounters {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn deleted(&self) -> usize {
        self.deleted.load(Ordering::SeqCst)
    }
}

pub struct FakeSandboxes {
    pub script: RenderScript,
    pub counters: Arc<SandboxCounters>,
    pub fail_create: bool,
}

impl FakeSandboxes {
    pub fn new(script: RenderScript) -> Arc<Self> {
        Arc::new(Self {
            script,
            counters: Arc::new(SandboxCounters::default()),
            fail_create: false,
        })
    }
}

struct FakeSandbox {
    info: SandboxInfo,
    script: RenderScript,
    counters: Arc<SandboxCounters>,
}

#[async_trait]
impl SandboxProvider for FakeSandboxes {
    async fn create(&self, spec: &SandboxSpec) -> tutor_sandbox::Result<Box<dyn Sandbox>> {
        if self.fail_create {
            return Err(SandboxError::CreateFailed("quota exceeded".to_string()));
        }
        self.counters.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSandbox {
            info: SandboxInfo::new("sbx-1", "fake", &spec.image),
            script: self.script.clone(),
            counters: Arc::clone(&self.counters),
        }))
    }
}

#[async_trait]
impl Sandbox for FakeSandbox {
    fn info(&self) -> &SandboxInfo {
        &self.info
    }

    async fn exec(&self, command: &str) -> tutor_sandbox::Result<ExecOutput> {
        self.counters.commands.lock().unwrap().push(command.to_string());
        if let Some(prefix) = self.script.fail_on {
            if command.starts_with(prefix) {
                return Err(SandboxError::ExecFailed {
                    id: self.info.id.clone(),
                    message: "connection reset".to_string(),
                });
            }
        }
        let output = if command.starts_with("echo ") {
            String::new()
        } else if command.starts_with("wc -l") {
            self.script.verify.clone()
        } else if command.starts_with("python3 -m manim") {
            self.script.render_log.clone()
        } else if command.starts_with("find media") {
            self.script.found_path.clone().unwrap_or_default()
        } else if command.starts_with("cat ") {
            let encoded = transport::encode(&self.script.artifact);
            encoded
                .as_bytes()
                .chunks(76)
                .map(|c| String::from_utf8_lossy(c).into_owned())
                .collect::<Vec<_>>()
                .join("\n")
        } else {
            panic!("unexpected command: {command}");
        };
        Ok(ExecOutput::success(output))
    }

    async fn delete(&self) -> tutor_sandbox::Result<()> {
        self.counters.deleted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn pipeline(
    completion: Arc<ScriptedCompletion>,
    sandboxes: Arc<FakeSandboxes>,
    storage: Arc<MemoryStorage>,
) -> VideoPipeline {
    VideoPipeline::new(
        completion,
        sandboxes,
        storage,
        SandboxSpec::new("tutor-manim:test"),
        "videos",
        chrono::Duration::days(1),
    )
}

pub async fn store_with_session(session_id: &str, user_id: &str) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store
        .insert_session(&Session {
            id: session_id.to_string(),
            user_id: user_id.to_string(),
            is_active: true,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
    store
}
