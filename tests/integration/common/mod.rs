//! In-process collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use tokio::net::TcpListener;
use tutor_sandbox::{
    transport, ExecOutput, Sandbox, SandboxError, SandboxInfo, SandboxProvider, SandboxSpec,
};
use tutor_service::completion::{CompletionClient, CompletionError, CompletionRequest};
use tutor_service::{MemoryStorage, VideoPipeline};

/// Completion client replaying canned replies in order.
#[derive(Default)]
pub struct ScriptedCompletion {
    replies: Mutex<VecDeque<String>>,
    pub requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletion {
    pub fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| (*r).to_string()).collect()),
            requests: Mutex::new(Vec::new()),
        })
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
            .ok_or_else(|| CompletionError::InvalidResponse("no scripted reply".to_string()))
    }
}

/// Render stage a fake sandbox breaks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Breakage {
    None,
    /// Every command whose text starts with the prefix errors.
    ExecError(&'static str),
    /// The write step exits non-zero.
    WriteExitCode,
    /// The locate step prints nothing.
    NoVideo,
    /// The read-back prints nothing decodable.
    EmptyReadBack,
}

#[derive(Default)]
pub struct Counters {
    pub created: AtomicUsize,
    pub deleted: AtomicUsize,
}

impl Counters {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn deleted(&self) -> usize {
        self.deleted.load(Ordering::SeqCst)
    }
}

/// Sandbox provider emulating the render toolchain.
pub struct FakeSandboxes {
    pub artifact: Vec<u8>,
    pub render_log: String,
    pub breakage: Breakage,
    pub counters: Arc<Counters>,
}

impl FakeSandboxes {
    pub fn new(artifact: &[u8], breakage: Breakage) -> Arc<Self> {
        Arc::new(Self {
            artifact: artifact.to_vec(),
            render_log: "Manim Community v0.18.1\nFile ready".to_string(),
            breakage,
            counters: Arc::new(Counters::default()),
        })
    }

    pub fn with_render_log(artifact: &[u8], breakage: Breakage, log: String) -> Arc<Self> {
        Arc::new(Self {
            artifact: artifact.to_vec(),
            render_log: log,
            breakage,
            counters: Arc::new(Counters::default()),
        })
    }
}

#[async_trait]
impl SandboxProvider for FakeSandboxes {
    async fn create(&self, spec: &SandboxSpec) -> tutor_sandbox::Result<Box<dyn Sandbox>> {
        let n = self.counters.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSandbox {
            info: SandboxInfo::new(format!("sbx-{n}"), "render", &spec.image),
            artifact: self.artifact.clone(),
            render_log: self.render_log.clone(),
            breakage: self.breakage,
            counters: Arc::clone(&self.counters),
        }))
    }
}

struct FakeSandbox {
    info: SandboxInfo,
    artifact: Vec<u8>,
    render_log: String,
    breakage: Breakage,
    counters: Arc<Counters>,
}

#[async_trait]
impl Sandbox for FakeSandbox {
    fn info(&self) -> &SandboxInfo {
        &self.info
    }

    async fn exec(&self, command: &str) -> tutor_sandbox::Result<ExecOutput> {
        if let Breakage::ExecError(prefix) = self.breakage {
            if command.starts_with(prefix) {
                return Err(SandboxError::ExecFailed {
                    id: self.info.id.clone(),
                    message: "stream closed".to_string(),
                });
            }
        }
        if command.starts_with("echo ") {
            if self.breakage == Breakage::WriteExitCode {
                return Ok(ExecOutput {
                    exit_code: Some(1),
                    output: "base64: invalid input".to_string(),
                });
            }
            return Ok(ExecOutput::success(""));
        }
        if command.starts_with("wc -l") {
            return Ok(ExecOutput::success("14 scene.py\nfrom manim import *\n"));
        }
        if command.starts_with("python3 -m manim") {
            return Ok(ExecOutput::success(self.render_log.clone()));
        }
        if command.starts_with("find media") {
            if self.breakage == Breakage::NoVideo {
                return Ok(ExecOutput::success(""));
            }
            return Ok(ExecOutput::success(
                "media/videos/scene/480p15/ExplanationScene.mp4\n",
            ));
        }
        if command.starts_with("cat ") {
            if self.breakage == Breakage::EmptyReadBack {
                return Ok(ExecOutput::success("\n"));
            }
            return Ok(ExecOutput::success(transport::encode(&self.artifact)));
        }
        panic!("unexpected sandbox command: {command}");
    }

    async fn delete(&self) -> tutor_sandbox::Result<()> {
        self.counters.deleted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub const EXPLANATION_REPLY: &str =
    r#"Here you go: {"explanation": "12 split into 3 equal groups gives 4 in each group."}"#;

pub const PROGRAM_REPLY: &str = "```python\nfrom manim import *\n\nclass ExplanationScene(Scene):\n    def construct(self):\n        self.play(Write(Text(\"12 / 3 = 4\")))\n```";

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

/// Serves `router` on an ephemeral port.
pub async fn spawn_server(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    addr
}
