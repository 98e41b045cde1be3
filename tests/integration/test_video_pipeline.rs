//! End-to-end tests for the explanation video pipeline
//!
//! The completion service, the sandbox, and object storage are in-process
//! fakes; every other component is the production code.

mod common;

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use common::{
    pipeline, Breakage, FakeSandboxes, ScriptedCompletion, EXPLANATION_REPLY, PROGRAM_REPLY,
};
use tutor_service::{MemoryStorage, VideoStatus};

const MP4: &[u8] = b"\x00\x00\x00\x20ftypisom\x00\x00\x02\x00isomiso2avc1mp41\xff\xfe";

/// A question is explained, animated, rendered, and published.
#[tokio::test]
async fn test_scenario_completed_video() {
    let completion = ScriptedCompletion::new(&[EXPLANATION_REPLY, PROGRAM_REPLY]);
    let sandboxes = FakeSandboxes::new(MP4, Breakage::None);
    let storage = Arc::new(MemoryStorage::new());
    let video = pipeline(completion, Arc::clone(&sandboxes), Arc::clone(&storage));

    let result = video.generate("12 ÷ 3 = ?").await;

    assert_eq!(result.status, VideoStatus::Completed);
    assert!(result.error.is_none());
    let url = result.video_url.expect("completed video has a URL");
    assert_eq!(url, format!("memory://videos/{}.mp4", result.video_id));

    let (bytes, content_type) = storage
        .object("videos", &format!("{}.mp4", result.video_id))
        .await
        .expect("video uploaded");
    assert_eq!(bytes, MP4, "binary artifact survives the text transport");
    assert_eq!(content_type, "video/mp4");
    assert_eq!(sandboxes.counters.created(), 1);
    assert_eq!(sandboxes.counters.deleted(), 1);
}

/// Rendering produced no file: the failure carries diagnostics.
#[tokio::test]
async fn test_scenario_missing_video_reports_diagnostics() {
    let completion = ScriptedCompletion::new(&[EXPLANATION_REPLY, PROGRAM_REPLY]);
    let log = format!("Traceback (most recent call last):\n{}", "x".repeat(3000));
    let sandboxes = FakeSandboxes::with_render_log(MP4, Breakage::NoVideo, log);
    let video = pipeline(completion, Arc::clone(&sandboxes), Arc::new(MemoryStorage::new()));

    let result = video.generate("12 ÷ 3 = ?").await;

    assert_eq!(result.status, VideoStatus::Failed);
    assert!(result.video_url.is_none());
    let error = result.error.expect("failed video has an error");
    assert!(error.starts_with("Video not found. Code verify: 14 scene.py"));
    assert!(error.contains("Render: Traceback"));
    let log_part = error.split("Render: ").nth(1).unwrap_or_default();
    assert_eq!(log_part.chars().count(), 1000);
    assert_eq!(sandboxes.counters.deleted(), 1);
}

/// Whatever stage breaks after provisioning, the sandbox is deleted once.
#[tokio::test]
async fn test_sandbox_deleted_once_on_every_failure() {
    let breakages = [
        Breakage::ExecError("echo "),
        Breakage::ExecError("wc -l"),
        Breakage::ExecError("python3 -m manim"),
        Breakage::ExecError("find media"),
        Breakage::ExecError("cat "),
        Breakage::WriteExitCode,
        Breakage::NoVideo,
        Breakage::EmptyReadBack,
    ];

    for breakage in breakages {
        let completion = ScriptedCompletion::new(&[EXPLANATION_REPLY, PROGRAM_REPLY]);
        let sandboxes = FakeSandboxes::new(MP4, breakage);
        let video = pipeline(completion, Arc::clone(&sandboxes), Arc::new(MemoryStorage::new()));

        let result = video.generate("12 ÷ 3 = ?").await;

        assert_eq!(result.status, VideoStatus::Failed, "{breakage:?}");
        assert_eq!(sandboxes.counters.created(), 1, "{breakage:?}");
        assert_eq!(sandboxes.counters.deleted(), 1, "{breakage:?}");
    }
}

/// A codegen failure never provisions a sandbox.
#[tokio::test]
async fn test_codegen_failure_skips_sandbox() {
    let completion = ScriptedCompletion::new(&[EXPLANATION_REPLY]);
    let sandboxes = FakeSandboxes::new(MP4, Breakage::None);
    let video = pipeline(completion, Arc::clone(&sandboxes), Arc::new(MemoryStorage::new()));

    let result = video.generate("12 ÷ 3 = ?").await;

    assert_eq!(result.status, VideoStatus::Failed);
    assert_eq!(sandboxes.counters.created(), 0);
    assert_eq!(sandboxes.counters.deleted(), 0);
}

/// Videos older than a day are swept; younger ones stay.
#[tokio::test]
async fn test_scenario_retention_sweep() {
    let storage = Arc::new(MemoryStorage::new());
    let now = Utc.with_ymd_and_hms(2025, 9, 1, 8, 0, 0).unwrap();
    for (name, age) in [
        ("a.mp4", Duration::hours(25)),
        ("b.mp4", Duration::hours(23)),
        ("c.mp4", Duration::days(2)),
    ] {
        storage.put_object("videos", name, vec![0], now - age).await;
    }
    let video = pipeline(
        ScriptedCompletion::new(&[]),
        FakeSandboxes::new(MP4, Breakage::None),
        Arc::clone(&storage),
    );

    let report = video.cleanup_old_videos(now).await.unwrap();

    assert_eq!(report.deleted, 2);
    assert_eq!(report.files, vec!["a.mp4".to_string(), "c.mp4".to_string()]);
    assert!(storage.object("videos", "b.mp4").await.is_some());
    assert!(storage.object("videos", "a.mp4").await.is_none());
}
