//! Pipeline behavior against the in-memory backend

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::fixtures::{memory_pipeline, write_asset, MemoryAsset, Script};
use crate::callback::{Immediate, MainQueue};
use crate::error::{ResizeError, Result};
use crate::media::{MediaBackend, MediaKind, Size};
use crate::pipeline::TranscodeReport;
use crate::transfer::ChannelOutcome;

const TARGET: Size = Size::new(1920, 1080);

fn both() -> MemoryAsset {
    MemoryAsset::parse("tag=t audio video")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_completion_fires_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let (pipeline, _journal) = memory_pipeline(Script::samples(5));
    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, mut rx) = mpsc::unbounded_channel();

    let counter = Arc::clone(&calls);
    pipeline
        .run(
            both(),
            TARGET,
            dir.path().join("out.mp4"),
            Immediate,
            move |result: Result<TranscodeReport>| {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = tx.send(result);
            },
        )
        .unwrap();

    let report = rx.recv().await.unwrap().unwrap();
    assert_eq!(report.channels.len(), 2);
    assert!(report
        .channels
        .iter()
        .all(|c| c.outcome == ChannelOutcome::Finished && c.samples == 5));

    // The sender was consumed by the single call
    assert!(rx.recv().await.is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_asset_without_tracks_is_refused_up_front() {
    let dir = tempfile::tempdir().unwrap();
    let (pipeline, journal) = memory_pipeline(Script::samples(5));
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&calls);
    let result = pipeline.run(
        MemoryAsset::parse("tag=empty"),
        TARGET,
        dir.path().join("out.mp4"),
        Immediate,
        move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        },
    );

    assert!(matches!(result, Err(ResizeError::NoMediaTracks)));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(journal.lock().writers_created, 0);
    assert!(!dir.path().join("out.mp4").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_finalize_waits_for_the_slower_channel() {
    let dir = tempfile::tempdir().unwrap();
    let mut script = Script::samples(4);
    script.delay = Some((MediaKind::Video, Duration::from_millis(40)));
    let (pipeline, journal) = memory_pipeline(script);

    let report = pipeline
        .transcode(both(), TARGET, dir.path().join("out.mp4"))
        .await
        .unwrap();

    assert_eq!(report.channels.len(), 2);
    let journal = journal.lock();
    assert_eq!(journal.appended_of(MediaKind::Audio), vec![0, 1, 2, 3]);
    assert_eq!(journal.appended_of(MediaKind::Video), vec![0, 1, 2, 3]);
    // Audio finishes first; finalize only runs once video is done too
    assert_eq!(journal.finished, vec![MediaKind::Audio, MediaKind::Video]);
    assert_eq!(journal.finished_at_finalize, vec![2]);

    let written = std::fs::read_to_string(dir.path().join("out.mp4")).unwrap();
    assert!(written.contains("t:audio:3"));
    assert!(written.contains("t:video:3"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_rejected_append_fails_after_sibling_completes() {
    let dir = tempfile::tempdir().unwrap();
    let mut script = Script::samples(6);
    script.reject = Some((MediaKind::Audio, 2));
    script.delay = Some((MediaKind::Video, Duration::from_millis(20)));
    let (pipeline, journal) = memory_pipeline(script);

    let err = pipeline
        .transcode(both(), TARGET, dir.path().join("out.mp4"))
        .await
        .unwrap_err();

    assert!(matches!(err, ResizeError::Append { kind: MediaKind::Audio, .. }));
    let journal = journal.lock();
    // No retry of the rejected sample, nothing after it
    assert_eq!(journal.appended_of(MediaKind::Audio), vec![0, 1]);
    assert_eq!(journal.appended_of(MediaKind::Video), vec![0, 1, 2, 3, 4, 5]);
    assert_eq!(journal.finished_at_finalize, vec![2]);
    assert!(!dir.path().join("out.mp4").exists());
}

#[tokio::test]
async fn test_reader_error_wins_over_finalize() {
    let dir = tempfile::tempdir().unwrap();
    let mut script = Script::samples(3);
    script.read_error = Some("corrupt packet".into());
    let (pipeline, journal) = memory_pipeline(script);

    let err = pipeline
        .transcode(both(), TARGET, dir.path().join("out.mp4"))
        .await
        .unwrap_err();

    assert!(matches!(err, ResizeError::Read(msg) if msg == "corrupt packet"));
    assert_eq!(journal.lock().finalize_calls, 0);
}

#[tokio::test]
async fn test_existing_output_is_not_overwritten() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.mp4");
    std::fs::write(&output, b"keep me").unwrap();
    let (pipeline, _journal) = memory_pipeline(Script::samples(2));

    let err = pipeline
        .transcode(both(), TARGET, output.clone())
        .await
        .unwrap_err();

    assert!(matches!(err, ResizeError::OutputExists(_)));
    assert_eq!(std::fs::read(&output).unwrap(), b"keep me");
}

#[tokio::test]
async fn test_audio_only_asset() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_asset(dir.path(), "song", "s", &[MediaKind::Audio]);
    let (pipeline, journal) = memory_pipeline(Script::samples(3));

    let asset = pipeline.backend().open_asset(&path).unwrap();
    let report = pipeline
        .transcode(asset, TARGET, dir.path().join("out.mp4"))
        .await
        .unwrap();

    assert_eq!(report.channels.len(), 1);
    assert_eq!(report.channels[0].kind, MediaKind::Audio);
    assert!(journal.lock().appended_of(MediaKind::Video).is_empty());
}

#[test]
fn test_completion_runs_on_main_queue() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();
    let dir = tempfile::tempdir().unwrap();
    let (pipeline, _journal) = {
        let _guard = runtime.enter();
        memory_pipeline(Script::samples(3))
    };
    let (queue, mut receiver) = MainQueue::new();
    let seen = Arc::new(parking_lot::Mutex::new(None));

    let slot = Arc::clone(&seen);
    pipeline
        .run(
            both(),
            TARGET,
            dir.path().join("out.mp4"),
            queue,
            move |result: Result<TranscodeReport>| {
                *slot.lock() = Some((std::thread::current().id(), result.is_ok()));
            },
        )
        .unwrap();

    assert!(receiver.run_next_blocking());
    let (thread, ok) = seen.lock().take().unwrap();
    assert_eq!(thread, std::thread::current().id());
    assert!(ok);
}
