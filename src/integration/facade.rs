//! Facade behavior against the in-memory backend

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc;

use super::fixtures::{memory_pipeline, write_asset, MemoryBackend, Script, SharedJournal};
use crate::error::{ResizeError, Result};
use crate::facade::{DirectoryLocator, OutputLocation, ResizeFacade};
use crate::media::{MediaKind, Size};
use crate::pipeline::TranscodeReport;

type MemoryFacade = ResizeFacade<MemoryBackend, DirectoryLocator, tokio::runtime::Handle>;

fn facade(assets: &Path, output: OutputLocation, script: Script) -> (MemoryFacade, SharedJournal) {
    let (pipeline, journal) = memory_pipeline(script);
    let facade = ResizeFacade::new(
        pipeline,
        DirectoryLocator::new(assets, "mp4"),
        output,
        Size::new(1920, 1080),
        tokio::runtime::Handle::current(),
    );
    (facade, journal)
}

async fn resize(facade: &MemoryFacade, name: &str) -> Result<TranscodeReport> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    facade.resize(name, move |result| {
        let _ = tx.send(result);
    });
    rx.recv().await.expect("completion dropped")
}

const AV: &[MediaKind] = &[MediaKind::Audio, MediaKind::Video];

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_repeated_resize_replaces_fixed_output() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out").join("video.mp4");
    let (facade, _journal) = facade(
        dir.path(),
        OutputLocation::Fixed(output.clone()),
        Script::samples(3),
    );

    write_asset(dir.path(), "clip", "first", AV);
    let report = resize(&facade, "clip").await.unwrap();
    assert_eq!(report.output, output);

    write_asset(dir.path(), "clip", "second", AV);
    resize(&facade, "clip").await.unwrap();

    let entries: Vec<PathBuf> = std::fs::read_dir(output.parent().unwrap())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(entries, vec![output.clone()]);

    let written = std::fs::read_to_string(&output).unwrap();
    assert!(written.contains("second:video:2"));
    assert!(!written.contains("first"));
    assert_eq!(facade.in_flight(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_per_request_outputs_are_distinct() {
    let dir = tempfile::tempdir().unwrap();
    let out_dir = dir.path().join("results");
    let (facade, _journal) = facade(
        dir.path(),
        OutputLocation::PerRequest {
            directory: out_dir.clone(),
        },
        Script::samples(2),
    );
    write_asset(dir.path(), "clip", "x", AV);

    let a = resize(&facade, "clip").await.unwrap();
    let b = resize(&facade, "clip").await.unwrap();

    assert_ne!(a.output, b.output);
    assert!(a.output.starts_with(&out_dir) && a.output.exists());
    assert!(b.output.exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_request_on_same_path_is_busy() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("video.mp4");
    let mut script = Script::samples(5);
    script.delay = Some((MediaKind::Video, Duration::from_millis(60)));
    let (facade, _journal) = facade(dir.path(), OutputLocation::Fixed(output), script);
    write_asset(dir.path(), "clip", "x", AV);

    let (tx, mut rx) = mpsc::unbounded_channel();
    for _ in 0..2 {
        let tx = tx.clone();
        facade.resize("clip", move |result| {
            let _ = tx.send(result);
        });
    }
    drop(tx);

    let mut results = Vec::new();
    while let Some(result) = rx.recv().await {
        results.push(result);
    }
    assert_eq!(results.len(), 2);
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(ResizeError::OutputBusy(_)))));
    assert_eq!(facade.in_flight(), 0);
}

#[tokio::test]
async fn test_unknown_asset_reported_through_completion() {
    let dir = tempfile::tempdir().unwrap();
    let (facade, journal) = facade(
        dir.path(),
        OutputLocation::Fixed(dir.path().join("video.mp4")),
        Script::samples(1),
    );

    let err = resize(&facade, "nope").await.unwrap_err();
    assert!(matches!(err, ResizeError::AssetNotFound(name) if name == "nope"));
    assert_eq!(journal.lock().assets_opened, 0);
}

#[tokio::test]
async fn test_asset_without_tracks_reported_through_completion() {
    let dir = tempfile::tempdir().unwrap();
    let (facade, journal) = facade(
        dir.path(),
        OutputLocation::Fixed(dir.path().join("video.mp4")),
        Script::samples(1),
    );
    write_asset(dir.path(), "silent", "x", &[]);

    let err = resize(&facade, "silent").await.unwrap_err();
    assert!(matches!(err, ResizeError::NoMediaTracks));
    assert_eq!(journal.lock().writers_created, 0);
    assert_eq!(facade.in_flight(), 0);
}

#[tokio::test]
async fn test_output_removal_failure_fails_request() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("video.mp4");
    // A directory where the output file should be cannot be removed as a file
    std::fs::create_dir_all(output.join("nested")).unwrap();
    let (facade, journal) = facade(dir.path(), OutputLocation::Fixed(output.clone()), Script::samples(1));
    write_asset(dir.path(), "clip", "x", AV);

    let err = resize(&facade, "clip").await.unwrap_err();
    assert!(matches!(err, ResizeError::Io(_)));
    assert_eq!(journal.lock().writers_created, 0);
    assert!(output.is_dir());
}
