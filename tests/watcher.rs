// tests/watcher.rs

mod common;
use crate::common::{TestResult, init_tracing, with_timeout};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use hotrun::errors::HotrunError;
use hotrun::fs::mock::MockFileSystem;
use hotrun::fs::{FileSystem, RealFileSystem, walk_dirs};
use hotrun::supervisor::SupervisorEvent;
use hotrun::watch::{ArtifactFilter, ChangeStream, WatchMode, spawn_watcher};

fn real_fs() -> Arc<dyn FileSystem> {
    Arc::new(RealFileSystem)
}

fn filter(root: &Path, exclude: &[&str]) -> anyhow::Result<ArtifactFilter> {
    let exclude: Vec<String> = exclude.iter().map(|s| s.to_string()).collect();
    ArtifactFilter::new(root, ["app", "app-run"], &exclude)
}

fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

/// Give the OS watcher a moment to settle before producing events.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn source_edit_is_reported() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let mut stream = ChangeStream::start(
        dir.path(),
        WatchMode::Recursive,
        filter(dir.path(), &[])?,
        real_fs(),
    )?;
    settle().await;

    std::fs::write(dir.path().join("main.go"), "package main\n")?;

    let change = with_timeout(stream.next()).await.ok_or("stream ended")?;
    assert_eq!(file_name(&change.path), Some("main.go"));
    Ok(())
}

#[tokio::test]
async fn artifacts_and_excluded_paths_are_ignored() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let mut stream = ChangeStream::start(
        dir.path(),
        WatchMode::Recursive,
        filter(dir.path(), &["*.log"])?,
        real_fs(),
    )?;
    settle().await;

    std::fs::write(dir.path().join("app"), "binary")?;
    std::fs::write(dir.path().join("app-run"), "binary")?;
    std::fs::write(dir.path().join("debug.log"), "noise")?;
    std::fs::write(dir.path().join("main.go"), "package main\n")?;

    let change = with_timeout(stream.next()).await.ok_or("stream ended")?;
    assert_eq!(file_name(&change.path), Some("main.go"));
    Ok(())
}

#[tokio::test]
async fn recursive_mode_sees_directories_created_later() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let mut stream = ChangeStream::start(
        dir.path(),
        WatchMode::Recursive,
        filter(dir.path(), &["pkg"])?,
        real_fs(),
    )?;
    settle().await;

    // The directory creation itself is excluded; its contents are not.
    std::fs::create_dir(dir.path().join("pkg"))?;
    settle().await;
    std::fs::write(dir.path().join("pkg").join("util.go"), "package pkg\n")?;

    let change = with_timeout(stream.next()).await.ok_or("stream ended")?;
    assert_eq!(file_name(&change.path), Some("util.go"));
    Ok(())
}

#[tokio::test]
async fn snapshot_mode_registers_every_existing_directory() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    std::fs::create_dir_all(dir.path().join("a").join("b"))?;
    std::fs::create_dir_all(dir.path().join("c"))?;
    std::fs::write(dir.path().join("a").join("file.txt"), "x")?;

    let stream = ChangeStream::start(
        dir.path(),
        WatchMode::Snapshot,
        filter(dir.path(), &[])?,
        real_fs(),
    )?;
    assert_eq!(stream.watched_dirs(), 4);
    Ok(())
}

#[tokio::test]
async fn missing_root_fails_with_watch_init() -> TestResult {
    let dir = tempfile::tempdir()?;
    let missing = dir.path().join("nope");

    let err = ChangeStream::start(
        &missing,
        WatchMode::Recursive,
        filter(&missing, &[])?,
        real_fs(),
    )
    .expect_err("missing root must not be watchable");
    assert!(matches!(err, HotrunError::WatchInit { .. }), "got {err:?}");
    Ok(())
}

#[tokio::test]
async fn debounce_forwards_only_the_latest_change() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let stream = ChangeStream::start(
        dir.path(),
        WatchMode::Recursive,
        filter(dir.path(), &[])?,
        real_fs(),
    )?;
    let (tx, mut rx) = mpsc::channel(16);
    let watcher = spawn_watcher(stream, tx, Duration::from_millis(300));
    settle().await;

    for name in ["a.go", "b.go", "c.go"] {
        std::fs::write(dir.path().join(name), "package main\n")?;
    }

    let first = with_timeout(rx.recv()).await.ok_or("watcher stopped")?;
    let SupervisorEvent::ChangeDetected(change) = first else {
        return Err(format!("unexpected event {first:?}").into());
    };
    assert_eq!(file_name(&change.path), Some("c.go"));

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(rx.try_recv().is_err(), "burst should produce a single change");

    watcher.abort();
    Ok(())
}

#[test]
fn walk_dirs_lists_parents_before_children() -> anyhow::Result<()> {
    let fs = MockFileSystem::new();
    fs.add_dir("/proj/src/net");
    fs.add_dir("/proj/docs");
    fs.add_file("/proj/src/main.go", "package main");

    let dirs = walk_dirs(&fs, Path::new("/proj"))?;
    let expected: Vec<PathBuf> = ["/proj", "/proj/docs", "/proj/src", "/proj/src/net"]
        .iter()
        .map(PathBuf::from)
        .collect();
    assert_eq!(dirs, expected);
    Ok(())
}

#[test]
fn walk_dirs_skips_unreadable_subdirectories() -> anyhow::Result<()> {
    let fs = MockFileSystem::new();
    fs.add_dir("/proj/locked/inner");
    fs.add_dir("/proj/open");
    fs.deny_read("/proj/locked");

    let dirs = walk_dirs(&fs, Path::new("/proj"))?;
    assert!(dirs.contains(&PathBuf::from("/proj/locked")));
    assert!(!dirs.contains(&PathBuf::from("/proj/locked/inner")));
    assert!(dirs.contains(&PathBuf::from("/proj/open")));
    Ok(())
}

#[test]
fn walk_dirs_fails_on_unreadable_root() {
    let fs = MockFileSystem::new();
    fs.add_dir("/proj/src");
    fs.deny_read("/proj");

    assert!(walk_dirs(&fs, Path::new("/proj")).is_err());
    assert!(walk_dirs(&fs, Path::new("/missing")).is_err());
}

#[test]
fn snapshot_start_fails_on_mock_root_that_is_not_a_directory() {
    let fs = MockFileSystem::new();
    fs.add_file("/proj", "not a dir");

    let filter = ArtifactFilter::new("/proj", ["app"], &[]).expect("valid filter");
    let res = ChangeStream::start("/proj", WatchMode::Snapshot, filter, Arc::new(fs));
    assert!(matches!(res, Err(HotrunError::WatchInit { .. })));
}
