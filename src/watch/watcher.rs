// src/watch/watcher.rs

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::errors::{HotrunError, Result};
use crate::fs::{FileSystem, walk_dirs};
use crate::supervisor::SupervisorEvent;
use crate::watch::event::{ChangeEvent, ChangeKind};
use crate::watch::filter::ArtifactFilter;

/// How directories under the root get registered with the OS watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchMode {
    /// Register the root recursively; directories created later are watched too.
    Recursive,
    /// Enumerate the tree once at start and register each directory on its
    /// own. Directories created later are not watched.
    Snapshot,
}

impl WatchMode {
    pub fn from_track_new_dirs(track_new_dirs: bool) -> Self {
        if track_new_dirs {
            WatchMode::Recursive
        } else {
            WatchMode::Snapshot
        }
    }
}

/// Lazy, infinite, non-restartable sequence of [`ChangeEvent`]s for one
/// directory tree.
///
/// Dropping the stream stops the underlying OS watcher.
pub struct ChangeStream {
    _inner: RecommendedWatcher,
    raw_rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    filter: ArtifactFilter,
    pending: VecDeque<ChangeEvent>,
    watched_dirs: usize,
}

impl std::fmt::Debug for ChangeStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeStream")
            .field("root", &self.filter.root())
            .field("watched_dirs", &self.watched_dirs)
            .finish_non_exhaustive()
    }
}

impl ChangeStream {
    /// Start monitoring `root`.
    ///
    /// Fails with [`HotrunError::WatchInit`] if the root cannot be monitored.
    pub fn start(
        root: impl Into<PathBuf>,
        mode: WatchMode,
        filter: ArtifactFilter,
        fs: Arc<dyn FileSystem>,
    ) -> Result<Self> {
        let root = root.into();
        if !fs.is_dir(&root) {
            return Err(watch_init(&root, "not an existing directory"));
        }
        // Canonicalize once so event paths and the filter share a base path.
        let root = fs.canonicalize(&root).unwrap_or_else(|_| root.clone());
        let filter = filter.with_root(root.clone());

        // Channel from the blocking notify callback into the async world.
        let (raw_tx, raw_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                // The receiver is gone once the stream is dropped; nothing to do then.
                let _ = raw_tx.send(res);
            },
            Config::default(),
        )?;

        let watched_dirs = match mode {
            WatchMode::Recursive => {
                watcher.watch(&root, RecursiveMode::Recursive)?;
                1
            }
            WatchMode::Snapshot => {
                let dirs = walk_dirs(fs.as_ref(), &root)
                    .map_err(|e| watch_init(&root, &format!("{e:#}")))?;
                for dir in dirs.iter() {
                    debug!(dir = ?dir, "adding directory to watcher");
                    watcher.watch(dir, RecursiveMode::NonRecursive)?;
                }
                dirs.len()
            }
        };

        info!(root = ?root, ?mode, watched_dirs, "file watcher started");

        Ok(Self {
            _inner: watcher,
            raw_rx,
            filter,
            pending: VecDeque::new(),
            watched_dirs,
        })
    }

    /// Number of directories registered at start.
    pub fn watched_dirs(&self) -> usize {
        self.watched_dirs
    }

    /// Next change that passed the filter.
    ///
    /// Returns `None` only if the OS watcher went away.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }

            match self.raw_rx.recv().await? {
                Ok(event) => self.accept(event),
                Err(err) => warn!(error = %err, "file watch error"),
            }
        }
    }

    fn accept(&mut self, event: Event) {
        trace!(?event, "received notify event");

        let Some(kind) = ChangeKind::from_notify(&event.kind) else {
            return;
        };

        for path in event.paths {
            if self.filter.is_excluded(&path) {
                trace!(path = ?path, "ignoring excluded path");
                continue;
            }
            self.pending.push_back(ChangeEvent::new(path, kind));
        }
    }
}

/// Handle for the watcher forwarding task.
///
/// The task owns the [`ChangeStream`]; aborting or dropping the handle's task
/// stops file watching.
#[derive(Debug)]
pub struct WatcherHandle {
    task: JoinHandle<()>,
}

impl WatcherHandle {
    pub fn abort(&self) {
        self.task.abort();
    }
}

/// Forward changes from `stream` into the supervisor's event channel.
///
/// After a change, further changes arriving within `debounce` are coalesced
/// and only the latest is forwarded. The task ends when the supervisor stops
/// listening.
pub fn spawn_watcher(
    mut stream: ChangeStream,
    supervisor_tx: mpsc::Sender<SupervisorEvent>,
    debounce: Duration,
) -> WatcherHandle {
    let task = tokio::spawn(async move {
        while let Some(first) = stream.next().await {
            let (change, coalesced, stream_open) = coalesce(&mut stream, first, debounce).await;
            debug!(path = ?change.path, kind = ?change.kind, coalesced, "change detected");

            if supervisor_tx
                .send(SupervisorEvent::ChangeDetected(change))
                .await
                .is_err()
            {
                debug!("supervisor channel closed; stopping watcher");
                return;
            }
            if !stream_open {
                break;
            }
        }
        warn!("file watcher stream ended; no further rebuilds will be triggered");
    });

    WatcherHandle { task }
}

/// Collect changes until `debounce` after `first` has passed.
///
/// Returns the latest change, how many were folded into it, and whether the
/// stream is still open.
async fn coalesce(
    stream: &mut ChangeStream,
    first: ChangeEvent,
    debounce: Duration,
) -> (ChangeEvent, usize, bool) {
    let mut latest = first;
    let mut coalesced = 0;
    if debounce.is_zero() {
        return (latest, coalesced, true);
    }

    let deadline = Instant::now() + debounce;
    loop {
        match tokio::time::timeout_at(deadline, stream.next()).await {
            Ok(Some(change)) => {
                trace!(path = ?change.path, "coalescing change");
                latest = change;
                coalesced += 1;
            }
            Ok(None) => return (latest, coalesced, false),
            Err(_) => return (latest, coalesced, true),
        }
    }
}

fn watch_init(root: &Path, message: &str) -> HotrunError {
    HotrunError::WatchInit {
        path: root.display().to_string(),
        message: message.to_string(),
    }
}
