// src/watch/event.rs

use std::path::PathBuf;
use std::time::SystemTime;

use notify::EventKind;
use notify::event::ModifyKind;

/// What happened to a watched path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
    Renamed,
    Other,
    /// Synthetic event seeded at startup (no filesystem change behind it).
    Startup,
}

impl ChangeKind {
    /// Map a `notify` event kind. Access-only notifications are not changes.
    pub fn from_notify(kind: &EventKind) -> Option<Self> {
        match kind {
            EventKind::Access(_) => None,
            EventKind::Create(_) => Some(ChangeKind::Created),
            EventKind::Modify(ModifyKind::Name(_)) => Some(ChangeKind::Renamed),
            EventKind::Modify(_) => Some(ChangeKind::Modified),
            EventKind::Remove(_) => Some(ChangeKind::Removed),
            EventKind::Any | EventKind::Other => Some(ChangeKind::Other),
        }
    }
}

/// A notification that watched source was added, modified or removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
    pub timestamp: SystemTime,
}

impl ChangeEvent {
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
            timestamp: SystemTime::now(),
        }
    }

    /// The event used to build and run once at startup.
    pub fn startup(root: impl Into<PathBuf>) -> Self {
        Self::new(root, ChangeKind::Startup)
    }
}
