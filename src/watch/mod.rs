// src/watch/mod.rs

//! File watching and change detection.
//!
//! This module is responsible for:
//! - Wiring up a cross-platform filesystem watcher (`notify`).
//! - Filtering out the build's own artifacts and excluded paths.
//! - Turning filesystem notifications into [`ChangeEvent`]s for the supervisor.
//!
//! It does **not** know about builds or processes.

pub mod event;
pub mod filter;
pub mod watcher;

pub use event::{ChangeEvent, ChangeKind};
pub use filter::ArtifactFilter;
pub use watcher::{spawn_watcher, ChangeStream, WatchMode, WatcherHandle};
