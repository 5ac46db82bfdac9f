// src/exec/mod.rs

//! Build and process execution layer.
//!
//! Everything that spawns external programs lives here, using
//! `tokio::process::Command`:
//!
//! - [`builder`] runs the dependency fetch and compile steps.
//! - [`runner`] launches the user application from its live copy and owns
//!   the stop sequence (signal, bounded wait, kill, reap).
//! - [`output`] pumps child output line by line into the hub.
//! - [`backend`] provides the `GenerationBackend` trait the supervisor drives
//!   and the production `RealBackend`; tests replace it with a fake.

pub mod backend;
pub mod builder;
pub mod group;
pub mod output;
pub mod runner;

pub use backend::{GenerationBackend, RealBackend};
pub use builder::{BuildError, BuildResult, Builder};
pub use output::{OutputSink, OutputTail, pump_lines};
pub use runner::{ProcessRunner, RunningProcess, StopOutcome};
