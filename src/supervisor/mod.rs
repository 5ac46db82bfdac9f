// src/supervisor/mod.rs

//! Supervisor for the user application.
//!
//! The supervisor serializes "change detected → stop current generation →
//! rebuild → relaunch" cycles and guarantees at most one active generation.
//!
//! The pure state machine lives in [`core`]; the async/IO shell that owns the
//! event channel, generation tokens and backend is [`runtime`].

use std::fmt;

use crate::exec::BuildResult;
use crate::types::GenerationId;
use crate::watch::ChangeEvent;

pub mod core;
pub mod runtime;

pub use self::core::{CoreCommand, CoreStep, SupervisorCore};
pub use runtime::Supervisor;

/// How a generation's process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessExit {
    /// The process exited on its own.
    Exited { code: Option<i32>, success: bool },
    /// The process was stopped on request; `forced` if it had to be killed.
    Stopped { forced: bool },
    /// Stopping failed. The handle is gone regardless.
    StopFailed(String),
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessExit::Exited {
                code: Some(code), ..
            } => write!(f, "exited with status {code}"),
            ProcessExit::Exited { code: None, .. } => f.write_str("terminated by signal"),
            ProcessExit::Stopped { forced: false } => f.write_str("stopped"),
            ProcessExit::Stopped { forced: true } => f.write_str("killed after grace period"),
            ProcessExit::StopFailed(msg) => write!(f, "stop failed: {msg}"),
        }
    }
}

/// Events flowing into the supervisor from the watcher, the backend and the
/// signal handler.
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    /// Watched source changed (or the synthetic startup change).
    ChangeDetected(ChangeEvent),
    /// A generation's build ended, successfully or not.
    BuildFinished {
        generation: GenerationId,
        result: BuildResult,
    },
    /// A generation's process was launched.
    ProcessStarted {
        generation: GenerationId,
        pid: Option<u32>,
    },
    /// A generation's process could not be launched.
    ProcessStartFailed {
        generation: GenerationId,
        error: String,
    },
    /// A generation's process is gone and reaped.
    ProcessExited {
        generation: GenerationId,
        exit: ProcessExit,
    },
    /// Program-level shutdown.
    ShutdownRequested,
}

/// Externally visible supervisor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Building,
    Starting,
    Running,
    Stopping,
}

impl SupervisorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SupervisorState::Idle => "idle",
            SupervisorState::Building => "building",
            SupervisorState::Starting => "starting",
            SupervisorState::Running => "running",
            SupervisorState::Stopping => "stopping",
        }
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of one generation.
///
/// `Stopped` and `Failed` are terminal; a generation is only discarded once it
/// reached one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStatus {
    Building,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl GenerationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, GenerationStatus::Stopped | GenerationStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationStatus::Building => "building",
            GenerationStatus::Starting => "starting",
            GenerationStatus::Running => "running",
            GenerationStatus::Stopping => "stopping",
            GenerationStatus::Stopped => "stopped",
            GenerationStatus::Failed => "failed",
        }
    }
}

/// Snapshot published after every supervisor step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorStatus {
    pub state: SupervisorState,
    /// The active generation, if any.
    pub generation: Option<GenerationId>,
    /// Terminal status of the most recently finished generation.
    pub last_status: Option<GenerationStatus>,
}

impl Default for SupervisorStatus {
    fn default() -> Self {
        Self {
            state: SupervisorState::Idle,
            generation: None,
            last_status: None,
        }
    }
}
