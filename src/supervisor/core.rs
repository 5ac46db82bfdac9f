// src/supervisor/core.rs

//! Pure supervisor state machine.
//!
//! [`SupervisorCore`] consumes [`SupervisorEvent`]s and produces:
//! - an updated state
//! - a list of [`CoreCommand`]s describing what the IO shell should do next
//!
//! It has no channels, no Tokio types, and performs no IO, so every
//! transition can be unit tested directly.

use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::exec::BuildResult;
use crate::supervisor::{
    GenerationStatus, ProcessExit, SupervisorEvent, SupervisorState, SupervisorStatus,
};
use crate::types::GenerationId;
use crate::watch::{ChangeEvent, ChangeKind};

/// Command produced by the core, executed by the runtime shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreCommand {
    /// Create the generation's token and start building.
    StartBuild(GenerationId),
    /// Launch the generation's freshly built artifact.
    StartProcess {
        generation: GenerationId,
        artifact: PathBuf,
    },
    /// Cancel the generation: abandon its build or stop its process.
    StopGeneration(GenerationId),
    /// Publish a notice line to observers.
    Announce(String),
    /// Leave the control loop.
    Exit,
}

/// Decision returned after handling a single event.
#[derive(Debug, Clone, Default)]
pub struct CoreStep {
    pub commands: Vec<CoreCommand>,
    pub keep_running: bool,
}

impl CoreStep {
    fn running(commands: Vec<CoreCommand>) -> Self {
        Self {
            commands,
            keep_running: true,
        }
    }

    fn exit(mut commands: Vec<CoreCommand>) -> Self {
        commands.push(CoreCommand::Exit);
        Self {
            commands,
            keep_running: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct GenerationRecord {
    id: GenerationId,
    status: GenerationStatus,
}

/// Supervisor state. Holds at most one non-terminal generation.
#[derive(Debug, Default)]
pub struct SupervisorCore {
    current: Option<GenerationRecord>,
    last_id: GenerationId,
    /// Change that arrived while a generation was being torn down.
    pending: Option<ChangeEvent>,
    shutting_down: bool,
    last_status: Option<GenerationStatus>,
}

impl SupervisorCore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SupervisorState {
        match self.current.map(|g| g.status) {
            None => SupervisorState::Idle,
            Some(GenerationStatus::Building) => SupervisorState::Building,
            Some(GenerationStatus::Starting) => SupervisorState::Starting,
            Some(GenerationStatus::Running) => SupervisorState::Running,
            Some(GenerationStatus::Stopping) => SupervisorState::Stopping,
            // Terminal generations are never kept as current.
            Some(GenerationStatus::Stopped | GenerationStatus::Failed) => SupervisorState::Idle,
        }
    }

    /// Id of the generation that is building, running or being torn down.
    pub fn active_generation(&self) -> Option<GenerationId> {
        self.current.map(|g| g.id)
    }

    pub fn last_generation_id(&self) -> GenerationId {
        self.last_id
    }

    pub fn has_pending_change(&self) -> bool {
        self.pending.is_some()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    pub fn status(&self) -> SupervisorStatus {
        SupervisorStatus {
            state: self.state(),
            generation: self.active_generation(),
            last_status: self.last_status,
        }
    }

    /// Handle a single event.
    pub fn step(&mut self, event: SupervisorEvent) -> CoreStep {
        match event {
            SupervisorEvent::ChangeDetected(change) => self.on_change(change),
            SupervisorEvent::BuildFinished { generation, result } => {
                self.on_build_finished(generation, result)
            }
            SupervisorEvent::ProcessStarted { generation, pid } => {
                self.on_process_started(generation, pid)
            }
            SupervisorEvent::ProcessStartFailed { generation, error } => {
                self.on_process_start_failed(generation, error)
            }
            SupervisorEvent::ProcessExited { generation, exit } => {
                self.on_process_exited(generation, exit)
            }
            SupervisorEvent::ShutdownRequested => self.on_shutdown(),
        }
    }

    fn on_change(&mut self, change: ChangeEvent) -> CoreStep {
        if self.shutting_down {
            debug!(path = ?change.path, "shutting down; ignoring change");
            return CoreStep::running(Vec::new());
        }

        let Some(current) = self.current.as_mut() else {
            return CoreStep::running(self.begin_generation(&change));
        };

        let status = current.status;
        match status {
            GenerationStatus::Stopping => {
                debug!(generation = current.id, path = ?change.path, "teardown in progress; coalescing change");
                self.pending = Some(change);
                CoreStep::running(Vec::new())
            }
            GenerationStatus::Building | GenerationStatus::Starting | GenerationStatus::Running => {
                let id = current.id;
                info!(generation = id, path = ?change.path, "change supersedes current generation");
                current.status = GenerationStatus::Stopping;
                let notice = format!("{}; stopping generation {id}", describe_change(&change));
                self.pending = Some(change);
                CoreStep::running(vec![
                    CoreCommand::Announce(notice),
                    CoreCommand::StopGeneration(id),
                ])
            }
            GenerationStatus::Stopped | GenerationStatus::Failed => {
                self.current = None;
                CoreStep::running(self.begin_generation(&change))
            }
        }
    }

    fn on_build_finished(&mut self, generation: GenerationId, result: BuildResult) -> CoreStep {
        let Some(current) = self.current_for(generation) else {
            return CoreStep::running(Vec::new());
        };

        let status = current.status;
        match status {
            GenerationStatus::Building if result.success => {
                current.status = GenerationStatus::Starting;
                CoreStep::running(vec![
                    CoreCommand::Announce(format!("build {generation} succeeded; starting")),
                    CoreCommand::StartProcess {
                        generation,
                        artifact: result.artifact_path,
                    },
                ])
            }
            GenerationStatus::Building => {
                let reason = result
                    .error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "unknown error".to_string());
                warn!(generation, error = %reason, "build failed");
                self.finish(GenerationStatus::Failed);
                CoreStep::running(vec![CoreCommand::Announce(format!(
                    "build {generation} failed: {reason}"
                ))])
            }
            GenerationStatus::Stopping => self.teardown_complete(),
            other => {
                warn!(generation, status = other.as_str(), "unexpected build result; ignoring");
                CoreStep::running(Vec::new())
            }
        }
    }

    fn on_process_started(&mut self, generation: GenerationId, pid: Option<u32>) -> CoreStep {
        let Some(current) = self.current_for(generation) else {
            return CoreStep::running(Vec::new());
        };

        let status = current.status;
        match status {
            GenerationStatus::Starting => {
                current.status = GenerationStatus::Running;
                let pid = pid.map(|p| p.to_string()).unwrap_or_else(|| "?".to_string());
                CoreStep::running(vec![CoreCommand::Announce(format!(
                    "generation {generation} running (pid {pid})"
                ))])
            }
            // Stop already requested; wait for the exit report.
            _ => CoreStep::running(Vec::new()),
        }
    }

    fn on_process_start_failed(&mut self, generation: GenerationId, error: String) -> CoreStep {
        let Some(current) = self.current_for(generation) else {
            return CoreStep::running(Vec::new());
        };

        let status = current.status;
        match status {
            GenerationStatus::Stopping => self.teardown_complete(),
            _ => {
                warn!(generation, %error, "user application failed to start");
                self.finish(GenerationStatus::Failed);
                CoreStep::running(vec![CoreCommand::Announce(format!(
                    "generation {generation} failed to start: {error}"
                ))])
            }
        }
    }

    fn on_process_exited(&mut self, generation: GenerationId, exit: ProcessExit) -> CoreStep {
        let Some(current) = self.current_for(generation) else {
            return CoreStep::running(Vec::new());
        };

        let status = current.status;
        match status {
            GenerationStatus::Stopping => {
                let mut step = self.teardown_complete();
                if let ProcessExit::StopFailed(ref msg) = exit {
                    step.commands.insert(
                        0,
                        CoreCommand::Announce(format!("generation {generation}: stop failed: {msg}")),
                    );
                }
                step
            }
            _ => {
                info!(generation, %exit, "user application exited on its own");
                self.finish(GenerationStatus::Stopped);
                CoreStep::running(vec![CoreCommand::Announce(format!(
                    "generation {generation} {exit}"
                ))])
            }
        }
    }

    fn on_shutdown(&mut self) -> CoreStep {
        self.shutting_down = true;
        self.pending = None;

        let Some(current) = self.current.as_mut() else {
            info!("shutdown requested while idle");
            return CoreStep::exit(Vec::new());
        };

        let status = current.status;
        match status {
            GenerationStatus::Stopping => CoreStep::running(Vec::new()),
            _ => {
                let id = current.id;
                info!(generation = id, "shutdown requested; stopping current generation");
                current.status = GenerationStatus::Stopping;
                CoreStep::running(vec![
                    CoreCommand::Announce(format!("shutting down; stopping generation {id}")),
                    CoreCommand::StopGeneration(id),
                ])
            }
        }
    }

    /// Current generation record if `generation` is it; stale ids are ignored.
    fn current_for(&mut self, generation: GenerationId) -> Option<&mut GenerationRecord> {
        match self.current.as_mut() {
            Some(current) if current.id == generation => Some(current),
            _ => {
                debug!(generation, "event for stale generation; ignoring");
                None
            }
        }
    }

    fn begin_generation(&mut self, change: &ChangeEvent) -> Vec<CoreCommand> {
        self.last_id += 1;
        let id = self.last_id;
        self.current = Some(GenerationRecord {
            id,
            status: GenerationStatus::Building,
        });
        info!(generation = id, path = ?change.path, kind = ?change.kind, "starting generation");
        vec![
            CoreCommand::Announce(format!("{}; building generation {id}", describe_change(change))),
            CoreCommand::StartBuild(id),
        ]
    }

    fn finish(&mut self, status: GenerationStatus) {
        debug_assert!(status.is_terminal());
        if let Some(current) = self.current.take() {
            debug!(generation = current.id, status = status.as_str(), "generation finished");
        }
        self.last_status = Some(status);
    }

    /// The generation being stopped is fully gone; exit or start the next one.
    fn teardown_complete(&mut self) -> CoreStep {
        self.finish(GenerationStatus::Stopped);

        if self.shutting_down {
            return CoreStep::exit(Vec::new());
        }

        match self.pending.take() {
            Some(change) => CoreStep::running(self.begin_generation(&change)),
            None => CoreStep::running(Vec::new()),
        }
    }
}

fn describe_change(change: &ChangeEvent) -> String {
    match change.kind {
        ChangeKind::Startup => "startup".to_string(),
        _ => format!("change detected in {}", change.path.display()),
    }
}
