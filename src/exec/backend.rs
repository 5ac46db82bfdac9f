// src/exec/backend.rs

//! Pluggable generation backend.
//!
//! The supervisor runtime talks to a `GenerationBackend` instead of spawning
//! builds and processes itself. Both operations return as soon as the work
//! has been handed off; progress comes back as [`SupervisorEvent`]s.
//!
//! - [`RealBackend`] runs the real [`Builder`] and [`ProcessRunner`].
//! - Tests provide their own backend that records calls and emits events
//!   directly.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::errors::Result;
use crate::exec::builder::Builder;
use crate::exec::output::OutputSink;
use crate::exec::runner::ProcessRunner;
use crate::hub::HubHandle;
use crate::supervisor::{ProcessExit, SupervisorEvent};
use crate::types::GenerationId;

/// Trait abstracting how a generation is built and run.
///
/// Contract for implementations:
/// - every `start_build` eventually yields exactly one
///   `SupervisorEvent::BuildFinished` for that generation;
/// - every `start_process` eventually yields either `ProcessStartFailed`, or
///   `ProcessStarted` followed by `ProcessExited`;
/// - once `cancel` fires, the build is abandoned or the process stopped
///   and reaped before the final event is sent.
pub trait GenerationBackend: Send {
    fn start_build(
        &mut self,
        generation: GenerationId,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    fn start_process(
        &mut self,
        generation: GenerationId,
        artifact: PathBuf,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Production backend: real toolchain invocations and real child processes.
pub struct RealBackend {
    builder: Arc<Builder>,
    runner: Arc<ProcessRunner>,
    hub: HubHandle,
    events: mpsc::Sender<SupervisorEvent>,
}

impl RealBackend {
    pub fn new(
        builder: Builder,
        runner: ProcessRunner,
        hub: HubHandle,
        events: mpsc::Sender<SupervisorEvent>,
    ) -> Self {
        Self {
            builder: Arc::new(builder),
            runner: Arc::new(runner),
            hub,
            events,
        }
    }
}

impl GenerationBackend for RealBackend {
    fn start_build(
        &mut self,
        generation: GenerationId,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let builder = Arc::clone(&self.builder);
        let sink = OutputSink::new(self.hub.clone(), cancel.clone());
        let events = self.events.clone();

        Box::pin(async move {
            tokio::spawn(async move {
                let result = builder.build(&sink, &cancel).await;
                debug!(generation, success = result.success, "build task finished");
                if events
                    .send(SupervisorEvent::BuildFinished { generation, result })
                    .await
                    .is_err()
                {
                    debug!(generation, "supervisor gone; dropping build result");
                }
            });
            Ok(())
        })
    }

    fn start_process(
        &mut self,
        generation: GenerationId,
        artifact: PathBuf,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let runner = Arc::clone(&self.runner);
        let sink = OutputSink::new(self.hub.clone(), cancel.clone());
        let events = self.events.clone();

        Box::pin(async move {
            tokio::spawn(run_generation_process(
                runner, generation, artifact, sink, cancel, events,
            ));
            Ok(())
        })
    }
}

/// Own one generation's process from launch to reap.
async fn run_generation_process(
    runner: Arc<ProcessRunner>,
    generation: GenerationId,
    artifact: PathBuf,
    sink: OutputSink,
    cancel: CancellationToken,
    events: mpsc::Sender<SupervisorEvent>,
) {
    // Superseded between build and launch: never start it.
    if cancel.is_cancelled() {
        let _ = events
            .send(SupervisorEvent::ProcessStartFailed {
                generation,
                error: "cancelled before launch".to_string(),
            })
            .await;
        return;
    }

    let mut process = match runner.start(&artifact, sink).await {
        Ok(process) => process,
        Err(err) => {
            warn!(generation, error = %err, "failed to start user application");
            let _ = events
                .send(SupervisorEvent::ProcessStartFailed {
                    generation,
                    error: err.to_string(),
                })
                .await;
            return;
        }
    };

    let _ = events
        .send(SupervisorEvent::ProcessStarted {
            generation,
            pid: process.pid(),
        })
        .await;

    let exit = tokio::select! {
        waited = process.wait() => {
            process.drain_output().await;
            match waited {
                Ok(status) => ProcessExit::Exited {
                    code: status.code(),
                    success: status.success(),
                },
                Err(err) => {
                    // Make sure nothing is left running behind a failed wait.
                    error!(generation, error = %err, "waiting for user application failed");
                    match process.stop(runner.stop_grace()).await {
                        Ok(outcome) => ProcessExit::Stopped { forced: outcome.was_forced() },
                        Err(stop_err) => ProcessExit::StopFailed(stop_err.to_string()),
                    }
                }
            }
        }

        _ = cancel.cancelled() => {
            debug!(generation, "generation cancelled; stopping user application");
            match process.stop(runner.stop_grace()).await {
                Ok(outcome) => ProcessExit::Stopped { forced: outcome.was_forced() },
                Err(err) => {
                    error!(generation, error = %err, "failed to stop user application");
                    ProcessExit::StopFailed(err.to_string())
                }
            }
        }
    };

    let _ = events
        .send(SupervisorEvent::ProcessExited { generation, exit })
        .await;
}
