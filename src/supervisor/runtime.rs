// src/supervisor/runtime.rs

use std::collections::HashMap;
use std::fmt;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::errors::Result;
use crate::exec::GenerationBackend;
use crate::hub::HubHandle;
use crate::types::GenerationId;

use super::core::{CoreCommand, SupervisorCore};
use super::{SupervisorEvent, SupervisorStatus};

/// Async IO shell around [`SupervisorCore`].
///
/// Reads events, feeds them to the core, and carries out the returned
/// commands through a [`GenerationBackend`]. Owns one cancellation token per
/// live generation, each derived from the program-level token so a shutdown
/// cascades into whatever is building or running.
pub struct Supervisor<B: GenerationBackend> {
    core: SupervisorCore,
    event_rx: mpsc::Receiver<SupervisorEvent>,
    backend: B,
    hub: HubHandle,
    shutdown: CancellationToken,
    generations: HashMap<GenerationId, CancellationToken>,
    status_tx: watch::Sender<SupervisorStatus>,
}

impl<B: GenerationBackend> fmt::Debug for Supervisor<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("core", &self.core)
            .field("generations", &self.generations.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl<B: GenerationBackend> Supervisor<B> {
    pub fn new(
        core: SupervisorCore,
        event_rx: mpsc::Receiver<SupervisorEvent>,
        backend: B,
        hub: HubHandle,
        shutdown: CancellationToken,
    ) -> Self {
        let (status_tx, _) = watch::channel(core.status());
        Self {
            core,
            event_rx,
            backend,
            hub,
            shutdown,
            generations: HashMap::new(),
            status_tx,
        }
    }

    /// Subscribe to status snapshots. Updated after every processed event.
    pub fn status(&self) -> watch::Receiver<SupervisorStatus> {
        self.status_tx.subscribe()
    }

    /// Main control loop.
    ///
    /// Returns once the core asks to exit (after shutdown teardown) or the
    /// event channel closes.
    pub async fn run(mut self) -> Result<()> {
        info!("supervisor started");
        let mut shutdown_seen = false;

        loop {
            let event = tokio::select! {
                biased;

                _ = self.shutdown.cancelled(), if !shutdown_seen => {
                    shutdown_seen = true;
                    SupervisorEvent::ShutdownRequested
                }

                maybe = self.event_rx.recv() => match maybe {
                    Some(event) => event,
                    None => {
                        info!("supervisor event channel closed; exiting");
                        break;
                    }
                },
            };

            debug!(?event, "supervisor received event");

            let step = self.core.step(event);

            for command in step.commands {
                self.execute_command(command).await?;
            }

            self.prune_generations();
            self.status_tx.send_replace(self.core.status());

            if !step.keep_running {
                info!("core requested exit; stopping supervisor");
                break;
            }
        }

        // Nothing may outlive the loop.
        for (_, token) in self.generations.drain() {
            token.cancel();
        }

        info!("supervisor exiting");
        Ok(())
    }

    async fn execute_command(&mut self, command: CoreCommand) -> Result<()> {
        match command {
            CoreCommand::StartBuild(generation) => {
                let token = self.shutdown.child_token();
                self.generations.insert(generation, token.clone());
                debug!(generation, "starting build");
                self.backend.start_build(generation, token).await?;
            }
            CoreCommand::StartProcess {
                generation,
                artifact,
            } => {
                let token = self
                    .generations
                    .entry(generation)
                    .or_insert_with(|| self.shutdown.child_token())
                    .clone();
                debug!(generation, artifact = ?artifact, "starting process");
                self.backend.start_process(generation, artifact, token).await?;
            }
            CoreCommand::StopGeneration(generation) => {
                if let Some(token) = self.generations.get(&generation) {
                    debug!(generation, "cancelling generation");
                    token.cancel();
                }
            }
            CoreCommand::Announce(text) => {
                self.hub.announce(text);
            }
            CoreCommand::Exit => {
                info!("core issued Exit command");
            }
        }
        Ok(())
    }

    /// Forget tokens of generations the core no longer tracks.
    fn prune_generations(&mut self) {
        let active = self.core.active_generation();
        self.generations.retain(|id, token| {
            if Some(*id) == active {
                return true;
            }
            token.cancel();
            false
        });
    }
}
