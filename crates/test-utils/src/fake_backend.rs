use std::collections::VecDeque;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use hotrun::errors::{BuildStep, Result};
use hotrun::exec::{BuildError, BuildResult, GenerationBackend};
use hotrun::supervisor::{ProcessExit, SupervisorEvent};
use hotrun::types::GenerationId;

/// Scripted outcome of the next fake build.
#[derive(Debug, Clone)]
pub enum FakeBuild {
    Succeed,
    Fail(String),
}

/// What the supervisor asked the backend to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeCall {
    Build(GenerationId),
    Process(GenerationId),
}

/// Shared view of a [`FakeBackend`] for assertions.
#[derive(Debug, Clone, Default)]
pub struct FakeProbe {
    calls: Arc<Mutex<Vec<FakeCall>>>,
    live: Arc<AtomicUsize>,
    max_live: Arc<AtomicUsize>,
}

impl FakeProbe {
    pub fn calls(&self) -> Vec<FakeCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn builds(&self) -> Vec<GenerationId> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                FakeCall::Build(g) => Some(g),
                _ => None,
            })
            .collect()
    }

    pub fn processes(&self) -> Vec<GenerationId> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                FakeCall::Process(g) => Some(g),
                _ => None,
            })
            .collect()
    }

    /// Fake processes currently "running".
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously running fake processes seen.
    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }
}

/// A fake backend that:
/// - records which generations were built and started
/// - finishes builds after `build_time` with a scripted outcome
/// - keeps fake processes "running" until their generation is cancelled
pub struct FakeBackend {
    events: mpsc::Sender<SupervisorEvent>,
    script: Arc<Mutex<VecDeque<FakeBuild>>>,
    build_time: Duration,
    probe: FakeProbe,
}

impl FakeBackend {
    pub fn new(events: mpsc::Sender<SupervisorEvent>) -> Self {
        Self {
            events,
            script: Arc::new(Mutex::new(VecDeque::new())),
            build_time: Duration::from_millis(20),
            probe: FakeProbe::default(),
        }
    }

    pub fn with_build_time(mut self, build_time: Duration) -> Self {
        self.build_time = build_time;
        self
    }

    /// Outcomes for the next builds, in order. Unscripted builds succeed.
    pub fn with_script(self, outcomes: impl IntoIterator<Item = FakeBuild>) -> Self {
        self.script.lock().unwrap().extend(outcomes);
        self
    }

    pub fn probe(&self) -> FakeProbe {
        self.probe.clone()
    }
}

impl GenerationBackend for FakeBackend {
    fn start_build(
        &mut self,
        generation: GenerationId,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        self.probe.calls.lock().unwrap().push(FakeCall::Build(generation));
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(FakeBuild::Succeed);
        let events = self.events.clone();
        let build_time = self.build_time;

        Box::pin(async move {
            tokio::spawn(async move {
                let artifact = PathBuf::from("/fake/artifact");
                let result = tokio::select! {
                    _ = tokio::time::sleep(build_time) => match outcome {
                        FakeBuild::Succeed => BuildResult::succeeded(artifact),
                        FakeBuild::Fail(message) => BuildResult::failed(
                            artifact,
                            BuildError::Failed { step: BuildStep::Compile, message },
                        ),
                    },
                    _ = cancel.cancelled() => BuildResult::failed(artifact, BuildError::Cancelled),
                };
                let _ = events
                    .send(SupervisorEvent::BuildFinished { generation, result })
                    .await;
            });
            Ok(())
        })
    }

    fn start_process(
        &mut self,
        generation: GenerationId,
        _artifact: PathBuf,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        self.probe.calls.lock().unwrap().push(FakeCall::Process(generation));
        let events = self.events.clone();
        let probe = self.probe.clone();

        Box::pin(async move {
            tokio::spawn(async move {
                if cancel.is_cancelled() {
                    let _ = events
                        .send(SupervisorEvent::ProcessStartFailed {
                            generation,
                            error: "cancelled before launch".into(),
                        })
                        .await;
                    return;
                }

                let now_live = probe.live.fetch_add(1, Ordering::SeqCst) + 1;
                probe.max_live.fetch_max(now_live, Ordering::SeqCst);
                let _ = events
                    .send(SupervisorEvent::ProcessStarted {
                        generation,
                        pid: Some(10_000 + generation as u32),
                    })
                    .await;

                cancel.cancelled().await;
                probe.live.fetch_sub(1, Ordering::SeqCst);
                let _ = events
                    .send(SupervisorEvent::ProcessExited {
                        generation,
                        exit: ProcessExit::Stopped { forced: false },
                    })
                    .await;
            });
            Ok(())
        })
    }
}
