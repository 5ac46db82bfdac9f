// src/exec/builder.rs

//! Runs the external build toolchain against the watched directory.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{CommandSpec, ConfigFile};
use crate::errors::{BuildStep, HotrunError};
use crate::exec::group;
use crate::exec::output::{OutputSink, OutputTail, pump_lines};

/// How long to wait for output pumps to drain after a step's process exited.
const PUMP_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Why a build did not produce an artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// A step could not be run or exited unsuccessfully.
    Failed { step: BuildStep, message: String },
    /// The generation was superseded while building.
    Cancelled,
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::Failed { step, message } => write!(f, "{step} step failed: {message}"),
            BuildError::Cancelled => f.write_str("build cancelled"),
        }
    }
}

impl From<BuildError> for HotrunError {
    fn from(err: BuildError) -> Self {
        match err {
            BuildError::Failed { step, message } => HotrunError::Build { step, message },
            BuildError::Cancelled => HotrunError::Other(anyhow::anyhow!("build cancelled")),
        }
    }
}

/// Outcome of one build, consumed once by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildResult {
    pub success: bool,
    pub artifact_path: PathBuf,
    pub error: Option<BuildError>,
}

impl BuildResult {
    pub fn succeeded(artifact_path: impl Into<PathBuf>) -> Self {
        Self {
            success: true,
            artifact_path: artifact_path.into(),
            error: None,
        }
    }

    pub fn failed(artifact_path: impl Into<PathBuf>, error: BuildError) -> Self {
        Self {
            success: false,
            artifact_path: artifact_path.into(),
            error: Some(error),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.error, Some(BuildError::Cancelled))
    }
}

/// Dependency fetch + compile, in that order, inside `dir`.
#[derive(Debug, Clone)]
pub struct Builder {
    dir: PathBuf,
    fetch: CommandSpec,
    compile: CommandSpec,
    artifact_path: PathBuf,
}

impl Builder {
    pub fn new(
        dir: impl Into<PathBuf>,
        fetch: CommandSpec,
        compile: CommandSpec,
        artifact_name: &str,
    ) -> Self {
        let dir = dir.into();
        let artifact_path = dir.join(artifact_name);
        Self {
            dir,
            fetch,
            compile,
            artifact_path,
        }
    }

    pub fn from_config(cfg: &ConfigFile) -> Self {
        Self::new(
            cfg.watch.root.clone(),
            cfg.build.fetch.clone(),
            cfg.build.compile.clone(),
            &cfg.build.artifact,
        )
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn artifact_path(&self) -> &Path {
        &self.artifact_path
    }

    /// Run both steps, streaming their combined output into `sink`.
    ///
    /// If the fetch step fails, compile is never attempted. Safe to re-run:
    /// the compile step overwrites the artifact at its fixed path.
    pub async fn build(&self, sink: &OutputSink, cancel: &CancellationToken) -> BuildResult {
        info!(dir = ?self.dir, "building user application");

        for (step, spec) in [
            (BuildStep::Fetch, &self.fetch),
            (BuildStep::Compile, &self.compile),
        ] {
            if let Err(err) = self.run_step(step, spec, sink, cancel).await {
                match &err {
                    BuildError::Cancelled => debug!(%step, "build cancelled"),
                    BuildError::Failed { message, .. } => {
                        warn!(%step, error = %message, "build step failed")
                    }
                }
                return BuildResult::failed(&self.artifact_path, err);
            }
        }

        info!(artifact = ?self.artifact_path, "build succeeded");
        BuildResult::succeeded(&self.artifact_path)
    }

    async fn run_step(
        &self,
        step: BuildStep,
        spec: &CommandSpec,
        sink: &OutputSink,
        cancel: &CancellationToken,
    ) -> Result<(), BuildError> {
        if cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }

        debug!(%step, cmd = %spec.display(), "running build step");

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&self.dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        group::isolate(&mut cmd);

        let mut child = cmd.spawn().map_err(|e| BuildError::Failed {
            step,
            message: format!("cannot run `{}`: {e}", spec.display()),
        })?;
        let pgid = child.id();

        let pumps = [
            child
                .stdout
                .take()
                .map(|out| tokio::spawn(pump_lines(out, sink.clone(), "stdout"))),
            child
                .stderr
                .take()
                .map(|err| tokio::spawn(pump_lines(err, sink.clone(), "stderr"))),
        ];

        tokio::select! {
            status_res = child.wait() => {
                let tail = drain(pumps).await;
                let status = status_res.map_err(|e| BuildError::Failed {
                    step,
                    message: format!("waiting for `{}`: {e}", spec.display()),
                })?;

                if status.success() {
                    debug!(%step, "build step succeeded");
                    return Ok(());
                }

                let mut message = format!("`{}` exited with {status}", spec.display());
                if !tail.is_empty() {
                    message.push_str(":\n");
                    message.push_str(&tail.join());
                }
                Err(BuildError::Failed { step, message })
            }

            _ = cancel.cancelled() => {
                debug!(%step, "cancellation requested; killing build step");
                if let Some(pgid) = pgid {
                    group::kill_remaining(pgid);
                }
                if let Err(e) = child.kill().await {
                    warn!(%step, error = %e, "failed to kill build step on cancellation");
                }
                for pump in pumps.into_iter().flatten() {
                    pump.abort();
                }
                Err(BuildError::Cancelled)
            }
        }
    }
}

async fn drain(pumps: [Option<JoinHandle<OutputTail>>; 2]) -> OutputTail {
    let mut tail = OutputTail::default();
    for pump in pumps.into_iter().flatten() {
        let abort = pump.abort_handle();
        match tokio::time::timeout(PUMP_DRAIN_TIMEOUT, pump).await {
            Ok(Ok(part)) => tail.extend(part),
            Ok(Err(e)) => debug!(error = %e, "output pump task failed"),
            Err(_) => {
                debug!("output pump still open after step exit; abandoning it");
                abort.abort();
            }
        }
    }
    tail
}
