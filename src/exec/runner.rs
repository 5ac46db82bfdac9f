// src/exec/runner.rs

//! Lifecycle of one user-application process.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ConfigFile;
use crate::errors::{HotrunError, Result};
use crate::exec::group;
use crate::exec::output::{OutputSink, OutputTail, pump_lines};

/// How long to wait for output pumps after the process exited on its own.
const PUMP_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// How a stop request was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The process had already exited; nothing was signalled.
    AlreadyExited(ExitStatus),
    /// The process exited within the grace period after the terminate request.
    Terminated(ExitStatus),
    /// The grace period ran out (or signalling failed) and the process was killed.
    Killed(ExitStatus),
}

impl StopOutcome {
    pub fn status(&self) -> ExitStatus {
        match self {
            StopOutcome::AlreadyExited(s) | StopOutcome::Terminated(s) | StopOutcome::Killed(s) => *s,
        }
    }

    pub fn was_forced(&self) -> bool {
        matches!(self, StopOutcome::Killed(_))
    }
}

/// Starts the user application from a private live copy of the artifact.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    dir: PathBuf,
    live_path: PathBuf,
    args: Vec<String>,
    stop_grace: Duration,
}

impl ProcessRunner {
    pub fn new(
        dir: impl Into<PathBuf>,
        live_name: &str,
        args: Vec<String>,
        stop_grace: Duration,
    ) -> Self {
        let dir = dir.into();
        let live_path = dir.join(live_name);
        Self {
            dir,
            live_path,
            args,
            stop_grace,
        }
    }

    pub fn from_config(cfg: &ConfigFile) -> Self {
        Self::new(
            cfg.watch.root.clone(),
            &cfg.build.live_name,
            cfg.run.args.clone(),
            cfg.run.stop_grace,
        )
    }

    pub fn live_path(&self) -> &Path {
        &self.live_path
    }

    pub fn stop_grace(&self) -> Duration {
        self.stop_grace
    }

    /// Copy `artifact` to the live path and launch the copy.
    ///
    /// The live copy lets a later build overwrite `artifact` while this
    /// instance is still executing. Output of the process is streamed into
    /// `sink` for as long as it runs.
    pub async fn start(&self, artifact: &Path, sink: OutputSink) -> Result<RunningProcess> {
        self.prepare_live_copy(artifact).await?;

        let program = std::path::absolute(&self.live_path).map_err(|e| {
            HotrunError::ProcessStart(format!("resolving {:?}: {e}", self.live_path))
        })?;

        let mut cmd = Command::new(&program);
        cmd.args(&self.args)
            .current_dir(&self.dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        group::isolate(&mut cmd);

        let mut child = spawn_fresh_copy(&mut cmd)
            .await
            .map_err(|e| HotrunError::ProcessStart(format!("launching {:?}: {e}", program)))?;

        let pid = child.id();
        info!(pid, program = ?program, "user application started");

        let pumps = [
            child
                .stdout
                .take()
                .map(|out| tokio::spawn(pump_lines(out, sink.clone(), "stdout"))),
            child
                .stderr
                .take()
                .map(|err| tokio::spawn(pump_lines(err, sink.clone(), "stderr"))),
        ]
        .into_iter()
        .flatten()
        .collect();

        Ok(RunningProcess {
            child,
            pid,
            exit: None,
            pumps,
        })
    }

    async fn prepare_live_copy(&self, artifact: &Path) -> Result<()> {
        if !tokio::fs::try_exists(artifact).await.unwrap_or(false) {
            return Err(HotrunError::ProcessStart(format!(
                "artifact {:?} not found",
                artifact
            )));
        }

        tokio::fs::copy(artifact, &self.live_path)
            .await
            .map_err(|e| {
                HotrunError::ProcessStart(format!(
                    "copying {:?} to {:?}: {e}",
                    artifact, self.live_path
                ))
            })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o755);
            tokio::fs::set_permissions(&self.live_path, perms)
                .await
                .map_err(|e| {
                    HotrunError::ProcessStart(format!(
                        "making {:?} executable: {e}",
                        self.live_path
                    ))
                })?;
        }

        debug!(live = ?self.live_path, "live copy prepared");
        Ok(())
    }
}

/// Spawn `cmd`, retrying briefly while the just-written executable is still
/// held open for writing by a concurrently forked child (`ETXTBSY`).
async fn spawn_fresh_copy(cmd: &mut Command) -> std::io::Result<Child> {
    const ATTEMPTS: u32 = 5;
    let mut attempt = 1;
    loop {
        match cmd.spawn() {
            #[cfg(unix)]
            Err(e) if e.raw_os_error() == Some(libc::ETXTBSY) && attempt < ATTEMPTS => {
                debug!(attempt, "live copy busy; retrying launch");
                attempt += 1;
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            res => return res,
        }
    }
}

/// Opaque handle to a launched process.
///
/// [`stop`](Self::stop) always ends with the process reaped, whichever path
/// it took. Dropping the handle kills the process as a last resort.
#[derive(Debug)]
pub struct RunningProcess {
    child: Child,
    pid: Option<u32>,
    exit: Option<ExitStatus>,
    pumps: Vec<JoinHandle<OutputTail>>,
}

impl RunningProcess {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Exit status, if the process has been reaped.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit
    }

    /// Wait for the process to exit on its own and reap it.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        if let Some(status) = self.exit {
            return Ok(status);
        }
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| HotrunError::ProcessStop(format!("waiting for pid {:?}: {e}", self.pid)))?;
        self.exit = Some(status);
        self.sweep_group();
        Ok(status)
    }

    /// Let the output pumps deliver whatever the exited process wrote last.
    pub async fn drain_output(&mut self) {
        for pump in self.pumps.drain(..) {
            let abort = pump.abort_handle();
            if tokio::time::timeout(PUMP_DRAIN_TIMEOUT, pump).await.is_err() {
                debug!(pid = self.pid, "output pump still open after exit; abandoning it");
                abort.abort();
            }
        }
    }

    /// Terminate: signal the process group, wait up to `grace`, force-kill
    /// the group, then reap. Group members left behind by the leader are
    /// killed on every path.
    ///
    /// Calling this on an already-stopped process is a no-op that returns
    /// [`StopOutcome::AlreadyExited`].
    pub async fn stop(&mut self, grace: Duration) -> Result<StopOutcome> {
        let outcome = self.stop_inner(grace).await;
        for pump in self.pumps.drain(..) {
            pump.abort();
        }
        outcome
    }

    async fn stop_inner(&mut self, grace: Duration) -> Result<StopOutcome> {
        if let Some(status) = self.exit {
            return Ok(StopOutcome::AlreadyExited(status));
        }

        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.exit = Some(status);
                self.sweep_group();
                return Ok(StopOutcome::AlreadyExited(status));
            }
            Ok(None) => {}
            Err(e) => warn!(pid = self.pid, error = %e, "could not poll process state"),
        }

        if self.request_terminate() {
            match tokio::time::timeout(grace, self.child.wait()).await {
                Ok(Ok(status)) => {
                    info!(pid = self.pid, %status, "user application terminated");
                    self.exit = Some(status);
                    self.sweep_group();
                    return Ok(StopOutcome::Terminated(status));
                }
                Ok(Err(e)) => {
                    warn!(pid = self.pid, error = %e, "waiting after terminate failed; killing");
                }
                Err(_) => {
                    warn!(pid = self.pid, ?grace, "grace period elapsed; killing user application");
                }
            }
        }

        self.sweep_group();
        if let Err(e) = self.child.start_kill() {
            // Usually means it exited in the meantime; the wait below tells.
            debug!(pid = self.pid, error = %e, "kill request failed");
        }

        let status = self.child.wait().await.map_err(|e| {
            HotrunError::ProcessStop(format!("reaping pid {:?}: {e}", self.pid))
        })?;
        info!(pid = self.pid, %status, "user application killed");
        self.exit = Some(status);
        Ok(StopOutcome::Killed(status))
    }

    /// SIGTERM the whole process group.
    #[cfg(unix)]
    fn request_terminate(&self) -> bool {
        // `id()` is None once the child has been reaped.
        let Some(pid) = self.child.id() else {
            return false;
        };
        match group::signal(pid, libc::SIGTERM) {
            Ok(()) => {
                debug!(pid, "sent SIGTERM to process group");
                true
            }
            Err(e) => {
                warn!(pid, error = %e, "failed to send SIGTERM");
                false
            }
        }
    }

    #[cfg(not(unix))]
    fn request_terminate(&self) -> bool {
        // No graceful signal available; go straight to kill.
        false
    }

    /// Kill anything the process forked that is still around.
    fn sweep_group(&self) {
        if let Some(pid) = self.pid {
            group::kill_remaining(pid);
        }
    }
}
