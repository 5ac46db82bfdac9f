// src/lib.rs

pub mod cli;
pub mod config;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod gateway;
pub mod hub;
pub mod logging;
pub mod signals;
pub mod supervisor;
pub mod types;
pub mod watch;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::{ConfigFile, load_raw_or_default};
use crate::exec::{Builder, ProcessRunner, RealBackend};
use crate::fs::{FileSystem, RealFileSystem};
use crate::gateway::GatewayState;
use crate::hub::BroadcastHub;
use crate::supervisor::{Supervisor, SupervisorCore, SupervisorEvent};
use crate::watch::{ArtifactFilter, ChangeEvent, ChangeStream, WatchMode, spawn_watcher};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - broadcast hub
/// - file watcher
/// - supervisor + real build/run backend
/// - HTTP/websocket gateway
/// - OS signal handling
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = resolve_config(&args)?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    std::fs::create_dir_all(&cfg.watch.root)
        .with_context(|| format!("creating watch root {:?}", cfg.watch.root))?;

    let shutdown = CancellationToken::new();
    let hub = BroadcastHub::spawn(cfg.hub);

    // Supervisor event channel.
    let (sup_tx, sup_rx) = mpsc::channel::<SupervisorEvent>(64);

    // Watcher initialization failure is fatal.
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let filter = ArtifactFilter::from_config(&cfg)?;
    let stream = ChangeStream::start(
        cfg.watch.root.clone(),
        WatchMode::from_track_new_dirs(cfg.watch.track_new_dirs),
        filter,
        fs,
    )?;
    let watcher = spawn_watcher(stream, sup_tx.clone(), cfg.watch.debounce);

    let _signals = signals::spawn_signal_listener(shutdown.clone());

    let backend = RealBackend::new(
        Builder::from_config(&cfg),
        ProcessRunner::from_config(&cfg),
        hub.clone(),
        sup_tx.clone(),
    );

    let supervisor = Supervisor::new(
        SupervisorCore::new(),
        sup_rx,
        backend,
        hub.clone(),
        shutdown.clone(),
    );

    let listener = TcpListener::bind(cfg.server.listen)
        .await
        .with_context(|| format!("binding gateway to {}", cfg.server.listen))?;
    let gateway_state = Arc::new(GatewayState {
        hub: hub.clone(),
        status: supervisor.status(),
    });

    // Build and run once without waiting for an edit.
    if cfg.build.on_start {
        info!(root = ?cfg.watch.root, "seeding startup build");
        sup_tx
            .send(SupervisorEvent::ChangeDetected(ChangeEvent::startup(
                cfg.watch.root.clone(),
            )))
            .await
            .map_err(|_| anyhow!("supervisor channel closed before startup"))?;
    }
    drop(sup_tx);

    let mut gateway_task = tokio::spawn(gateway::serve(listener, gateway_state, shutdown.clone()));
    let mut supervisor_task = tokio::spawn(supervisor.run());

    let grace = cfg.server.shutdown_grace + cfg.run.stop_grace;

    // Both tasks share one deadline, taken when shutdown starts.
    let outcome = tokio::select! {
        _ = shutdown.cancelled() => {
            info!("shutdown requested");
            let deadline = Instant::now() + grace;
            let (sup, gw) = tokio::join!(
                join_by("supervisor", &mut supervisor_task, deadline),
                join_by("gateway", &mut gateway_task, deadline),
            );
            sup.and(gw)
        }
        res = &mut supervisor_task => {
            warn!("supervisor stopped unexpectedly; shutting down");
            shutdown.cancel();
            let gw = join_by("gateway", &mut gateway_task, Instant::now() + grace).await;
            task_outcome("supervisor", res).and(gw)
        }
        res = &mut gateway_task => {
            warn!("gateway stopped unexpectedly; shutting down");
            shutdown.cancel();
            let sup = join_by("supervisor", &mut supervisor_task, Instant::now() + grace).await;
            task_outcome("gateway", res).and(sup)
        }
    };

    watcher.abort();
    hub.close();

    info!("hotrun exiting");
    outcome
}

/// Load the config (file or defaults) and apply CLI/env overrides.
pub fn resolve_config(args: &CliArgs) -> Result<ConfigFile> {
    let explicit = args.config.as_deref().map(Path::new);
    let mut raw = load_raw_or_default(explicit)?;

    if let Some(root) = &args.root {
        raw.watch.root = root.clone();
    }
    if let Some(listen) = &args.listen {
        raw.server.listen = listen.clone();
    }

    Ok(ConfigFile::try_from(raw)?)
}

/// Wait for a task, aborting it once `deadline` has passed.
async fn join_by<E>(
    name: &str,
    handle: &mut JoinHandle<std::result::Result<(), E>>,
    deadline: Instant,
) -> Result<()>
where
    E: Into<anyhow::Error>,
{
    match tokio::time::timeout_at(deadline, &mut *handle).await {
        Ok(res) => task_outcome(name, res),
        Err(_) => {
            warn!(task = name, "task did not stop before the shutdown deadline; aborting");
            handle.abort();
            Err(anyhow!("{name} did not stop before the shutdown deadline"))
        }
    }
}

fn task_outcome<E>(
    name: &str,
    res: std::result::Result<std::result::Result<(), E>, tokio::task::JoinError>,
) -> Result<()>
where
    E: Into<anyhow::Error>,
{
    match res {
        Ok(Ok(())) => {
            debug!(task = name, "task finished");
            Ok(())
        }
        Ok(Err(e)) => Err(Into::<anyhow::Error>::into(e).context(format!("{name} failed"))),
        Err(join_err) => Err(anyhow!("{name} task panicked or was cancelled: {join_err}")),
    }
}

/// Print the resolved configuration without starting anything.
fn print_dry_run(cfg: &ConfigFile) {
    println!("hotrun dry-run");
    println!();
    println!("[watch]");
    println!("  root           = {}", cfg.watch.root.display());
    println!("  exclude        = {:?}", cfg.watch.exclude);
    println!("  track_new_dirs = {}", cfg.watch.track_new_dirs);
    println!("  debounce       = {:?}", cfg.watch.debounce);
    println!("[build]");
    println!("  fetch          = {}", cfg.build.fetch.display());
    println!("  compile        = {}", cfg.build.compile.display());
    println!("  artifact       = {}", cfg.artifact_path().display());
    println!("  live copy      = {}", cfg.live_path().display());
    println!("  on_start       = {}", cfg.build.on_start);
    println!("[run]");
    println!("  args           = {:?}", cfg.run.args);
    println!("  stop_grace     = {:?}", cfg.run.stop_grace);
    println!("[hub]");
    println!("  queue_capacity = {}", cfg.hub.queue_capacity);
    println!("  overflow       = {:?}", cfg.hub.overflow);
    println!("[server]");
    println!("  listen         = {}", cfg.server.listen);
    println!("  shutdown_grace = {:?}", cfg.server.shutdown_grace);

    debug!("dry-run complete (nothing started)");
}
