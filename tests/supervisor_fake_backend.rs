// tests/supervisor_fake_backend.rs

mod common;
use crate::common::{TestResult, init_tracing, recv_until, with_timeout};

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use hotrun::config::HubSettings;
use hotrun::hub::{BroadcastHub, HubHandle};
use hotrun::supervisor::{
    GenerationStatus, Supervisor, SupervisorCore, SupervisorEvent, SupervisorState,
    SupervisorStatus,
};
use hotrun::types::OverflowPolicy;
use hotrun::watch::{ChangeEvent, ChangeKind};
use hotrun_test_utils::fake_backend::{FakeBackend, FakeBuild, FakeProbe};

struct Harness {
    tx: mpsc::Sender<SupervisorEvent>,
    status: watch::Receiver<SupervisorStatus>,
    probe: FakeProbe,
    shutdown: CancellationToken,
    hub: HubHandle,
    task: JoinHandle<hotrun::errors::Result<()>>,
}

fn start(configure: impl FnOnce(FakeBackend) -> FakeBackend) -> Harness {
    let hub = BroadcastHub::spawn(HubSettings {
        queue_capacity: 64,
        overflow: OverflowPolicy::DropOldest,
    });
    let (tx, rx) = mpsc::channel(64);
    let backend = configure(FakeBackend::new(tx.clone()));
    let probe = backend.probe();
    let shutdown = CancellationToken::new();

    let supervisor = Supervisor::new(
        SupervisorCore::new(),
        rx,
        backend,
        hub.clone(),
        shutdown.clone(),
    );
    let status = supervisor.status();
    let task = tokio::spawn(supervisor.run());

    Harness {
        tx,
        status,
        probe,
        shutdown,
        hub,
        task,
    }
}

fn change(path: &str) -> SupervisorEvent {
    SupervisorEvent::ChangeDetected(ChangeEvent::new(PathBuf::from(path), ChangeKind::Modified))
}

async fn wait_for_state(
    status: &mut watch::Receiver<SupervisorStatus>,
    state: SupervisorState,
    generation: u64,
) -> TestResult {
    with_timeout(status.wait_for(|s| s.state == state && s.generation == Some(generation)))
        .await?;
    Ok(())
}

#[tokio::test]
async fn change_builds_and_runs_one_generation() -> TestResult {
    init_tracing();
    let mut h = start(|b| b);

    h.tx.send(change("main.go")).await?;
    wait_for_state(&mut h.status, SupervisorState::Running, 1).await?;

    assert_eq!(h.probe.builds(), vec![1]);
    assert_eq!(h.probe.processes(), vec![1]);
    assert_eq!(h.probe.live(), 1);
    Ok(())
}

#[tokio::test]
async fn burst_of_changes_never_overlaps_processes() -> TestResult {
    init_tracing();
    let mut h = start(|b| b);

    h.tx.send(change("a.go")).await?;
    wait_for_state(&mut h.status, SupervisorState::Running, 1).await?;

    for i in 0..5 {
        h.tx.send(change(&format!("burst-{i}.go"))).await?;
    }
    with_timeout(h.status.wait_for(|s| {
        s.state == SupervisorState::Running && s.generation.is_some_and(|g| g > 1)
    }))
    .await?;
    // Let any trailing supersessions play out.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let status = *h.status.borrow();
    let builds = h.probe.builds();
    assert_eq!(status.state, SupervisorState::Running);
    assert_eq!(status.generation, builds.last().copied());
    assert!(builds.windows(2).all(|w| w[0] < w[1]), "ids must increase: {builds:?}");
    assert!(builds.len() <= 6);
    assert_eq!(h.probe.max_live(), 1);
    assert_eq!(h.probe.live(), 1);
    Ok(())
}

#[tokio::test]
async fn change_during_build_abandons_that_build() -> TestResult {
    init_tracing();
    let mut h = start(|b| b.with_build_time(Duration::from_millis(300)));

    h.tx.send(change("a.go")).await?;
    wait_for_state(&mut h.status, SupervisorState::Building, 1).await?;
    h.tx.send(change("b.go")).await?;
    wait_for_state(&mut h.status, SupervisorState::Running, 2).await?;

    assert_eq!(h.probe.builds(), vec![1, 2]);
    assert_eq!(h.probe.processes(), vec![2]);
    Ok(())
}

#[tokio::test]
async fn failed_build_is_announced_and_returns_to_idle() -> TestResult {
    init_tracing();
    let mut h = start(|b| b.with_script([FakeBuild::Fail("undefined: Foo".into())]));
    let mut observer = h.hub.register().await?;

    h.tx.send(change("main.go")).await?;
    with_timeout(h.status.wait_for(|s| s.last_status == Some(GenerationStatus::Failed))).await?;

    let status = *h.status.borrow();
    assert_eq!(status.state, SupervisorState::Idle);
    assert_eq!(status.generation, None);
    assert!(h.probe.processes().is_empty());

    let seen = recv_until(&mut observer, "undefined: Foo", Duration::from_secs(2)).await;
    assert!(
        seen.iter().any(|l| l.starts_with("[hotrun] build 1 failed") && l.contains("undefined: Foo")),
        "observers should see the build error, got {seen:?}"
    );

    // No retry: the next build only happens on the next change.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.probe.builds(), vec![1]);

    h.tx.send(change("main.go")).await?;
    wait_for_state(&mut h.status, SupervisorState::Running, 2).await?;
    Ok(())
}

#[tokio::test]
async fn shutdown_while_running_stops_process_and_exits() -> TestResult {
    init_tracing();
    let mut h = start(|b| b);

    h.tx.send(change("main.go")).await?;
    wait_for_state(&mut h.status, SupervisorState::Running, 1).await?;

    h.shutdown.cancel();
    with_timeout(h.task).await??;

    assert_eq!(h.probe.live(), 0);
    assert_eq!(h.probe.max_live(), 1);
    Ok(())
}

#[tokio::test]
async fn shutdown_while_idle_exits_immediately() -> TestResult {
    init_tracing();
    let h = start(|b| b);

    h.shutdown.cancel();
    with_timeout(h.task).await??;
    assert!(h.probe.calls().is_empty());
    Ok(())
}
