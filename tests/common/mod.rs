#![allow(dead_code)]

use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::Duration;

use hotrun::hub::Observer;

pub use hotrun_test_utils::builders::ConfigFileBuilder;
pub use hotrun_test_utils::{eventually, init_tracing, with_timeout};

pub type TestResult = Result<(), Box<dyn Error>>;

/// Receive messages until one contains `needle`, returning everything seen
/// (as lossy UTF-8, one entry per message).
pub async fn recv_until(observer: &mut Observer, needle: &str, limit: Duration) -> Vec<String> {
    let mut seen = Vec::new();
    let _ = tokio::time::timeout(limit, async {
        while let Some(msg) = observer.recv().await {
            let text = String::from_utf8_lossy(&msg).to_string();
            let done = text.contains(needle);
            seen.push(text);
            if done {
                break;
            }
        }
    })
    .await;
    seen
}

/// Everything already queued for `observer`.
pub fn drain_now(observer: &mut Observer) -> Vec<String> {
    let mut seen = Vec::new();
    while let Some(msg) = observer.try_recv() {
        seen.push(String::from_utf8_lossy(&msg).to_string());
    }
    seen
}

/// Write an executable shell script.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> std::io::Result<PathBuf> {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n"))?;
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
    Ok(path)
}

/// Compile command that turns `app.sh` in the build dir into the artifact.
pub fn copy_app_compile() -> Vec<&'static str> {
    vec!["sh", "-c", "cp app.sh {artifact} && chmod +x {artifact}"]
}

/// Whether a process with `pid` still exists (zombies included).
#[cfg(target_os = "linux")]
pub fn pid_exists(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

/// Whether `pid` is still running. Zombies waiting for their new parent to
/// reap them count as gone.
#[cfg(target_os = "linux")]
pub fn pid_running(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        // The state field follows the parenthesised command name.
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.split_whitespace().next())
            .is_some_and(|state| state != "Z" && state != "X"),
        Err(_) => false,
    }
}

/// Pid written to `name` inside `dir` by a test script.
pub fn read_pid_file(dir: &Path, name: &str) -> Option<u32> {
    std::fs::read_to_string(dir.join(name)).ok()?.trim().parse().ok()
}
