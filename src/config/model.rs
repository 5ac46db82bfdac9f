// src/config/model.rs

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::types::OverflowPolicy;

/// Placeholder in build commands replaced with the artifact file name.
pub const ARTIFACT_PLACEHOLDER: &str = "{artifact}";

/// Largest accepted `[hub].queue_capacity`. Every observer queue allocates
/// its slots up front.
pub const MAX_QUEUE_CAPACITY: usize = 65_536;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [watch]
/// root = "/config/HassiGo"
/// exclude = [".git/**"]
///
/// [build]
/// fetch = ["go", "get"]
/// compile = ["go", "build", "-o", "{artifact}"]
/// artifact = "hassigo-userapp"
///
/// [run]
/// stop_grace = "5s"
///
/// [hub]
/// queue_capacity = 256
/// overflow = "drop_oldest"
///
/// [server]
/// listen = "0.0.0.0:7080"
/// ```
///
/// All sections are optional and have reasonable defaults. This is the raw
/// serde target; the rest of the program only sees the validated
/// [`ConfigFile`].
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub watch: WatchSection,
    #[serde(default)]
    pub build: BuildSection,
    #[serde(default)]
    pub run: RunSection,
    #[serde(default)]
    pub hub: HubSection,
    #[serde(default)]
    pub server: ServerSection,
}

/// `[watch]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchSection {
    /// Root directory of the user application.
    #[serde(default = "default_root")]
    pub root: String,

    /// Glob patterns (relative to `root`) whose changes never trigger a rebuild.
    #[serde(default = "default_exclude")]
    pub exclude: Vec<String>,

    /// Watch directories created after startup as well.
    ///
    /// `false` registers exactly the directories present at startup.
    #[serde(default = "default_true")]
    pub track_new_dirs: bool,

    /// Window in which a burst of changes is coalesced into one rebuild.
    #[serde(default = "default_debounce")]
    pub debounce: String,
}

/// `[build]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildSection {
    /// Dependency resolution command, run first.
    #[serde(default = "default_fetch")]
    pub fetch: Vec<String>,

    /// Compile command, run only if `fetch` succeeded.
    #[serde(default = "default_compile")]
    pub compile: Vec<String>,

    /// File name of the compiled artifact inside `root`.
    #[serde(default = "default_artifact")]
    pub artifact: String,

    /// Suffix appended to `artifact` to name the private live copy.
    #[serde(default = "default_live_suffix")]
    pub live_suffix: String,

    /// Build and run once at startup without waiting for a change.
    #[serde(default = "default_true")]
    pub on_start: bool,
}

/// `[run]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunSection {
    /// Arguments passed to the user application.
    #[serde(default)]
    pub args: Vec<String>,

    /// How long a stopping application may take to exit after SIGTERM.
    #[serde(default = "default_grace")]
    pub stop_grace: String,
}

/// `[hub]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HubSection {
    /// Per-observer queue length, `1..=MAX_QUEUE_CAPACITY`.
    ///
    /// Under `drop_oldest` the ring is rounded up to the next power of two,
    /// so an observer may hold slightly more than this many messages.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default)]
    pub overflow: OverflowPolicy,
}

/// `[server]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Upper bound on the HTTP side of a graceful shutdown.
    #[serde(default = "default_grace")]
    pub shutdown_grace: String,
}

fn default_root() -> String {
    "/config/HassiGo".to_string()
}

fn default_exclude() -> Vec<String> {
    vec![".git/**".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_debounce() -> String {
    "100ms".to_string()
}

fn default_fetch() -> Vec<String> {
    vec!["go".to_string(), "get".to_string()]
}

fn default_compile() -> Vec<String> {
    vec![
        "go".to_string(),
        "build".to_string(),
        "-o".to_string(),
        ARTIFACT_PLACEHOLDER.to_string(),
    ]
}

fn default_artifact() -> String {
    "hassigo-userapp".to_string()
}

fn default_live_suffix() -> String {
    "-run".to_string()
}

fn default_grace() -> String {
    "5s".to_string()
}

fn default_queue_capacity() -> usize {
    256
}

fn default_listen() -> String {
    "0.0.0.0:7080".to_string()
}

impl Default for WatchSection {
    fn default() -> Self {
        Self {
            root: default_root(),
            exclude: default_exclude(),
            track_new_dirs: true,
            debounce: default_debounce(),
        }
    }
}

impl Default for BuildSection {
    fn default() -> Self {
        Self {
            fetch: default_fetch(),
            compile: default_compile(),
            artifact: default_artifact(),
            live_suffix: default_live_suffix(),
            on_start: true,
        }
    }
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            args: Vec::new(),
            stop_grace: default_grace(),
        }
    }
}

impl Default for HubSection {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            overflow: OverflowPolicy::default(),
        }
    }
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            shutdown_grace: default_grace(),
        }
    }
}

/// An external command as `program` + `args`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new<P, I, A>(program: P, args: I) -> Self
    where
        P: Into<String>,
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Printable form used in logs and error messages.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Validated `[watch]` settings.
#[derive(Debug, Clone)]
pub struct WatchSettings {
    pub root: PathBuf,
    pub exclude: Vec<String>,
    pub track_new_dirs: bool,
    pub debounce: Duration,
}

/// Validated `[build]` settings with the artifact placeholder resolved.
#[derive(Debug, Clone)]
pub struct BuildSettings {
    pub fetch: CommandSpec,
    pub compile: CommandSpec,
    pub artifact: String,
    pub live_name: String,
    pub on_start: bool,
}

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub args: Vec<String>,
    pub stop_grace: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct HubSettings {
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
}

#[derive(Debug, Clone, Copy)]
pub struct ServerSettings {
    pub listen: SocketAddr,
    pub shutdown_grace: Duration,
}

/// Fully validated configuration.
///
/// Only constructible through `TryFrom<RawConfigFile>` (see `validate.rs`).
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub watch: WatchSettings,
    pub build: BuildSettings,
    pub run: RunSettings,
    pub hub: HubSettings,
    pub server: ServerSettings,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        watch: WatchSettings,
        build: BuildSettings,
        run: RunSettings,
        hub: HubSettings,
        server: ServerSettings,
    ) -> Self {
        Self {
            watch,
            build,
            run,
            hub,
            server,
        }
    }

    /// Absolute-or-relative path of the compiled artifact.
    pub fn artifact_path(&self) -> PathBuf {
        self.watch.root.join(&self.build.artifact)
    }

    /// Path of the private copy the runner executes.
    pub fn live_path(&self) -> PathBuf {
        self.watch.root.join(&self.build.live_name)
    }
}
