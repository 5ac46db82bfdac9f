// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `hotrun`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "hotrun",
    version,
    about = "Rebuild and relaunch an application on every source change, streaming its output over a websocket.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Hotrun.toml` in the current working directory. A missing
    /// default file means built-in defaults are used.
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Root directory of the watched user application.
    #[arg(long, value_name = "DIR", env = "HOTRUN_ROOT")]
    pub root: Option<String>,

    /// Address the HTTP/websocket gateway listens on.
    #[arg(long, value_name = "ADDR", env = "HOTRUN_LISTEN")]
    pub listen: Option<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `HOTRUN_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Load and validate the config, print it, but don't build or run anything.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
