// src/config/validate.rs

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use globset::Glob;

use crate::config::duration::parse_duration;
use crate::config::model::{
    ARTIFACT_PLACEHOLDER, BuildSettings, CommandSpec, ConfigFile, HubSettings, MAX_QUEUE_CAPACITY,
    RawConfigFile, RunSettings, ServerSettings, WatchSettings,
};
use crate::errors::{HotrunError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::HotrunError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        let watch = validate_watch(&raw)?;
        let build = validate_build(&raw)?;
        let run = validate_run(&raw)?;
        let hub = validate_hub(&raw)?;
        let server = validate_server(&raw)?;
        Ok(ConfigFile::new_unchecked(watch, build, run, hub, server))
    }
}

fn validate_watch(cfg: &RawConfigFile) -> Result<WatchSettings> {
    if cfg.watch.root.trim().is_empty() {
        return Err(config_error("[watch].root must not be empty"));
    }

    for pattern in cfg.watch.exclude.iter() {
        Glob::new(pattern).map_err(|e| {
            config_error(format!("[watch].exclude pattern '{pattern}' is invalid: {e}"))
        })?;
    }

    Ok(WatchSettings {
        root: PathBuf::from(&cfg.watch.root),
        exclude: cfg.watch.exclude.clone(),
        track_new_dirs: cfg.watch.track_new_dirs,
        debounce: duration_field("[watch].debounce", &cfg.watch.debounce)?,
    })
}

fn validate_build(cfg: &RawConfigFile) -> Result<BuildSettings> {
    let artifact = cfg.build.artifact.trim();
    if artifact.is_empty() {
        return Err(config_error("[build].artifact must not be empty"));
    }
    if artifact.contains('/') || artifact.contains('\\') {
        return Err(config_error(format!(
            "[build].artifact must be a bare file name, got '{artifact}'"
        )));
    }
    if cfg.build.live_suffix.is_empty() {
        return Err(config_error(
            "[build].live_suffix must not be empty (the live copy would overwrite the artifact)",
        ));
    }

    let live_name = format!("{artifact}{}", cfg.build.live_suffix);
    if live_name.contains('/') || live_name.contains('\\') {
        return Err(config_error(format!(
            "[build].live_suffix must not contain path separators, got '{}'",
            cfg.build.live_suffix
        )));
    }

    Ok(BuildSettings {
        fetch: command_field("[build].fetch", &cfg.build.fetch, artifact)?,
        compile: command_field("[build].compile", &cfg.build.compile, artifact)?,
        artifact: artifact.to_string(),
        live_name,
        on_start: cfg.build.on_start,
    })
}

fn validate_run(cfg: &RawConfigFile) -> Result<RunSettings> {
    Ok(RunSettings {
        args: cfg.run.args.clone(),
        stop_grace: duration_field("[run].stop_grace", &cfg.run.stop_grace)?,
    })
}

fn validate_hub(cfg: &RawConfigFile) -> Result<HubSettings> {
    if cfg.hub.queue_capacity == 0 {
        return Err(config_error("[hub].queue_capacity must be >= 1 (got 0)"));
    }
    if cfg.hub.queue_capacity > MAX_QUEUE_CAPACITY {
        return Err(config_error(format!(
            "[hub].queue_capacity must be <= {MAX_QUEUE_CAPACITY} (got {})",
            cfg.hub.queue_capacity
        )));
    }
    Ok(HubSettings {
        queue_capacity: cfg.hub.queue_capacity,
        overflow: cfg.hub.overflow,
    })
}

fn validate_server(cfg: &RawConfigFile) -> Result<ServerSettings> {
    let listen: SocketAddr = cfg.server.listen.trim().parse().map_err(|e| {
        config_error(format!(
            "[server].listen '{}' is not a socket address: {e}",
            cfg.server.listen
        ))
    })?;
    Ok(ServerSettings {
        listen,
        shutdown_grace: duration_field("[server].shutdown_grace", &cfg.server.shutdown_grace)?,
    })
}

fn command_field(field: &str, argv: &[String], artifact: &str) -> Result<CommandSpec> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| config_error(format!("{field} must name a program")))?;
    if program.trim().is_empty() {
        return Err(config_error(format!("{field} must name a program")));
    }
    let args = args
        .iter()
        .map(|a| a.replace(ARTIFACT_PLACEHOLDER, artifact));
    Ok(CommandSpec::new(program.clone(), args))
}

fn duration_field(field: &str, value: &str) -> Result<Duration> {
    parse_duration(value).map_err(|e| config_error(format!("{field}: {e}")))
}

fn config_error(msg: impl Into<String>) -> HotrunError {
    HotrunError::ConfigError(msg.into())
}
