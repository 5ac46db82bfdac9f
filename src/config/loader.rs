// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Load a configuration file from a given path and return the raw `RawConfigFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawConfigFile = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a configuration file from path and run validation.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let raw_config = load_from_path(&path)?;
    let config = ConfigFile::try_from(raw_config)?;
    Ok(config)
}

/// Resolve the raw config for startup.
///
/// - An explicit path must exist.
/// - Without one, `Hotrun.toml` in the working directory is used if present,
///   otherwise built-in defaults.
pub fn load_raw_or_default(explicit: Option<&Path>) -> Result<RawConfigFile> {
    match explicit {
        Some(path) => load_from_path(path),
        None => {
            let path = default_config_path();
            if path.is_file() {
                load_from_path(&path)
            } else {
                debug!(path = ?path, "no config file; using built-in defaults");
                Ok(RawConfigFile::default())
            }
        }
    }
}

/// Default config file location.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Hotrun.toml")
}
