// src/config/mod.rs

//! Configuration loading and validation for hotrun.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate it into the typed settings the rest of the crate uses
//!   (`validate.rs`).

pub mod duration;
pub mod loader;
pub mod model;
pub mod validate;

pub use duration::parse_duration;
pub use loader::{default_config_path, load_and_validate, load_from_path, load_raw_or_default};
pub use model::{
    BuildSection, BuildSettings, CommandSpec, ConfigFile, HubSection, HubSettings,
    MAX_QUEUE_CAPACITY, RawConfigFile, RunSection, RunSettings, ServerSection, ServerSettings,
    WatchSection, WatchSettings,
};
