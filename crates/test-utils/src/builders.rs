#![allow(dead_code)]

use std::path::Path;

use hotrun::config::{ConfigFile, RawConfigFile};
use hotrun::types::OverflowPolicy;

/// Builder for `ConfigFile` to simplify test setup.
///
/// Starts from the built-in defaults with `root` pointed at a test directory,
/// short grace periods and no startup build.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new(root: &Path) -> Self {
        let mut config = RawConfigFile::default();
        config.watch.root = root.display().to_string();
        config.watch.debounce = "0ms".to_string();
        config.build.on_start = false;
        config.run.stop_grace = "2s".to_string();
        config.server.listen = "127.0.0.1:0".to_string();
        config.server.shutdown_grace = "1s".to_string();
        Self { config }
    }

    pub fn with_fetch(mut self, argv: &[&str]) -> Self {
        self.config.build.fetch = argv.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_compile(mut self, argv: &[&str]) -> Self {
        self.config.build.compile = argv.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_artifact(mut self, name: &str) -> Self {
        self.config.build.artifact = name.to_string();
        self
    }

    pub fn with_run_args(mut self, args: &[&str]) -> Self {
        self.config.run.args = args.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_stop_grace(mut self, grace: &str) -> Self {
        self.config.run.stop_grace = grace.to_string();
        self
    }

    pub fn with_exclude(mut self, pattern: &str) -> Self {
        self.config.watch.exclude.push(pattern.to_string());
        self
    }

    pub fn with_debounce(mut self, debounce: &str) -> Self {
        self.config.watch.debounce = debounce.to_string();
        self
    }

    pub fn with_hub(mut self, queue_capacity: usize, overflow: OverflowPolicy) -> Self {
        self.config.hub.queue_capacity = queue_capacity;
        self.config.hub.overflow = overflow;
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}
