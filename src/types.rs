use std::str::FromStr;
use serde::Deserialize;

/// Identifier of one build-and-run cycle. Strictly increasing.
pub type GenerationId = u64;

/// Identifier handed out by the hub when an observer registers.
pub type ObserverId = u64;

/// What the hub does when a publish finds an observer's queue full.
///
/// - `DropOldest`: the observer keeps its connection; the oldest queued
///   messages for that observer only are discarded (default).
/// - `Disconnect`: the observer's queue is closed and the observer removed.
///
/// Neither policy ever makes the publisher or other observers wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    DropOldest,
    Disconnect,
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        OverflowPolicy::DropOldest
    }
}

impl FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "drop_oldest" => Ok(OverflowPolicy::DropOldest),
            "disconnect" => Ok(OverflowPolicy::Disconnect),
            other => Err(format!(
                "invalid hub overflow policy: {other} (expected \"drop_oldest\" or \"disconnect\")"
            )),
        }
    }
}
