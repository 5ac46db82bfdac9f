// src/exec/output.rs

//! Streaming child-process output into the hub.

use std::collections::VecDeque;

use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::hub::HubHandle;

/// Number of trailing output lines kept for error messages.
pub const TAIL_LINES: usize = 20;

/// Publisher for one generation's output.
///
/// Once the generation's token is cancelled, writes are discarded: output
/// produced after a generation was superseded never reaches observers.
#[derive(Debug, Clone)]
pub struct OutputSink {
    hub: HubHandle,
    cancel: CancellationToken,
}

impl OutputSink {
    pub fn new(hub: HubHandle, cancel: CancellationToken) -> Self {
        Self { hub, cancel }
    }

    pub fn publish(&self, bytes: impl Into<Bytes>) {
        if self.cancel.is_cancelled() {
            trace!("generation superseded; discarding output");
            return;
        }
        self.hub.publish(bytes);
    }

    pub fn is_live(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}

/// Last lines of a stream, for error reporting.
#[derive(Debug, Default, Clone)]
pub struct OutputTail {
    lines: VecDeque<String>,
}

impl OutputTail {
    pub fn push(&mut self, line: &[u8]) {
        let text = String::from_utf8_lossy(line).trim_end().to_string();
        if text.is_empty() {
            return;
        }
        if self.lines.len() == TAIL_LINES {
            self.lines.pop_front();
        }
        self.lines.push_back(text);
    }

    pub fn extend(&mut self, other: OutputTail) {
        for line in other.lines {
            self.push(line.as_bytes());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn join(&self) -> String {
        self.lines.iter().cloned().collect::<Vec<_>>().join("\n")
    }
}

/// Copy `reader` into `sink` line by line, as lines are produced.
///
/// Lines are forwarded byte-for-byte including their trailing newline; one
/// line is one hub message. Returns the last [`TAIL_LINES`] lines.
pub async fn pump_lines<R>(reader: R, sink: OutputSink, label: &'static str) -> OutputTail
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut tail = OutputTail::default();
    let mut line = Vec::new();

    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                tail.push(&line);
                sink.publish(Bytes::copy_from_slice(&line));
            }
            Err(err) => {
                debug!(stream = label, error = %err, "output stream read failed");
                break;
            }
        }
    }

    trace!(stream = label, "output stream ended");
    tail
}
