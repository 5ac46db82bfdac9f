// src/hub/queue.rs

//! Per-observer bounded queues.
//!
//! The hub side only ever uses non-blocking operations on these queues, so a
//! stalled observer can never hold up the dispatch loop.

use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use crate::config::MAX_QUEUE_CAPACITY;
use crate::hub::LogMessage;
use crate::types::{ObserverId, OverflowPolicy};

/// Result of offering one message to an observer queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Queued,
    /// The queue was full (only reported under `OverflowPolicy::Disconnect`).
    Full,
    /// The receiving side is gone.
    Closed,
}

/// Hub-owned sending half.
#[derive(Debug)]
pub(crate) enum QueueTx {
    Bounded(mpsc::Sender<LogMessage>),
    Ring(broadcast::Sender<LogMessage>),
}

impl QueueTx {
    pub(crate) fn offer(&self, msg: &LogMessage) -> Delivery {
        match self {
            QueueTx::Bounded(tx) => match tx.try_send(msg.clone()) {
                Ok(()) => Delivery::Queued,
                Err(mpsc::error::TrySendError::Full(_)) => Delivery::Full,
                Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
            },
            // A full ring overwrites its oldest entry; send only fails
            // without a receiver.
            QueueTx::Ring(tx) => match tx.send(msg.clone()) {
                Ok(_) => Delivery::Queued,
                Err(_) => Delivery::Closed,
            },
        }
    }
}

/// Observer-owned receiving half.
#[derive(Debug)]
pub enum ObserverQueue {
    Bounded(mpsc::Receiver<LogMessage>),
    Ring(broadcast::Receiver<LogMessage>),
}

/// Create a queue pair for one observer.
///
/// The ring used for `DropOldest` rounds `capacity` up to a power of two.
pub(crate) fn observer_queue(capacity: usize, policy: OverflowPolicy) -> (QueueTx, ObserverQueue) {
    let capacity = capacity.clamp(1, MAX_QUEUE_CAPACITY);
    match policy {
        OverflowPolicy::Disconnect => {
            let (tx, rx) = mpsc::channel(capacity);
            (QueueTx::Bounded(tx), ObserverQueue::Bounded(rx))
        }
        OverflowPolicy::DropOldest => {
            let (tx, rx) = broadcast::channel(capacity);
            (QueueTx::Ring(tx), ObserverQueue::Ring(rx))
        }
    }
}

impl ObserverQueue {
    /// Next queued message; `None` once the hub closed this queue and it is
    /// drained. Reports messages lost to overflow through `skipped`.
    pub(crate) async fn recv(&mut self, id: ObserverId, skipped: &mut u64) -> Option<LogMessage> {
        match self {
            ObserverQueue::Bounded(rx) => rx.recv().await,
            ObserverQueue::Ring(rx) => loop {
                match rx.recv().await {
                    Ok(msg) => return Some(msg),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!(observer = id, dropped = n, "observer fell behind; oldest messages dropped");
                        *skipped += n;
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            },
        }
    }

    /// Non-waiting variant of [`recv`](Self::recv): `None` if nothing is
    /// queued right now or the queue is closed.
    pub(crate) fn try_recv(&mut self, id: ObserverId, skipped: &mut u64) -> Option<LogMessage> {
        match self {
            ObserverQueue::Bounded(rx) => rx.try_recv().ok(),
            ObserverQueue::Ring(rx) => loop {
                match rx.try_recv() {
                    Ok(msg) => return Some(msg),
                    Err(broadcast::error::TryRecvError::Lagged(n)) => {
                        debug!(observer = id, dropped = n, "observer fell behind; oldest messages dropped");
                        *skipped += n;
                    }
                    Err(_) => return None,
                }
            },
        }
    }
}
