// src/hub/mod.rs

//! Broadcast hub: fans one log stream out to many observers.
//!
//! The hub is an actor. A single task owns the observer registry and is the
//! only place it is mutated; everything else talks to it through a
//! [`HubHandle`] by message passing:
//!
//! - `register` → a new [`Observer`] with its own bounded queue
//! - `unregister` → the observer's queue is closed, no further deliveries
//! - `publish` → the message is offered to every observer queue without
//!   waiting on any of them
//!
//! Overflow handling is fixed per hub by [`OverflowPolicy`]. Under
//! `DropOldest` an observer's ring holds `queue_capacity` rounded up to the
//! next power of two; under `Disconnect` the queue holds exactly
//! `queue_capacity`. Observers only receive messages published after they
//! registered; there is no replay.

mod queue;

use std::collections::HashMap;
use std::time::SystemTime;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use crate::config::HubSettings;
use crate::errors::{HotrunError, Result};
use crate::types::{ObserverId, OverflowPolicy};

pub use queue::ObserverQueue;
use queue::{Delivery, QueueTx, observer_queue};

/// One producer write. Immutable; cheap to clone across observers.
pub type LogMessage = Bytes;

/// Prefix of lines the supervisor itself publishes.
pub const NOTICE_PREFIX: &str = "[hotrun] ";

enum HubCommand {
    Register {
        reply: oneshot::Sender<Option<Observer>>,
    },
    Unregister {
        id: ObserverId,
    },
    Publish(LogMessage),
    Stats {
        reply: oneshot::Sender<HubStats>,
    },
    Close,
}

/// Snapshot of hub counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    pub observers: usize,
    pub published: u64,
    pub accepting: bool,
}

/// A connected consumer of the log stream.
#[derive(Debug)]
pub struct Observer {
    id: ObserverId,
    connected_since: SystemTime,
    queue: ObserverQueue,
    skipped: u64,
}

impl Observer {
    pub fn id(&self) -> ObserverId {
        self.id
    }

    pub fn connected_since(&self) -> SystemTime {
        self.connected_since
    }

    /// Messages this observer lost to queue overflow so far.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Wait for the next message. `None` once the hub closed this observer.
    pub async fn recv(&mut self) -> Option<LogMessage> {
        self.queue.recv(self.id, &mut self.skipped).await
    }

    /// Take the next message if one is already queued.
    pub fn try_recv(&mut self) -> Option<LogMessage> {
        self.queue.try_recv(self.id, &mut self.skipped)
    }
}

struct ObserverSlot {
    tx: QueueTx,
}

/// The dispatcher. Owns the observer registry exclusively.
pub struct BroadcastHub {
    rx: mpsc::UnboundedReceiver<HubCommand>,
    observers: HashMap<ObserverId, ObserverSlot>,
    next_id: ObserverId,
    capacity: usize,
    policy: OverflowPolicy,
    accepting: bool,
    published: u64,
}

impl BroadcastHub {
    /// Spawn the dispatcher loop and return a handle to it.
    ///
    /// The loop ends once every handle has been dropped.
    pub fn spawn(settings: HubSettings) -> HubHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let hub = BroadcastHub {
            rx,
            observers: HashMap::new(),
            next_id: 1,
            capacity: settings.queue_capacity,
            policy: settings.overflow,
            accepting: true,
            published: 0,
        };
        tokio::spawn(hub.run());
        HubHandle { tx }
    }

    async fn run(mut self) {
        info!(capacity = self.capacity, policy = ?self.policy, "broadcast hub started");

        while let Some(cmd) = self.rx.recv().await {
            match cmd {
                HubCommand::Register { reply } => {
                    let observer = self.register();
                    if let Some(Observer { id, .. }) = reply.send(observer).err().flatten() {
                        // Caller gave up waiting; don't keep a dangling queue.
                        self.observers.remove(&id);
                    }
                }
                HubCommand::Unregister { id } => {
                    if self.observers.remove(&id).is_some() {
                        debug!(observer = id, remaining = self.observers.len(), "observer unregistered");
                    }
                }
                HubCommand::Publish(msg) => self.dispatch(msg),
                HubCommand::Stats { reply } => {
                    let _ = reply.send(self.stats());
                }
                HubCommand::Close => {
                    if self.accepting {
                        info!(observers = self.observers.len(), "hub closing; dropping all observers");
                    }
                    self.accepting = false;
                    self.observers.clear();
                }
            }
        }

        debug!("broadcast hub finished (all handles dropped)");
    }

    fn register(&mut self) -> Option<Observer> {
        if !self.accepting {
            debug!("rejecting observer; hub is closed");
            return None;
        }

        let id = self.next_id;
        self.next_id += 1;

        let (tx, queue) = observer_queue(self.capacity, self.policy);
        self.observers.insert(id, ObserverSlot { tx });
        info!(observer = id, total = self.observers.len(), "observer connected");

        Some(Observer {
            id,
            connected_since: SystemTime::now(),
            queue,
            skipped: 0,
        })
    }

    fn dispatch(&mut self, msg: LogMessage) {
        self.published += 1;
        trace!(bytes = msg.len(), observers = self.observers.len(), "dispatching message");

        let mut dropped: Vec<ObserverId> = Vec::new();
        for (id, slot) in self.observers.iter() {
            match slot.tx.offer(&msg) {
                Delivery::Queued => {}
                Delivery::Full => {
                    warn!(observer = id, "observer queue full; disconnecting slow observer");
                    dropped.push(*id);
                }
                Delivery::Closed => {
                    debug!(observer = id, "observer went away without unregistering");
                    dropped.push(*id);
                }
            }
        }

        for id in dropped {
            self.observers.remove(&id);
        }
    }

    fn stats(&self) -> HubStats {
        HubStats {
            observers: self.observers.len(),
            published: self.published,
            accepting: self.accepting,
        }
    }
}

/// Cloneable access to a running [`BroadcastHub`].
#[derive(Debug, Clone)]
pub struct HubHandle {
    tx: mpsc::UnboundedSender<HubCommand>,
}

impl std::fmt::Debug for HubCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HubCommand::Register { .. } => f.write_str("Register"),
            HubCommand::Unregister { id } => write!(f, "Unregister({id})"),
            HubCommand::Publish(msg) => write!(f, "Publish({} bytes)", msg.len()),
            HubCommand::Stats { .. } => f.write_str("Stats"),
            HubCommand::Close => f.write_str("Close"),
        }
    }
}

impl HubHandle {
    /// Connect a new observer.
    ///
    /// Fails with [`HotrunError::HubClosed`] once the hub stopped accepting.
    pub async fn register(&self) -> Result<Observer> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(HubCommand::Register { reply })
            .map_err(|_| HotrunError::HubClosed)?;
        rx.await.ok().flatten().ok_or(HotrunError::HubClosed)
    }

    /// Disconnect an observer. Unknown ids are ignored.
    pub fn unregister(&self, id: ObserverId) {
        let _ = self.tx.send(HubCommand::Unregister { id });
    }

    /// Fan `msg` out to every current observer. Never waits.
    pub fn publish(&self, msg: impl Into<LogMessage>) {
        if self.tx.send(HubCommand::Publish(msg.into())).is_err() {
            trace!("hub gone; dropping published message");
        }
    }

    /// Publish one supervisor notice line.
    pub fn announce(&self, text: impl AsRef<str>) {
        self.publish(format!("{NOTICE_PREFIX}{}\n", text.as_ref()));
    }

    pub async fn stats(&self) -> HubStats {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(HubCommand::Stats { reply }).is_err() {
            return HubStats::default();
        }
        rx.await.unwrap_or_default()
    }

    /// Stop accepting observers and close every observer queue.
    pub fn close(&self) {
        let _ = self.tx.send(HubCommand::Close);
    }
}
