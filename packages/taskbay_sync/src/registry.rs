//! Declarative room subscriptions.
//!
//! The registry holds the set of threads the client wants to be in. Join and
//! leave mutate the set and nudge the live connection when there is one; the
//! primary transport replays the whole set on every (re)connect, so a
//! subscription can never be lost to a reconnect race.

use std::collections::BTreeSet;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

const OP_CHANNEL_CAPACITY: usize = 64;

/// A subscription change bound for the live duplex connection. Ops that
/// arrive while the connection is down are discarded there; the desired set
/// replay covers them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomOp {
    Join { thread_id: String },
    Leave { thread_id: String },
}

#[derive(Debug)]
pub struct RoomSubscriptionRegistry {
    desired: Mutex<BTreeSet<String>>,
    ops: mpsc::Sender<RoomOp>,
}

impl RoomSubscriptionRegistry {
    /// Returns the registry and the op receiver the primary transport
    /// consumes.
    pub fn new() -> (Self, mpsc::Receiver<RoomOp>) {
        let (ops, ops_rx) = mpsc::channel(OP_CHANNEL_CAPACITY);
        (
            Self {
                desired: Mutex::new(BTreeSet::new()),
                ops,
            },
            ops_rx,
        )
    }

    pub async fn join(&self, thread_id: &str) {
        let inserted = self.desired.lock().await.insert(thread_id.to_string());
        if !inserted {
            return;
        }
        debug!(thread_id, "joining thread");
        self.emit(RoomOp::Join {
            thread_id: thread_id.to_string(),
        });
    }

    pub async fn leave(&self, thread_id: &str) {
        let removed = self.desired.lock().await.remove(thread_id);
        if !removed {
            return;
        }
        debug!(thread_id, "leaving thread");
        self.emit(RoomOp::Leave {
            thread_id: thread_id.to_string(),
        });
    }

    /// Snapshot of the desired set, in stable order for replay.
    pub async fn desired_set(&self) -> Vec<String> {
        self.desired.lock().await.iter().cloned().collect()
    }

    pub async fn contains(&self, thread_id: &str) -> bool {
        self.desired.lock().await.contains(thread_id)
    }

    fn emit(&self, op: RoomOp) {
        // A full channel means the transport is wedged or down; the replay
        // on its next connect restores the desired state anyway.
        if let Err(e) = self.ops.try_send(op) {
            warn!(error = %e, "dropping room op, replay will restore it");
        }
    }
}
