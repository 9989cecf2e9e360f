//! Per-viewer delivery conduit
//!
//! A conduit is a bounded channel holding at most one undelivered update.
//! The sending half is owned by the [`RealtimeService`](super::RealtimeService)
//! while registered; dropping it is what closes the conduit, so a conduit can
//! only ever be closed once.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use jukebox_common::NowPlaying;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use uuid::Uuid;

/// Snapshot shared by every subscriber of one publish cycle
pub type Update = Arc<NowPlaying>;

/// Identity of a conduit, allocated when the conduit is created and never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Create a new conduit pair
pub fn conduit() -> (Conduit, ConduitReceiver) {
    let id = SubscriberId::new();
    let (tx, rx) = mpsc::channel(1);
    (Conduit { id, tx }, ConduitReceiver { id, rx })
}

/// Sending half, registered with the service
pub struct Conduit {
    id: SubscriberId,
    tx: mpsc::Sender<Update>,
}

/// Outcome of one handoff attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Accepted,
    /// Reader did not make room within the delivery timeout
    TimedOut,
    /// Reader is gone
    Closed,
}

impl Conduit {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub(crate) async fn deliver(&self, update: Update, timeout: Duration) -> Delivery {
        match self.tx.send_timeout(update, timeout).await {
            Ok(()) => Delivery::Accepted,
            Err(SendTimeoutError::Timeout(_)) => Delivery::TimedOut,
            Err(SendTimeoutError::Closed(_)) => Delivery::Closed,
        }
    }
}

impl fmt::Debug for Conduit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conduit").field("id", &self.id).finish()
    }
}

/// Receiving half, read by the streaming handler
pub struct ConduitReceiver {
    id: SubscriberId,
    rx: mpsc::Receiver<Update>,
}

impl ConduitReceiver {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next update
    ///
    /// Returns `None` once the conduit has been closed and any pending update
    /// has been drained.
    pub async fn recv(&mut self) -> Option<Update> {
        self.rx.recv().await
    }
}

impl fmt::Debug for ConduitReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConduitReceiver").field("id", &self.id).finish()
    }
}
