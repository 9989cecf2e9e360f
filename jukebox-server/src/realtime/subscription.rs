//! Scoped subscription used by streaming handlers

use tokio::runtime::Handle;
use tracing::debug;

use super::conduit::{conduit, ConduitReceiver, SubscriberId, Update};
use super::RealtimeService;

/// A registered conduit that unsubscribes itself when released
///
/// Whichever way the owning handler ends (viewer disconnect drops the
/// response stream, or the service closes the conduit), the subscription is
/// removed from the service exactly once.
pub struct Subscription {
    service: RealtimeService,
    receiver: ConduitReceiver,
    released: bool,
}

impl RealtimeService {
    /// Create a conduit, register it and wrap it in a [`Subscription`]
    pub async fn open_subscription(&self) -> Subscription {
        let (tx, receiver) = conduit();
        self.subscribe(tx).await;
        Subscription {
            service: self.clone(),
            receiver,
            released: false,
        }
    }
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.receiver.id()
    }

    /// Next update, or `None` once the service closed this conduit
    pub async fn recv(&mut self) -> Option<Update> {
        self.receiver.recv().await
    }

    /// Unsubscribe and wait for the removal to complete
    pub async fn close(mut self) {
        self.released = true;
        self.service.unsubscribe(self.id()).await;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let id = self.id();
        match Handle::try_current() {
            Ok(handle) => {
                let service = self.service.clone();
                handle.spawn(async move {
                    service.unsubscribe(id).await;
                });
            }
            // Without a runtime the closed receiver is evicted on the next publish
            Err(_) => debug!(subscriber = %id, "No runtime to unsubscribe on drop"),
        }
    }
}
