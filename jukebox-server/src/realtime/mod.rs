//! Realtime now-playing distribution
//!
//! A single [`RealtimeService`] polls the upstream account and multiplexes
//! the result to every connected viewer, so viewers share one upstream
//! request per interval instead of each polling on their own.

pub mod conduit;
pub mod service;
pub mod subscription;

use async_trait::async_trait;
use jukebox_common::{NowPlaying, Result};

pub use conduit::{conduit, Conduit, ConduitReceiver, SubscriberId, Update};
pub use service::{PublishReport, RealtimeService, ServiceState, DEFAULT_DELIVERY_TIMEOUT};
pub use subscription::Subscription;

/// Upstream capability the service polls
///
/// `Ok(None)` means nothing is currently playing and is not an error.
#[async_trait]
pub trait NowPlayingSource: Send + Sync {
    async fn now_playing(&self) -> Result<Option<NowPlaying>>;
}
