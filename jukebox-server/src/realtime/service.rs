//! Now-playing poller and broadcaster
//!
//! One background task polls the upstream on a fixed interval and hands every
//! snapshot to all registered conduits. Registration, removal and the fan-out
//! itself are serialized by a single mutex which also guards the lifecycle
//! state, so two publish cycles never interleave and a subscriber can never be
//! half-registered while a publish is iterating.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::conduit::{Conduit, Delivery, SubscriberId, Update};
use super::NowPlayingSource;
use crate::metrics;

/// How long a subscriber may take to accept an update before it is evicted
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_millis(200);

/// Smallest poll interval; tokio intervals cannot have a zero period
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Lifecycle of the service: Unstarted -> Running -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Unstarted,
    Running,
    Stopped,
}

impl ServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::Unstarted => "unstarted",
            ServiceState::Running => "running",
            ServiceState::Stopped => "stopped",
        }
    }
}

/// Result of one fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub evicted: usize,
}

struct Inner {
    state: ServiceState,
    subscribers: HashMap<SubscriberId, Conduit>,
    last_published: Option<Update>,
}

struct Shared {
    source: Arc<dyn NowPlayingSource>,
    interval: Duration,
    delivery_timeout: Duration,
    inner: Mutex<Inner>,
}

/// Shared realtime now-playing source
///
/// Cheap to clone; all clones refer to the same subscriber set.
#[derive(Clone)]
pub struct RealtimeService {
    shared: Arc<Shared>,
}

impl RealtimeService {
    /// Create a service polling `source` every `interval`
    ///
    /// Nothing runs until [`start`](Self::start) is called.
    pub fn new(source: Arc<dyn NowPlayingSource>, interval: Duration) -> Self {
        Self::with_delivery_timeout(source, interval, DEFAULT_DELIVERY_TIMEOUT)
    }

    pub fn with_delivery_timeout(
        source: Arc<dyn NowPlayingSource>,
        interval: Duration,
        delivery_timeout: Duration,
    ) -> Self {
        let interval = if interval < MIN_INTERVAL {
            warn!(
                interval_ms = interval.as_millis() as u64,
                min_interval_ms = MIN_INTERVAL.as_millis() as u64,
                "Poll interval too small, using the minimum"
            );
            MIN_INTERVAL
        } else {
            interval
        };
        Self {
            shared: Arc::new(Shared {
                source,
                interval,
                delivery_timeout,
                inner: Mutex::new(Inner {
                    state: ServiceState::Unstarted,
                    subscribers: HashMap::new(),
                    last_published: None,
                }),
            }),
        }
    }

    pub fn interval(&self) -> Duration {
        self.shared.interval
    }

    pub fn delivery_timeout(&self) -> Duration {
        self.shared.delivery_timeout
    }

    /// Launch the poll loop on its own task
    ///
    /// Only the first call has any effect and returns the loop's handle; every
    /// later call returns `None`. The loop ends for good when `cancel` fires.
    pub async fn start(&self, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        let mut inner = self.shared.inner.lock().await;
        if inner.state != ServiceState::Unstarted {
            debug!(state = inner.state.as_str(), "Realtime service already started");
            return None;
        }
        inner.state = ServiceState::Running;
        drop(inner);

        let service = self.clone();
        Some(tokio::spawn(async move {
            service.run(cancel).await;
        }))
    }

    async fn run(&self, cancel: CancellationToken) {
        let period = self.shared.interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            interval_ms = period.as_millis() as u64,
            delivery_timeout_ms = self.shared.delivery_timeout.as_millis() as u64,
            "Realtime now-playing service started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.shared.source.now_playing() => result,
            };

            match fetched {
                Ok(Some(now_playing)) => {
                    self.publish(Arc::new(now_playing)).await;
                }
                Ok(None) => trace!("Nothing playing, skipping publish"),
                Err(e) => error!(error = %e, "Could not retrieve now-playing data"),
            }
        }

        self.stop().await;
    }

    /// Enter the final state and close every remaining conduit
    async fn stop(&self) {
        let mut inner = self.shared.inner.lock().await;
        inner.state = ServiceState::Stopped;
        let closed = inner.subscribers.len();
        inner.subscribers.clear();
        metrics::record_subscription_count(0);
        info!(closed_streams = closed, "Realtime now-playing service stopped");
    }

    /// Register a conduit
    ///
    /// After the service has stopped the conduit is closed right away, so its
    /// reader sees end-of-stream instead of waiting forever.
    pub async fn subscribe(&self, conduit: Conduit) -> SubscriberId {
        let id = conduit.id();
        let mut inner = self.shared.inner.lock().await;
        if inner.state == ServiceState::Stopped {
            debug!(subscriber = %id, "Service stopped, closing new subscriber immediately");
            return id;
        }
        inner.subscribers.insert(id, conduit);
        metrics::record_subscription_count(inner.subscribers.len());
        debug!(
            subscriber = %id,
            current_user_count = inner.subscribers.len(),
            "Someone just opened the page"
        );
        id
    }

    /// Remove and close a conduit
    ///
    /// Returns `false` if it was not registered (already evicted or
    /// unsubscribed); that case is a no-op.
    pub async fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut inner = self.shared.inner.lock().await;
        let removed = inner.subscribers.remove(&id).is_some();
        if removed {
            metrics::record_subscription_count(inner.subscribers.len());
            debug!(
                subscriber = %id,
                current_user_count = inner.subscribers.len(),
                "Someone just closed the page"
            );
        }
        removed
    }

    /// Hand `update` to every subscriber, evicting the unresponsive ones
    ///
    /// Each handoff waits at most the delivery timeout. Driven by the poll
    /// loop; public only so tests can publish without a source.
    #[doc(hidden)]
    pub async fn publish(&self, update: Update) -> PublishReport {
        let timeout = self.shared.delivery_timeout;
        let mut inner = self.shared.inner.lock().await;

        let mut report = PublishReport::default();
        let mut evicted = Vec::new();
        for (id, conduit) in inner.subscribers.iter() {
            match conduit.deliver(Arc::clone(&update), timeout).await {
                Delivery::Accepted => report.delivered += 1,
                Delivery::TimedOut => {
                    warn!(subscriber = %id, "Closing unresponsive user stream");
                    evicted.push(*id);
                }
                Delivery::Closed => {
                    debug!(subscriber = %id, "Dropping user stream whose reader is gone");
                    evicted.push(*id);
                }
            }
        }

        for id in &evicted {
            inner.subscribers.remove(id);
        }
        report.evicted = evicted.len();
        inner.last_published = Some(update);
        if report.evicted > 0 {
            metrics::record_subscription_count(inner.subscribers.len());
        }

        trace!(
            delivered = report.delivered,
            evicted = report.evicted,
            current_user_count = inner.subscribers.len(),
            "Published now-playing update"
        );
        report
    }

    pub async fn subscriber_count(&self) -> usize {
        self.shared.inner.lock().await.subscribers.len()
    }

    pub async fn is_subscribed(&self, id: SubscriberId) -> bool {
        self.shared.inner.lock().await.subscribers.contains_key(&id)
    }

    pub async fn state(&self) -> ServiceState {
        self.shared.inner.lock().await.state
    }

    /// Most recent snapshot handed to subscribers
    pub async fn last_published(&self) -> Option<Update> {
        self.shared.inner.lock().await.last_published.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::conduit::conduit;
    use jukebox_common::models::PlayingType;
    use jukebox_common::{Error, NowPlaying, Result};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Source replaying a fixed script, then reporting "nothing playing"
    struct ScriptedSource {
        script: std::sync::Mutex<VecDeque<Result<Option<NowPlaying>>>>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<Option<NowPlaying>>>) -> Arc<Self> {
            Arc::new(Self {
                script: std::sync::Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl NowPlayingSource for ScriptedSource {
        async fn now_playing(&self) -> Result<Option<NowPlaying>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script.lock().unwrap().pop_front().unwrap_or(Ok(None))
        }
    }

    fn status(progress_ms: u64) -> NowPlaying {
        NowPlaying {
            last_change: 1_700_000_000_000,
            progress_ms,
            kind: PlayingType::Track,
            playing: true,
            song: None,
        }
    }

    fn service(source: Arc<ScriptedSource>) -> RealtimeService {
        RealtimeService::new(source, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_new_service_is_empty_and_unstarted() {
        let svc = service(ScriptedSource::new(vec![]));
        assert_eq!(svc.state().await, ServiceState::Unstarted);
        assert_eq!(svc.subscriber_count().await, 0);
        assert!(svc.last_published().await.is_none());
        assert_eq!(svc.delivery_timeout(), DEFAULT_DELIVERY_TIMEOUT);
    }

    #[tokio::test]
    async fn test_subscribe_then_unsubscribe() {
        let svc = service(ScriptedSource::new(vec![]));
        let (tx, mut rx) = conduit();

        let id = svc.subscribe(tx).await;
        assert!(svc.is_subscribed(id).await);

        assert!(svc.unsubscribe(id).await);
        assert!(!svc.is_subscribed(id).await);
        assert!(rx.recv().await.is_none(), "unsubscribe closes the conduit");
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let svc = service(ScriptedSource::new(vec![]));
        let (tx, _rx) = conduit();
        let id = svc.subscribe(tx).await;

        assert!(svc.unsubscribe(id).await);
        assert!(!svc.unsubscribe(id).await);
        assert_eq!(svc.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn test_publish_reaches_every_reader() {
        let svc = service(ScriptedSource::new(vec![]));
        let mut readers = Vec::new();
        for _ in 0..3 {
            let (tx, rx) = conduit();
            svc.subscribe(tx).await;
            readers.push(rx);
        }

        let report = svc.publish(Arc::new(status(10))).await;
        assert_eq!(report, PublishReport { delivered: 3, evicted: 0 });

        for rx in readers.iter_mut() {
            assert_eq!(rx.recv().await.unwrap().progress_ms, 10);
        }
        assert_eq!(svc.last_published().await.unwrap().progress_ms, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_reader_is_evicted_and_closed() {
        let svc = service(ScriptedSource::new(vec![]));
        let (healthy_tx, mut healthy) = conduit();
        let (stalled_tx, mut stalled) = conduit();
        svc.subscribe(healthy_tx).await;
        let stalled_id = svc.subscribe(stalled_tx).await;

        svc.publish(Arc::new(status(1))).await;
        assert_eq!(healthy.recv().await.unwrap().progress_ms, 1);

        // `stalled` never read the first update, so its slot is still full
        let report = svc.publish(Arc::new(status(2))).await;
        assert_eq!(report, PublishReport { delivered: 1, evicted: 1 });
        assert!(!svc.is_subscribed(stalled_id).await);
        assert_eq!(healthy.recv().await.unwrap().progress_ms, 2);

        assert_eq!(stalled.recv().await.unwrap().progress_ms, 1);
        assert!(stalled.recv().await.is_none());

        // Evicted subscribers can still be unsubscribed by their handler
        assert!(!svc.unsubscribe(stalled_id).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_cost_is_bounded_per_slow_subscriber() {
        let svc = service(ScriptedSource::new(vec![]));
        let mut keep = Vec::new();
        for _ in 0..4 {
            let (tx, rx) = conduit();
            svc.subscribe(tx).await;
            keep.push(rx);
        }
        svc.publish(Arc::new(status(1))).await;

        let started = Instant::now();
        let report = svc.publish(Arc::new(status(2))).await;
        let elapsed = started.elapsed();

        assert_eq!(report.evicted, 4);
        assert_eq!(svc.subscriber_count().await, 0);
        assert!(elapsed >= DEFAULT_DELIVERY_TIMEOUT * 4);
        assert!(elapsed < DEFAULT_DELIVERY_TIMEOUT * 5);
    }

    #[tokio::test]
    async fn test_dropped_reader_is_removed_on_next_publish() {
        let svc = service(ScriptedSource::new(vec![]));
        let (tx, rx) = conduit();
        svc.subscribe(tx).await;
        drop(rx);

        let report = svc.publish(Arc::new(status(1))).await;
        assert_eq!(report, PublishReport { delivered: 0, evicted: 1 });
        assert_eq!(svc.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_subscribes_are_all_registered() {
        let svc = service(ScriptedSource::new(vec![]));
        let mut handles = Vec::new();
        for _ in 0..64 {
            let svc = svc.clone();
            handles.push(tokio::spawn(async move {
                let (tx, rx) = conduit();
                let id = svc.subscribe(tx).await;
                (id, rx)
            }));
        }

        let mut registered = Vec::new();
        for handle in handles {
            registered.push(handle.await.unwrap());
        }

        assert_eq!(svc.subscriber_count().await, 64);
        for (id, _rx) in &registered {
            assert!(svc.is_subscribed(*id).await);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_only_launches_once() {
        let source = ScriptedSource::new(vec![]);
        let svc = service(source.clone());
        let cancel = CancellationToken::new();

        let first = svc.start(cancel.clone()).await;
        let second = svc.start(cancel.clone()).await;
        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(svc.state().await, ServiceState::Running);

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(source.calls(), 2, "one loop means one fetch per tick");

        cancel.cancel();
        first.unwrap().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_fetch_without_subscribers() {
        let source = ScriptedSource::new(vec![]);
        let svc = service(source.clone());
        let cancel = CancellationToken::new();
        let handle = svc.start(cancel.clone()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(source.calls(), 3);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_and_empty_results_skip_publish_but_not_ticks() {
        let source = ScriptedSource::new(vec![
            Err(Error::Http("connection reset".to_string())),
            Ok(None),
            Ok(Some(status(3))),
        ]);
        let svc = service(source.clone());
        let (tx, mut rx) = conduit();
        svc.subscribe(tx).await;

        let cancel = CancellationToken::new();
        let handle = svc.start(cancel.clone()).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.progress_ms, 3, "only the third tick publishes");
        assert_eq!(source.calls(), 3);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_loop_and_closes_conduits() {
        let source = ScriptedSource::new(vec![]);
        let svc = service(source.clone());
        let (tx, mut rx) = conduit();
        svc.subscribe(tx).await;

        let cancel = CancellationToken::new();
        let handle = svc.start(cancel.clone()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;

        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(svc.state().await, ServiceState::Stopped);
        assert!(rx.recv().await.is_none());

        let calls = source.calls();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(source.calls(), calls, "no ticks after shutdown");

        // Shutdown is final
        assert!(svc.start(CancellationToken::new()).await.is_none());
    }

    fn rendered_subscription_count(
        handle: &metrics_exporter_prometheus::PrometheusHandle,
    ) -> Option<f64> {
        handle
            .render()
            .lines()
            .filter(|line| !line.starts_with('#'))
            .find_map(|line| {
                line.strip_prefix(crate::metrics::SUBSCRIPTION_COUNT)?
                    .strip_prefix(' ')?
                    .trim()
                    .parse()
                    .ok()
            })
    }

    #[tokio::test]
    async fn test_subscription_gauge_follows_subscribers() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let _guard = ::metrics::set_default_local_recorder(&recorder);

        let svc = service(ScriptedSource::new(vec![]));
        let (first_tx, _first) = conduit();
        let (second_tx, second) = conduit();
        let first_id = svc.subscribe(first_tx).await;
        svc.subscribe(second_tx).await;
        assert_eq!(rendered_subscription_count(&handle), Some(2.0));

        assert!(svc.unsubscribe(first_id).await);
        assert_eq!(rendered_subscription_count(&handle), Some(1.0));

        drop(second);
        svc.publish(Arc::new(status(1))).await;
        assert_eq!(rendered_subscription_count(&handle), Some(0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_is_clamped_and_polls() {
        let source = ScriptedSource::new(vec![Ok(Some(status(7)))]);
        let svc = RealtimeService::new(source.clone(), Duration::ZERO);
        assert_eq!(svc.interval(), MIN_INTERVAL);

        let (tx, mut rx) = conduit();
        svc.subscribe(tx).await;
        let cancel = CancellationToken::new();
        let handle = svc.start(cancel.clone()).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().progress_ms, 7);
        assert!(source.calls() >= 1);

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(svc.state().await, ServiceState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_after_stop_closes_immediately() {
        let svc = service(ScriptedSource::new(vec![]));
        let cancel = CancellationToken::new();
        let handle = svc.start(cancel.clone()).await.unwrap();
        cancel.cancel();
        handle.await.unwrap();

        let (tx, mut rx) = conduit();
        let id = svc.subscribe(tx).await;
        assert!(!svc.is_subscribed(id).await);
        assert!(rx.recv().await.is_none());
    }
}
