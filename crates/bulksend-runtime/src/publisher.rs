//! Status/Progress Publisher
//!
//! Push-based fan-out of engine state to observers. Each `StreamPublisher` serves
//! one stream kind and keeps at most one active subscription:
//! - `subscribe` marks the subscription active before the channel confirms, so
//!   concurrent callers share one stream instead of racing to connect
//! - a supervisor task per subscription opens the channel through a
//!   `StreamConnector`, pumps events to observers and reconnects after errors
//! - `unsubscribe` is a no-op while a (re)connect handshake is in flight
//!
//! `LocalStreamConnector` bridges the engine's broadcast hub into stream channels.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex, RwLock,
};

use async_trait::async_trait;
use bulksend_core::{
    channel::{create_stream_channel, ChannelEventSender, EngineEventSender},
    transport::channel_closed,
    ChannelConfig, ChannelEvent, DispatchResult, EngineEvent, ObserverId, StreamChannel,
    StreamConnector, StreamEvent, StreamKind, StreamObserver, SubscriptionConfig,
};
use serde::Serialize;
use tokio::{sync::broadcast::error::RecvError, task::JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::reconnect::{ReconnectManager, ReconnectPolicy};
use crate::state::SnapshotSource;

// ----------------------------------------------------------------------------
// Subscription
// ----------------------------------------------------------------------------

/// Delivery counters of one subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SubscriptionStats {
    /// Events handed to observers (counted once per event)
    pub delivered: u64,
    /// Reconnect attempts scheduled
    pub reconnects: u64,
}

struct SubscriptionShared {
    id: Uuid,
    kind: StreamKind,
    active: AtomicBool,
    connecting: AtomicBool,
    observers: RwLock<Vec<(ObserverId, Arc<dyn StreamObserver>)>>,
    delivered: AtomicU64,
    reconnects: AtomicU64,
    /// Last event handed to observers; its lock serializes deliveries
    last: Mutex<Option<StreamEvent>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SubscriptionShared {
    fn new(kind: StreamKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            active: AtomicBool::new(false),
            connecting: AtomicBool::new(false),
            observers: RwLock::new(Vec::new()),
            delivered: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            last: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Register an observer; the same observer instance is registered once
    fn attach(&self, observer: Arc<dyn StreamObserver>) -> (ObserverId, bool) {
        let mut observers = match self.observers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some((id, _)) = observers
            .iter()
            .find(|(_, existing)| Arc::ptr_eq(existing, &observer))
        {
            return (*id, false);
        }
        let id = ObserverId::new();
        observers.push((id, observer));
        (id, true)
    }

    /// Register an observer on a running stream
    ///
    /// Returns the latest event when the observer is new. The caller replays it
    /// after releasing its locks, since observers may call back into the publisher.
    fn attach_for_replay(
        &self,
        observer: Arc<dyn StreamObserver>,
    ) -> (ObserverId, Option<StreamEvent>) {
        let last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let (id, added) = self.attach(observer);
        let replay = if added { last.clone() } else { None };
        (id, replay)
    }

    fn detach(&self, observer_id: ObserverId) -> bool {
        let mut observers = match self.observers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = observers.len();
        observers.retain(|(id, _)| *id != observer_id);
        observers.len() != before
    }

    fn observer_count(&self) -> usize {
        match self.observers.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Hand an event to every observer while the subscription is active
    fn deliver(&self, event: StreamEvent) -> bool {
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !self.active.load(Ordering::SeqCst) {
            return false;
        }
        self.notify(&event);
        *last = Some(event);
        true
    }

    /// Deliver a closing event after the subscription went inactive
    ///
    /// Skipped when observers already received an identical event.
    fn deliver_final(&self, event: StreamEvent) {
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if last.as_ref() == Some(&event) {
            return;
        }
        self.notify(&event);
        *last = Some(event);
    }

    fn notify(&self, event: &StreamEvent) {
        let observers: Vec<Arc<dyn StreamObserver>> = match self.observers.read() {
            Ok(guard) => guard.iter().map(|(_, o)| o.clone()).collect(),
            Err(poisoned) => poisoned.into_inner().iter().map(|(_, o)| o.clone()).collect(),
        };
        for observer in observers {
            observer.on_event(event.clone());
        }
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    fn stats(&self) -> SubscriptionStats {
        SubscriptionStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }

    fn set_task(&self, handle: JoinHandle<()>) {
        if let Ok(mut task) = self.task.lock() {
            *task = Some(handle);
        }
    }

    fn abort_task(&self) {
        if let Ok(mut task) = self.task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
    }
}

/// Handle to a logical stream returned by `subscribe`
#[derive(Clone)]
pub struct Subscription {
    shared: Arc<SubscriptionShared>,
    observer_id: ObserverId,
}

impl Subscription {
    /// Identity of the logical stream; equal for handles to the same stream
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn kind(&self) -> StreamKind {
        self.shared.kind
    }

    pub fn observer_id(&self) -> ObserverId {
        self.observer_id
    }

    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    pub fn is_connecting(&self) -> bool {
        self.shared.connecting.load(Ordering::SeqCst)
    }

    pub fn observer_count(&self) -> usize {
        self.shared.observer_count()
    }

    pub fn stats(&self) -> SubscriptionStats {
        self.shared.stats()
    }

    /// Stop delivering to this handle's observer without closing the stream
    pub fn detach(&self) -> bool {
        self.shared.detach(self.observer_id)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.shared.id)
            .field("kind", &self.shared.kind)
            .field("observer_id", &self.observer_id)
            .field("active", &self.is_active())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Stream Publisher
// ----------------------------------------------------------------------------

pub struct StreamPublisher {
    kind: StreamKind,
    connector: Arc<dyn StreamConnector>,
    config: SubscriptionConfig,
    current: Mutex<Option<Arc<SubscriptionShared>>>,
}

impl StreamPublisher {
    pub fn new(
        kind: StreamKind,
        connector: Arc<dyn StreamConnector>,
        config: SubscriptionConfig,
    ) -> Self {
        Self {
            kind,
            connector,
            config,
            current: Mutex::new(None),
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Subscribe an observer, reusing the active stream if there is one
    pub fn subscribe(&self, observer: Arc<dyn StreamObserver>) -> Subscription {
        let mut current = match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let running = current
            .as_ref()
            .filter(|shared| shared.active.load(Ordering::SeqCst))
            .cloned();
        if let Some(shared) = running {
            let (observer_id, replay) = shared.attach_for_replay(observer.clone());
            drop(current);
            debug!("{} stream already active, observer {} attached", self.kind, observer_id);
            if let Some(event) = replay {
                observer.on_event(event);
            }
            return Subscription {
                shared,
                observer_id,
            };
        }

        let shared = Arc::new(SubscriptionShared::new(self.kind));
        let (observer_id, _) = shared.attach(observer);

        // Active before the channel confirms
        shared.active.store(true, Ordering::SeqCst);
        shared.connecting.store(true, Ordering::SeqCst);

        let task = tokio::spawn(run_subscription(
            shared.clone(),
            self.connector.clone(),
            ReconnectPolicy::from(&self.config),
        ));
        shared.set_task(task);
        info!("{} stream subscription {} opened", self.kind, shared.id);

        *current = Some(shared.clone());
        Subscription {
            shared,
            observer_id,
        }
    }

    /// Close the active stream
    ///
    /// No-op when nothing is active or a (re)connect handshake is in flight.
    /// Returns whether a stream was closed.
    pub fn unsubscribe(&self) -> bool {
        let mut current = match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(shared) = current.as_ref() else {
            return false;
        };
        if !shared.active.load(Ordering::SeqCst) {
            return false;
        }
        if shared.connecting.load(Ordering::SeqCst) {
            debug!("{} stream is connecting, unsubscribe ignored", self.kind);
            return false;
        }

        Self::close(shared);
        *current = None;
        true
    }

    /// Close the stream regardless of an in-flight handshake (session teardown)
    pub fn close_all(&self) -> bool {
        let mut current = match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match current.take() {
            Some(shared) if shared.active.load(Ordering::SeqCst) => {
                Self::close(&shared);
                true
            }
            _ => false,
        }
    }

    /// Close the stream, making sure observers saw `final_event` last
    ///
    /// Used when the session goes down: the closing status snapshot carries the
    /// error that ended the session.
    pub fn close_with(&self, final_event: StreamEvent) -> bool {
        let closed = {
            let mut current = match self.current.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            match current.take() {
                Some(shared) if shared.active.load(Ordering::SeqCst) => {
                    Self::close(&shared);
                    Some(shared)
                }
                _ => None,
            }
        };
        match closed {
            Some(shared) => {
                shared.deliver_final(final_event);
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        match self.current.lock() {
            Ok(guard) => guard
                .as_ref()
                .is_some_and(|shared| shared.active.load(Ordering::SeqCst)),
            Err(_) => false,
        }
    }

    /// Handle to the current stream, active or dropped
    pub fn current(&self) -> Option<Subscription> {
        let current = self.current.lock().ok()?;
        current.as_ref().map(|shared| Subscription {
            shared: shared.clone(),
            observer_id: ObserverId::new(),
        })
    }

    fn close(shared: &SubscriptionShared) {
        shared.active.store(false, Ordering::SeqCst);
        shared.connecting.store(false, Ordering::SeqCst);
        shared.abort_task();
        info!("{} stream subscription {} closed", shared.kind, shared.id);
    }
}

impl Drop for StreamPublisher {
    fn drop(&mut self) {
        self.close_all();
    }
}

/// Supervisor loop of one subscription: open, pump, reconnect
async fn run_subscription(
    shared: Arc<SubscriptionShared>,
    connector: Arc<dyn StreamConnector>,
    policy: ReconnectPolicy,
) {
    let kind = shared.kind;
    let mut reconnect = ReconnectManager::new(policy);

    loop {
        shared.connecting.store(true, Ordering::SeqCst);
        let reason = match connector.open(kind).await {
            Ok(mut channel) => pump(&shared, &mut channel, &mut reconnect).await,
            Err(err) => err.to_string(),
        };
        shared.connecting.store(false, Ordering::SeqCst);

        if !shared.active.load(Ordering::SeqCst) {
            return;
        }

        match reconnect.next_delay() {
            Some(delay) => {
                shared.reconnects.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "{} stream error: {}; reconnecting in {:?} (attempt {})",
                    kind,
                    reason,
                    delay,
                    reconnect.attempt_count()
                );
                tokio::time::sleep(delay).await;
                if !shared.active.load(Ordering::SeqCst) {
                    return;
                }
            }
            None => {
                warn!(
                    "{} stream dropped after {} reconnect attempts: {}",
                    kind,
                    reconnect.attempt_count(),
                    reason
                );
                shared.active.store(false, Ordering::SeqCst);
                shared.deliver_final(StreamEvent::Dropped { kind, reason });
                return;
            }
        }
    }
}

/// Forward channel events to observers until the channel fails
async fn pump(
    shared: &SubscriptionShared,
    channel: &mut StreamChannel,
    reconnect: &mut ReconnectManager,
) -> String {
    while let Some(event) = channel.next().await {
        match event {
            ChannelEvent::Opened => {
                debug!("{} stream channel open", shared.kind);
                shared.connecting.store(false, Ordering::SeqCst);
                reconnect.reset();
            }
            ChannelEvent::Event(event) => {
                // An event implies the channel is open
                shared.connecting.store(false, Ordering::SeqCst);
                if !shared.deliver(event) {
                    break;
                }
            }
            ChannelEvent::Error { reason } => return reason,
        }
    }
    channel_closed(shared.kind).to_string()
}

// ----------------------------------------------------------------------------
// Local Stream Connector
// ----------------------------------------------------------------------------

/// Opens stream channels fed from the engine's broadcast hub
///
/// Every channel starts with a snapshot of the current state so observers never
/// wait for the next change.
pub struct LocalStreamConnector {
    events: EngineEventSender,
    snapshots: Arc<dyn SnapshotSource>,
    channels: ChannelConfig,
}

impl LocalStreamConnector {
    pub fn new(
        events: EngineEventSender,
        snapshots: Arc<dyn SnapshotSource>,
        channels: ChannelConfig,
    ) -> Self {
        Self {
            events,
            snapshots,
            channels,
        }
    }

    async fn snapshot_event(&self, kind: StreamKind) -> StreamEvent {
        match kind {
            StreamKind::Status => StreamEvent::Status(self.snapshots.status_snapshot().await),
            StreamKind::Progress => {
                StreamEvent::Progress(self.snapshots.progress_snapshot().await)
            }
        }
    }
}

#[async_trait]
impl StreamConnector for LocalStreamConnector {
    async fn open(&self, kind: StreamKind) -> DispatchResult<StreamChannel> {
        let (sender, channel) = create_stream_channel(&self.channels);

        // Subscribe before taking the snapshot so no change falls in between
        let receiver = self.events.subscribe();
        let initial = self.snapshot_event(kind).await;

        sender
            .send(ChannelEvent::Opened)
            .await
            .map_err(|_| channel_closed(kind))?;
        sender
            .send(ChannelEvent::Event(initial))
            .await
            .map_err(|_| channel_closed(kind))?;

        tokio::spawn(forward_engine_events(
            kind,
            receiver,
            sender,
            self.snapshots.clone(),
        ));
        Ok(channel)
    }
}

async fn forward_engine_events(
    kind: StreamKind,
    mut receiver: tokio::sync::broadcast::Receiver<EngineEvent>,
    sender: ChannelEventSender,
    snapshots: Arc<dyn SnapshotSource>,
) {
    loop {
        let event = tokio::select! {
            _ = sender.closed() => return,
            received = receiver.recv() => received,
        };

        let forwarded = match event {
            Ok(event) if event.stream_kind() == kind => ChannelEvent::Event(event.into_stream_event()),
            Ok(_) => continue,
            Err(RecvError::Lagged(skipped)) => {
                debug!("{} bridge lagged by {} events, resending snapshot", kind, skipped);
                let snapshot = match kind {
                    StreamKind::Status => StreamEvent::Status(snapshots.status_snapshot().await),
                    StreamKind::Progress => {
                        StreamEvent::Progress(snapshots.progress_snapshot().await)
                    }
                };
                ChannelEvent::Event(snapshot)
            }
            Err(RecvError::Closed) => ChannelEvent::Error {
                reason: "engine event hub closed".to_string(),
            },
        };

        let is_error = matches!(forwarded, ChannelEvent::Error { .. });
        if sender.send(forwarded).await.is_err() || is_error {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::EngineState;
    use bulksend_core::{DispatchError, EngineConfig, JobStatus, SessionState};
    use std::sync::atomic::AtomicUsize;
    use tokio::time::{sleep, Duration};

    fn collecting_observer() -> (Arc<dyn StreamObserver>, Arc<Mutex<Vec<StreamEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let observer: Arc<dyn StreamObserver> = Arc::new(move |event: StreamEvent| {
            sink.lock().unwrap().push(event);
        });
        (observer, events)
    }

    fn create_local_publisher(kind: StreamKind) -> (Arc<EngineState>, StreamPublisher) {
        let state = Arc::new(EngineState::new(EngineConfig::testing()));
        let connector = Arc::new(LocalStreamConnector::new(
            state.event_sender(),
            state.clone(),
            ChannelConfig::testing(),
        ));
        let publisher = StreamPublisher::new(kind, connector, SubscriptionConfig::testing());
        (state, publisher)
    }

    /// Connector whose every open fails
    struct FailingConnector {
        opens: AtomicUsize,
    }

    #[async_trait]
    impl StreamConnector for FailingConnector {
        async fn open(&self, _kind: StreamKind) -> DispatchResult<StreamChannel> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Err(DispatchError::channel_error("refused"))
        }
    }

    #[tokio::test]
    async fn test_initial_snapshot_delivered() {
        let (_state, publisher) = create_local_publisher(StreamKind::Status);
        let (observer, events) = collecting_observer();

        let subscription = publisher.subscribe(observer);
        assert!(subscription.is_active());
        sleep(Duration::from_millis(50)).await;

        let events = events.lock().unwrap();
        assert!(matches!(
            events.first(),
            Some(StreamEvent::Status(snapshot))
                if snapshot.session_state == SessionState::Disconnected
                    && snapshot.job_status == JobStatus::Idle
        ));
        assert!(!subscription.is_connecting());
    }

    #[tokio::test]
    async fn test_subscribe_twice_returns_same_stream() {
        let (state, publisher) = create_local_publisher(StreamKind::Status);
        let (observer, events) = collecting_observer();

        let first = publisher.subscribe(observer.clone());
        let second = publisher.subscribe(observer);
        assert_eq!(first.id(), second.id());
        assert_eq!(first.observer_id(), second.observer_id());
        assert_eq!(first.observer_count(), 1);

        sleep(Duration::from_millis(50)).await;
        state.publish_session_changed().await;
        sleep(Duration::from_millis(50)).await;

        // Initial snapshot plus one change, each delivered once
        assert_eq!(events.lock().unwrap().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_replayed_observer_may_unsubscribe() {
        let (_state, publisher) = create_local_publisher(StreamKind::Status);
        let publisher = Arc::new(publisher);
        let (first, _events) = collecting_observer();
        let _subscription = publisher.subscribe(first);
        sleep(Duration::from_millis(50)).await;

        let closed = Arc::new(AtomicBool::new(false));
        let weak = Arc::downgrade(&publisher);
        let flag = closed.clone();
        let late: Arc<dyn StreamObserver> = Arc::new(move |_event: StreamEvent| {
            if let Some(publisher) = weak.upgrade() {
                flag.store(publisher.unsubscribe(), Ordering::SeqCst);
            }
        });

        let (done, finished) = std::sync::mpsc::channel();
        let handle = tokio::runtime::Handle::current();
        let worker = publisher.clone();
        std::thread::spawn(move || {
            let _runtime = handle.enter();
            let subscription = worker.subscribe(late);
            let _ = done.send(subscription.id());
        });

        assert!(finished.recv_timeout(Duration::from_secs(2)).is_ok());
        assert!(closed.load(Ordering::SeqCst));
        assert!(!publisher.is_active());
    }

    #[tokio::test]
    async fn test_progress_stream_ignores_status_events() {
        let (state, publisher) = create_local_publisher(StreamKind::Progress);
        let (observer, events) = collecting_observer();

        let _subscription = publisher.subscribe(observer);
        sleep(Duration::from_millis(50)).await;
        state.publish_session_changed().await;
        sleep(Duration::from_millis(50)).await;

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], StreamEvent::Progress(_)));
    }

    #[tokio::test]
    async fn test_unsubscribe_closes_stream() {
        let (_state, publisher) = create_local_publisher(StreamKind::Status);
        let (observer, _events) = collecting_observer();

        let subscription = publisher.subscribe(observer);
        sleep(Duration::from_millis(50)).await;

        assert!(publisher.unsubscribe());
        assert!(!subscription.is_active());
        assert!(!publisher.is_active());
        // Second call is a no-op
        assert!(!publisher.unsubscribe());
    }

    #[tokio::test]
    async fn test_reconnect_exhaustion_drops_stream() {
        let connector = Arc::new(FailingConnector {
            opens: AtomicUsize::new(0),
        });
        let publisher = StreamPublisher::new(
            StreamKind::Progress,
            connector.clone(),
            SubscriptionConfig {
                reconnect_delay_ms: 5,
                max_reconnect_attempts: 2,
                backoff_multiplier: 1.0,
                max_delay_ms: 5,
            },
        );
        let (observer, events) = collecting_observer();

        let subscription = publisher.subscribe(observer);
        sleep(Duration::from_millis(150)).await;

        assert!(!subscription.is_active());
        assert_eq!(connector.opens.load(Ordering::SeqCst), 3);
        assert_eq!(subscription.stats().reconnects, 2);
        assert!(matches!(
            events.lock().unwrap().last(),
            Some(StreamEvent::Dropped { kind: StreamKind::Progress, .. })
        ));

        // A fresh subscribe starts a new stream
        let (observer, _events) = collecting_observer();
        let again = publisher.subscribe(observer);
        assert_ne!(again.id(), subscription.id());
        publisher.close_all();
    }
}
