//! Status/progress streams: subscription rules, lifecycle coupling, reconnects

mod common;

use async_trait::async_trait;
use bulksend_core::{StreamChannel, SubscriptionConfig};
use bulksend_harness::{CollectingObserver, FlakyConnector, MockTransport};
use bulksend_runtime::{
    CoordinatorBuilder, DispatchError, DispatchResult, DispatchSettings, EngineConfig, JobStatus,
    SessionState, StreamConnector, StreamEvent, StreamKind,
};
use common::{contacts, TestHarness, WAIT};
use std::sync::Arc;
use tokio::{
    sync::Semaphore,
    time::{sleep, Duration},
};

#[tokio::test]
async fn test_subscribe_twice_shares_one_stream() {
    let harness = TestHarness::connected().await;
    let observer = Arc::new(CollectingObserver::new());

    let first = harness.coordinator.subscribe_status(observer.clone());
    let second = harness.coordinator.subscribe_status(observer.clone());
    assert_eq!(first.id(), second.id());
    assert!(second.is_active());
    assert!(observer.wait_for(WAIT, |events| !events.is_empty()).await);

    harness
        .coordinator
        .start_sending(contacts(2), DispatchSettings::immediate(2))
        .await
        .unwrap();
    assert!(
        observer
            .wait_for_status(WAIT, |s| s.job_status == JobStatus::Completed)
            .await
    );
    sleep(Duration::from_millis(20)).await;

    // Each change reaches the observer once
    let statuses = observer.statuses();
    let processing = statuses
        .iter()
        .filter(|s| s.job_status == JobStatus::Processing)
        .count();
    let completed = statuses
        .iter()
        .filter(|s| s.job_status == JobStatus::Completed)
        .count();
    assert_eq!(processing, 1);
    assert_eq!(completed, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_subscribes_share_one_stream() {
    let harness = TestHarness::new();
    let observer = Arc::new(CollectingObserver::new());
    let handle = tokio::runtime::Handle::current();

    let ids: Vec<_> = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let observer = observer.clone();
                let handle = handle.clone();
                let coordinator = &harness.coordinator;
                scope.spawn(move || {
                    let _runtime = handle.enter();
                    coordinator.subscribe_progress(observer).id()
                })
            })
            .collect();
        workers
            .into_iter()
            .map(|worker| worker.join().unwrap())
            .collect()
    });

    assert!(ids.windows(2).all(|pair| pair[0] == pair[1]));
    let subscription = harness.coordinator.progress_subscription().unwrap();
    assert_eq!(subscription.id(), ids[0]);
    assert_eq!(subscription.observer_count(), 1);
}

#[tokio::test]
async fn test_status_stream_follows_session() {
    let harness = TestHarness::new();
    assert!(harness.coordinator.status_subscription().is_none());

    harness.connect().await;
    assert!(
        harness
            .status
            .wait_for_status(WAIT, |s| s.session_state == SessionState::Connected)
            .await
    );
    assert!(harness
        .coordinator
        .status_subscription()
        .is_some_and(|subscription| subscription.is_active()));

    harness.coordinator.disconnect().await;
    assert_eq!(
        harness.status.last_status().map(|s| s.session_state),
        Some(SessionState::Disconnected)
    );
    assert!(harness.coordinator.status_subscription().is_none());
}

#[tokio::test]
async fn test_progress_stream_stays_open_after_completion() {
    let harness = TestHarness::connected().await;
    harness
        .coordinator
        .start_sending(contacts(3), DispatchSettings::immediate(2))
        .await
        .unwrap();

    assert!(
        harness
            .progress
            .wait_for_progress(WAIT, |p| p.job_status == JobStatus::Completed)
            .await
    );
    sleep(Duration::from_millis(50)).await;
    assert!(harness
        .coordinator
        .progress_subscription()
        .is_some_and(|subscription| subscription.is_active()));

    harness.coordinator.disconnect().await;
    assert!(harness.coordinator.progress_subscription().is_none());
}

#[tokio::test]
async fn test_explicit_unsubscribe() {
    let harness = TestHarness::connected().await;
    let observer = Arc::new(CollectingObserver::new());
    let subscription = harness.coordinator.subscribe_progress(observer.clone());
    assert!(observer.wait_for(WAIT, |events| !events.is_empty()).await);

    assert!(harness.coordinator.unsubscribe_progress());
    assert!(!subscription.is_active());
    assert!(!harness.coordinator.unsubscribe_progress());

    let seen = observer.len();
    harness
        .coordinator
        .start_sending(contacts(1), DispatchSettings::immediate(1))
        .await
        .unwrap();
    assert!(harness.wait_for_job(JobStatus::Completed).await);
    sleep(Duration::from_millis(20)).await;
    assert_eq!(observer.len(), seen);
}

#[tokio::test]
async fn test_stream_reconnects_after_channel_error() {
    let harness = TestHarness::with_flaky_streams();
    let flaky = harness.flaky.clone().unwrap();
    harness.connect().await;

    let observer = Arc::new(CollectingObserver::new());
    let subscription = harness.coordinator.subscribe_status(observer.clone());
    assert!(observer.wait_for(WAIT, |events| !events.is_empty()).await);

    assert!(flaky.inject_error("connection reset") >= 1);
    assert!(
        observer
            .wait_for(WAIT, |events| events.len() >= 2)
            .await,
        "no snapshot after reconnect"
    );

    assert!(subscription.is_active());
    assert_eq!(subscription.stats().reconnects, 1);
    assert_eq!(flaky.open_count(), 2);
    assert_eq!(observer.dropped_count(), 0);
}

#[tokio::test]
async fn test_stream_dropped_after_reconnects_exhausted() {
    let harness = TestHarness::with_flaky_streams();
    let flaky = harness.flaky.clone().unwrap();
    harness.connect().await;

    let observer = Arc::new(CollectingObserver::new());
    let subscription = harness.coordinator.subscribe_status(observer.clone());
    assert!(observer.wait_for(WAIT, |events| !events.is_empty()).await);

    flaky.refuse_next(usize::MAX);
    flaky.inject_error("connection reset");
    assert!(
        observer
            .wait_for(WAIT, |events| events
                .iter()
                .any(|e| matches!(e, StreamEvent::Dropped { kind: StreamKind::Status, .. })))
            .await
    );

    let max_attempts = EngineConfig::testing().subscriptions.max_reconnect_attempts as usize;
    assert!(!subscription.is_active());
    assert_eq!(flaky.open_count(), 1 + max_attempts);
    assert_eq!(observer.dropped_count(), 1);

    // The caller has to subscribe again
    flaky.refuse_next(0);
    let again = harness.coordinator.subscribe_status(observer.clone());
    assert_ne!(again.id(), subscription.id());
    assert!(again.is_active());
}

#[tokio::test]
async fn test_unsubscribe_cancels_scheduled_reconnect() {
    let config = EngineConfig::testing().with_subscriptions(SubscriptionConfig {
        reconnect_delay_ms: 300,
        max_delay_ms: 1_000,
        ..SubscriptionConfig::testing()
    });
    let slot = Arc::new(std::sync::Mutex::new(None));
    let layer_slot = slot.clone();
    let coordinator = CoordinatorBuilder::new()
        .with_config(config)
        .with_transport(Arc::new(MockTransport::ideal()))
        .with_connector_layer(move |inner| {
            let flaky = Arc::new(FlakyConnector::new(inner));
            *layer_slot.lock().unwrap() = Some(flaky.clone());
            flaky as Arc<dyn StreamConnector>
        })
        .build()
        .unwrap();
    let flaky: Arc<FlakyConnector> = slot.lock().unwrap().take().unwrap();

    let observer = Arc::new(CollectingObserver::new());
    let subscription = coordinator.subscribe_status(observer.clone());
    assert!(observer.wait_for(WAIT, |events| !events.is_empty()).await);

    assert!(flaky.inject_error("connection reset") >= 1);
    let pending = &subscription;
    assert!(
        bulksend_harness::wait_until(WAIT, || async move { pending.stats().reconnects == 1 })
            .await
    );

    // Closed while the reconnect is waiting out its delay
    assert!(coordinator.unsubscribe_status());
    sleep(Duration::from_millis(450)).await;

    assert_eq!(flaky.open_count(), 1);
    assert!(!subscription.is_active());
    assert_eq!(observer.dropped_count(), 0);
    assert!(coordinator.status_subscription().is_none());
}

/// Connector whose opens wait for a permit
struct GatedConnector {
    inner: Arc<dyn StreamConnector>,
    gate: Arc<Semaphore>,
}

#[async_trait]
impl StreamConnector for GatedConnector {
    async fn open(&self, kind: StreamKind) -> DispatchResult<StreamChannel> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| DispatchError::channel_error("gate closed"))?;
        self.inner.open(kind).await
    }
}

#[tokio::test]
async fn test_unsubscribe_ignored_while_connecting() {
    let gate = Arc::new(Semaphore::new(0));
    let layer_gate = gate.clone();
    let coordinator = CoordinatorBuilder::new()
        .with_config(EngineConfig::testing())
        .with_transport(Arc::new(MockTransport::ideal()))
        .with_connector_layer(move |inner| {
            Arc::new(GatedConnector {
                inner,
                gate: layer_gate,
            }) as Arc<dyn StreamConnector>
        })
        .build()
        .unwrap();

    let observer = Arc::new(CollectingObserver::new());
    let subscription = coordinator.subscribe_progress(observer.clone());
    sleep(Duration::from_millis(20)).await;

    assert!(subscription.is_connecting());
    assert!(!coordinator.unsubscribe_progress());
    assert!(subscription.is_active());

    gate.add_permits(1);
    assert!(observer.wait_for(WAIT, |events| !events.is_empty()).await);
    assert!(!subscription.is_connecting());
    assert!(coordinator.unsubscribe_progress());
    assert!(!subscription.is_active());
}

#[tokio::test]
async fn test_poller_stops_when_job_completes() {
    let harness = TestHarness::connected().await;
    harness
        .coordinator
        .start_sending(contacts(3), DispatchSettings::new(3, 0.05, 0.0))
        .await
        .unwrap();

    let observer = Arc::new(CollectingObserver::new());
    let poller = harness.coordinator.progress_poller(observer.clone());

    let poller = &poller;
    let finished = bulksend_harness::wait_until(WAIT, || async move { poller.is_finished() }).await;
    assert!(finished);

    let last = observer.last_progress().unwrap();
    assert_eq!(last.job_status, JobStatus::Completed);
    assert_eq!(last.stats.sent, 3);
    assert!(observer.progress().len() >= 2);
}
