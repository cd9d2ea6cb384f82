//! Shared setup for coordinator integration tests

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use bulksend_harness::{wait_until, CollectingObserver, FlakyConnector, MockTransport};
use bulksend_runtime::{
    Contact, Coordinator, CoordinatorBuilder, DispatchStats, EngineConfig, JobStatus,
    SessionState, StreamConnector,
};
use tokio::time::Duration;

pub const WAIT: Duration = Duration::from_secs(3);

/// Route engine logs to the test output; repeated calls are ignored
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn contacts(count: usize) -> Vec<Contact> {
    (1..=count)
        .map(|i| {
            Contact::new(
                format!("c{}", i),
                format!("Contact {}", i),
                format!("+5511900000{:03}", i),
                format!("payslip-{}.pdf", i),
            )
        })
        .collect()
}

pub fn stats(total: usize, sent: usize, failed: usize, remaining: usize) -> DispatchStats {
    DispatchStats {
        total,
        sent,
        failed,
        remaining,
    }
}

/// Coordinator over a mock transport, with observers on the auto-opened streams
pub struct TestHarness {
    pub coordinator: Coordinator,
    pub transport: Arc<MockTransport>,
    pub status: Arc<CollectingObserver>,
    pub progress: Arc<CollectingObserver>,
    pub flaky: Option<Arc<FlakyConnector>>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_transport(MockTransport::ideal())
    }

    pub fn with_transport(transport: MockTransport) -> Self {
        Self::build(transport, false)
    }

    /// Streams go through a fault-injecting connector
    pub fn with_flaky_streams() -> Self {
        Self::build(MockTransport::ideal(), true)
    }

    fn build(transport: MockTransport, flaky_streams: bool) -> Self {
        init_tracing();
        let transport = Arc::new(transport);
        let status = Arc::new(CollectingObserver::new());
        let progress = Arc::new(CollectingObserver::new());

        let mut builder = CoordinatorBuilder::new()
            .with_config(EngineConfig::testing())
            .with_transport(transport.clone())
            .with_status_observer(status.clone())
            .with_progress_observer(progress.clone());

        let slot: Arc<Mutex<Option<Arc<FlakyConnector>>>> = Arc::new(Mutex::new(None));
        if flaky_streams {
            let slot = slot.clone();
            builder = builder.with_connector_layer(move |inner| {
                let flaky = Arc::new(FlakyConnector::new(inner));
                *slot.lock().unwrap() = Some(flaky.clone());
                flaky as Arc<dyn StreamConnector>
            });
        }

        let coordinator = builder.build().expect("valid test configuration");
        let flaky = slot.lock().unwrap().take();

        Self {
            coordinator,
            transport,
            status,
            progress,
            flaky,
        }
    }

    /// Harness with a connected session
    pub async fn connected() -> Self {
        let harness = Self::new();
        harness.connect().await;
        harness
    }

    pub async fn connect(&self) {
        self.coordinator.connect().await.expect("connect accepted");
        assert!(
            self.wait_for_session(SessionState::Connected).await,
            "session did not connect"
        );
    }

    pub async fn wait_for_job(&self, status: JobStatus) -> bool {
        let coordinator = &self.coordinator;
        wait_until(WAIT, || async move { coordinator.job_status().await == status }).await
    }

    pub async fn wait_for_session(&self, state: SessionState) -> bool {
        let coordinator = &self.coordinator;
        wait_until(WAIT, || async move { coordinator.session_state().await == state }).await
    }

    pub async fn wait_for_delivered(&self, count: usize) -> bool {
        let transport = &self.transport;
        wait_until(WAIT, || async move { transport.delivered_ids().len() >= count }).await
    }

    pub async fn job_stats(&self) -> Option<DispatchStats> {
        self.coordinator
            .job_snapshot()
            .await
            .map(|snapshot| snapshot.stats)
    }
}
