//! Coordinator facade
//!
//! Composes the session manager, batch scheduler and stream publishers behind the
//! operation set used by presentation layers. Holds no state of its own beyond
//! references to those components and the handles of its background tasks.

use std::sync::{Arc, Mutex};

use bulksend_core::{
    AuditEntry, Contact, ContactSource, DispatchResult, DispatchSettings, EngineConfig, JobStatus,
    ProgressSnapshot, SessionEvent, SessionState, StatusSnapshot, StreamEvent, StreamKind,
    StreamObserver, Transport, TransportEvent,
};
use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::builder::CoordinatorBuilder;
use crate::lifecycle::AutoObservers;
use crate::managers::JobSnapshot;
use crate::poller::ProgressPoller;
use crate::publisher::{StreamPublisher, Subscription};
use crate::scheduler::BatchScheduler;
use crate::state::{EngineState, SnapshotSource};

// ----------------------------------------------------------------------------
// Coordinator
// ----------------------------------------------------------------------------

pub struct Coordinator {
    state: Arc<EngineState>,
    transport: Arc<dyn Transport>,
    scheduler: Arc<BatchScheduler>,
    status: Arc<StreamPublisher>,
    progress: Arc<StreamPublisher>,
    auto_observers: Arc<AutoObservers>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Coordinator {
    pub(crate) fn from_parts(
        state: Arc<EngineState>,
        transport: Arc<dyn Transport>,
        scheduler: Arc<BatchScheduler>,
        status: Arc<StreamPublisher>,
        progress: Arc<StreamPublisher>,
        auto_observers: Arc<AutoObservers>,
        tasks: Vec<JoinHandle<()>>,
    ) -> Self {
        Self {
            state,
            transport,
            scheduler,
            status,
            progress,
            auto_observers,
            tasks: Mutex::new(tasks),
        }
    }

    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        self.state.config()
    }

    pub fn transport_name(&self) -> &str {
        self.transport.name()
    }

    // ------------------------------------------------------------------------
    // Session
    // ------------------------------------------------------------------------

    /// Begin connecting the session
    ///
    /// Returns once the transport has been asked to pair. Acknowledgment or
    /// failure arrives later on the status stream.
    pub async fn connect(&self) -> DispatchResult<()> {
        self.state.session.lock().await.begin_connect()?;
        info!("Connecting via {}", self.transport.name());
        self.state.publish_session_changed().await;

        match self.transport.connect().await {
            Ok(response) => {
                let mut session = self.state.session.lock().await;
                if let Some(challenge) = response.pairing_challenge {
                    session.set_pairing_challenge(challenge);
                }
                if response.ready {
                    if let Err(err) = session.apply(SessionEvent::Acknowledged) {
                        debug!("Connect acknowledgment ignored: {}", err);
                    }
                }
            }
            Err(err) => {
                warn!("Transport connect failed: {}", err);
                let mut session = self.state.session.lock().await;
                if let Err(transition) = session.apply(SessionEvent::ConnectFailed {
                    reason: err.to_string(),
                }) {
                    debug!("Connect failure ignored: {}", transition);
                }
            }
        }

        self.state.publish_session_changed().await;
        Ok(())
    }

    /// Tear everything down; valid from any state and never fails
    pub async fn disconnect(&self) {
        info!("Disconnecting session");
        self.scheduler.cancel().await;

        if let Err(err) = self.transport.disconnect().await {
            warn!("Transport disconnect failed: {}", err);
        }

        {
            let mut session = self.state.session.lock().await;
            if let Err(err) = session.apply(SessionEvent::Disconnect) {
                error!("Session teardown rejected: {}", err);
            }
        }

        let snapshot = self.state.status_snapshot().await;
        self.status.close_with(StreamEvent::Status(snapshot));
        self.progress.close_all();
        self.state.publish_session_changed().await;
    }

    pub async fn session_state(&self) -> SessionState {
        self.state.session_state().await
    }

    pub async fn session_audit_trail(&self) -> Vec<AuditEntry> {
        self.state.session.lock().await.audit_trail()
    }

    // ------------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------------

    pub async fn start_sending(
        &self,
        contacts: Vec<Contact>,
        settings: DispatchSettings,
    ) -> DispatchResult<Uuid> {
        self.scheduler.start(contacts, settings).await
    }

    /// Start with the configured default settings
    pub async fn start_with_defaults(&self, contacts: Vec<Contact>) -> DispatchResult<Uuid> {
        let settings = self.state.config().default_settings;
        self.start_sending(contacts, settings).await
    }

    pub async fn start_from_source(
        &self,
        source: &dyn ContactSource,
        settings: DispatchSettings,
    ) -> DispatchResult<Uuid> {
        let contacts = source.load().await?;
        self.start_sending(contacts, settings).await
    }

    pub async fn pause(&self) -> DispatchResult<()> {
        self.scheduler.pause().await
    }

    pub async fn resume(&self) -> DispatchResult<()> {
        self.scheduler.resume().await
    }

    /// Requeue failed contacts; returns how many were requeued
    pub async fn retry_failed(&self) -> DispatchResult<usize> {
        self.scheduler.retry_failed().await
    }

    /// Discard a paused or completed job
    pub async fn reset_job(&self) -> DispatchResult<()> {
        self.scheduler.reset().await
    }

    pub async fn job_status(&self) -> JobStatus {
        self.state.job_status().await
    }

    pub async fn job_snapshot(&self) -> Option<JobSnapshot> {
        self.state.job.lock().await.as_ref().map(|job| job.snapshot())
    }

    pub async fn failed_contacts(&self) -> Vec<Contact> {
        self.state
            .job
            .lock()
            .await
            .as_ref()
            .map(|job| job.failed_contacts())
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------------

    pub fn subscribe_status(&self, observer: Arc<dyn StreamObserver>) -> Subscription {
        self.status.subscribe(observer)
    }

    pub fn subscribe_progress(&self, observer: Arc<dyn StreamObserver>) -> Subscription {
        self.progress.subscribe(observer)
    }

    pub fn unsubscribe_status(&self) -> bool {
        self.status.unsubscribe()
    }

    pub fn unsubscribe_progress(&self) -> bool {
        self.progress.unsubscribe()
    }

    pub fn status_subscription(&self) -> Option<Subscription> {
        self.status.current()
    }

    pub fn progress_subscription(&self) -> Option<Subscription> {
        self.progress.current()
    }

    /// Attach an observer to every status stream opened on session connect
    pub fn register_status_observer(&self, observer: Arc<dyn StreamObserver>) {
        self.auto_observers.register(StreamKind::Status, observer);
    }

    /// Attach an observer to every progress stream opened on job start
    pub fn register_progress_observer(&self, observer: Arc<dyn StreamObserver>) {
        self.auto_observers.register(StreamKind::Progress, observer);
    }

    pub async fn get_progress_snapshot(&self) -> ProgressSnapshot {
        self.state.progress_snapshot().await
    }

    pub async fn status_snapshot(&self) -> StatusSnapshot {
        self.state.status_snapshot().await
    }

    /// Poll progress at the configured interval instead of streaming it
    pub fn progress_poller(&self, observer: Arc<dyn StreamObserver>) -> ProgressPoller {
        ProgressPoller::spawn(
            self.state.clone(),
            self.state.config().polling.interval(),
            observer,
        )
    }

    /// Disconnect and stop background tasks
    pub async fn shutdown(&self) {
        self.disconnect().await;
        self.abort_tasks();
        info!("Coordinator shut down");
    }

    fn abort_tasks(&self) {
        let tasks = match self.tasks.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for task in tasks {
            task.abort();
        }
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

// ----------------------------------------------------------------------------
// Transport Event Watcher
// ----------------------------------------------------------------------------

/// Apply asynchronous transport events to the session
pub(crate) async fn watch_transport_events(
    state: Arc<EngineState>,
    scheduler: Arc<BatchScheduler>,
    mut events: broadcast::Receiver<TransportEvent>,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!("Missed {} transport events", skipped);
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        let changed = match event {
            TransportEvent::PairingChallenge(challenge) => {
                debug!("Pairing challenge refreshed");
                state.session.lock().await.set_pairing_challenge(challenge)
            }
            TransportEvent::Ready => apply_session_event(&state, SessionEvent::Acknowledged).await,
            TransportEvent::ConnectFailed { reason } => {
                apply_session_event(&state, SessionEvent::ConnectFailed { reason }).await
            }
            TransportEvent::Fatal { reason } => {
                error!("Transport reported fatal error: {}", reason);
                scheduler.pause_on_fatal(&reason).await;
                apply_session_event(&state, SessionEvent::Fatal { reason }).await
            }
        };

        if changed {
            state.publish_session_changed().await;
        }
    }
    debug!("Transport event watcher stopped");
}

async fn apply_session_event(state: &EngineState, event: SessionEvent) -> bool {
    let name = event.name();
    match state.session.lock().await.apply(event) {
        Ok(_) => true,
        Err(err) => {
            debug!("Ignoring transport event {}: {}", name, err);
            false
        }
    }
}
