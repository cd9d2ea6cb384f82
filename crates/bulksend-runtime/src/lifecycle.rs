//! Stream lifecycle policy
//!
//! Listens to engine events and opens or closes streams for registered observers:
//! - the status stream opens when the session connects and closes when it drops
//! - the progress stream opens when a job starts processing or is paused, and is
//!   left open after the job completes; only a session drop closes it
//!
//! Neither state machine knows about streams; this listener is the only coupling.

use std::sync::{Arc, RwLock};

use bulksend_core::{
    channel::EngineEventReceiver, EngineEvent, JobStatus, SessionState, StatusSnapshot,
    StreamEvent, StreamKind, StreamObserver,
};
use tokio::{sync::broadcast::error::RecvError, task::JoinHandle};
use tracing::{debug, info};

use crate::publisher::StreamPublisher;
use crate::state::SnapshotSource;

// ----------------------------------------------------------------------------
// Auto Observers
// ----------------------------------------------------------------------------

/// Observers attached automatically whenever the policy opens a stream
#[derive(Default)]
pub struct AutoObservers {
    status: RwLock<Vec<Arc<dyn StreamObserver>>>,
    progress: RwLock<Vec<Arc<dyn StreamObserver>>>,
}

impl AutoObservers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, kind: StreamKind, observer: Arc<dyn StreamObserver>) {
        let list = self.list(kind);
        let mut observers = match list.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !observers.iter().any(|existing| Arc::ptr_eq(existing, &observer)) {
            observers.push(observer);
        }
    }

    pub fn observers(&self, kind: StreamKind) -> Vec<Arc<dyn StreamObserver>> {
        match self.list(kind).read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn count(&self, kind: StreamKind) -> usize {
        self.observers(kind).len()
    }

    fn list(&self, kind: StreamKind) -> &RwLock<Vec<Arc<dyn StreamObserver>>> {
        match kind {
            StreamKind::Status => &self.status,
            StreamKind::Progress => &self.progress,
        }
    }
}

// ----------------------------------------------------------------------------
// Lifecycle Policy
// ----------------------------------------------------------------------------

pub struct LifecyclePolicy {
    status: Arc<StreamPublisher>,
    progress: Arc<StreamPublisher>,
    observers: Arc<AutoObservers>,
    snapshots: Arc<dyn SnapshotSource>,
}

impl LifecyclePolicy {
    pub fn new(
        status: Arc<StreamPublisher>,
        progress: Arc<StreamPublisher>,
        observers: Arc<AutoObservers>,
        snapshots: Arc<dyn SnapshotSource>,
    ) -> Self {
        Self {
            status,
            progress,
            observers,
            snapshots,
        }
    }

    /// Run the policy on its own task until the event hub closes
    pub fn spawn(self, events: EngineEventReceiver) -> JoinHandle<()> {
        tokio::spawn(self.run(events))
    }

    async fn run(self, mut events: EngineEventReceiver) {
        debug!("Stream lifecycle policy started");
        loop {
            match events.recv().await {
                Ok(event) => self.handle(event),
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Lifecycle policy lagged by {} events, re-reading state", skipped);
                    let snapshot = self.snapshots.status_snapshot().await;
                    self.on_session(&snapshot);
                    self.on_job(snapshot.job_status);
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("Stream lifecycle policy stopped");
    }

    fn handle(&self, event: EngineEvent) {
        match event {
            EngineEvent::SessionChanged(snapshot) => self.on_session(&snapshot),
            EngineEvent::JobChanged(snapshot) => self.on_job(snapshot.job_status),
            EngineEvent::Progress(_) => {}
        }
    }

    fn on_session(&self, snapshot: &StatusSnapshot) {
        match snapshot.session_state {
            SessionState::Connected => self.open(StreamKind::Status),
            SessionState::Disconnected => {
                let closed_status = self
                    .status
                    .close_with(StreamEvent::Status(snapshot.clone()));
                let closed_progress = self.progress.close_all();
                if closed_status || closed_progress {
                    info!("Session down, streams closed");
                }
            }
            SessionState::Connecting => {}
        }
    }

    fn on_job(&self, job_status: JobStatus) {
        if job_status.is_active() {
            self.open(StreamKind::Progress);
        }
    }

    fn open(&self, kind: StreamKind) {
        let publisher = match kind {
            StreamKind::Status => &self.status,
            StreamKind::Progress => &self.progress,
        };
        for observer in self.observers.observers(kind) {
            publisher.subscribe(observer);
        }
    }
}
