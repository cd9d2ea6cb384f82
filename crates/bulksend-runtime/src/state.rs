//! Shared engine state
//!
//! Session and job are owned values behind separate locks. No code path holds
//! both locks at once: readers that need both take them one after the other.

use async_trait::async_trait;
use bulksend_core::{
    channel::{broadcast_lossy, create_engine_event_channel, EngineEventReceiver, EngineEventSender},
    EngineConfig, EngineEvent, JobStatus, ProgressSnapshot, SessionState, StatusSnapshot,
};
use tokio::sync::Mutex;

use crate::managers::{DispatchJob, SessionManager};

// ----------------------------------------------------------------------------
// Snapshot Source
// ----------------------------------------------------------------------------

/// Pull access to the current status and progress
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn status_snapshot(&self) -> StatusSnapshot;
    async fn progress_snapshot(&self) -> ProgressSnapshot;
}

// ----------------------------------------------------------------------------
// Engine State
// ----------------------------------------------------------------------------

pub struct EngineState {
    pub(crate) config: EngineConfig,
    pub(crate) session: Mutex<SessionManager>,
    pub(crate) job: Mutex<Option<DispatchJob>>,
    events: EngineEventSender,
}

impl EngineState {
    pub fn new(config: EngineConfig) -> Self {
        let (events, _receiver) = create_engine_event_channel(&config.channels);
        Self {
            config,
            session: Mutex::new(SessionManager::new()),
            job: Mutex::new(None),
            events,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn subscribe_events(&self) -> EngineEventReceiver {
        self.events.subscribe()
    }

    pub fn event_sender(&self) -> EngineEventSender {
        self.events.clone()
    }

    pub async fn session_state(&self) -> SessionState {
        self.session.lock().await.state()
    }

    /// Job status; `Idle` when no job exists
    pub async fn job_status(&self) -> JobStatus {
        self.job
            .lock()
            .await
            .as_ref()
            .map(DispatchJob::status)
            .unwrap_or(JobStatus::Idle)
    }

    /// Status view for a job status the caller already holds
    pub async fn status_with(&self, job_status: JobStatus) -> StatusSnapshot {
        self.session.lock().await.status_snapshot(job_status)
    }

    /// Publish the session view after a session change
    pub async fn publish_session_changed(&self) {
        let job_status = self.job_status().await;
        let snapshot = self.status_with(job_status).await;
        broadcast_lossy(&self.events, EngineEvent::SessionChanged(snapshot));
    }

    /// Publish the status view after a job status change
    pub async fn publish_job_changed(&self, job_status: JobStatus) {
        let snapshot = self.status_with(job_status).await;
        broadcast_lossy(&self.events, EngineEvent::JobChanged(snapshot));
    }

    pub fn publish_progress(&self, progress: ProgressSnapshot) {
        broadcast_lossy(&self.events, EngineEvent::Progress(progress));
    }
}

#[async_trait]
impl SnapshotSource for EngineState {
    async fn status_snapshot(&self) -> StatusSnapshot {
        let job_status = self.job_status().await;
        self.status_with(job_status).await
    }

    async fn progress_snapshot(&self) -> ProgressSnapshot {
        self.job
            .lock()
            .await
            .as_ref()
            .map(DispatchJob::progress)
            .unwrap_or_else(ProgressSnapshot::idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulksend_core::{Contact, DispatchSettings, EngineEvent};

    #[tokio::test]
    async fn test_idle_snapshots() {
        let state = EngineState::new(EngineConfig::testing());
        let status = state.status_snapshot().await;
        assert_eq!(status.session_state, SessionState::Disconnected);
        assert_eq!(status.job_status, JobStatus::Idle);
        assert_eq!(state.progress_snapshot().await, ProgressSnapshot::idle());
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let state = EngineState::new(EngineConfig::testing());
        let mut events = state.subscribe_events();

        *state.job.lock().await = Some(DispatchJob::new(
            vec![Contact::new("c1", "Ana", "+1", "a.pdf")],
            DispatchSettings::immediate(1),
        ));
        state.publish_session_changed().await;

        match events.recv().await.unwrap() {
            EngineEvent::SessionChanged(snapshot) => {
                assert_eq!(snapshot.job_status, JobStatus::Processing);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
