//! Polling fallback for progress
//!
//! For environments where push streams are unavailable. Pulls a progress
//! snapshot on an interval and stops by itself once the job is completed or
//! gone, unlike the progress stream.

use std::sync::Arc;

use bulksend_core::{StreamEvent, StreamObserver};
use tokio::{
    task::JoinHandle,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::debug;

use crate::state::SnapshotSource;

pub struct ProgressPoller {
    handle: JoinHandle<()>,
}

impl ProgressPoller {
    pub fn spawn(
        source: Arc<dyn SnapshotSource>,
        period: Duration,
        observer: Arc<dyn StreamObserver>,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let snapshot = source.progress_snapshot().await;
                let settled = snapshot.is_settled();
                observer.on_event(StreamEvent::Progress(snapshot));
                if settled {
                    debug!("Progress poller stopping: job settled");
                    break;
                }
            }
        });

        Self { handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for ProgressPoller {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managers::DispatchJob;
    use crate::state::EngineState;
    use bulksend_core::{
        Contact, DispatchSettings, EngineConfig, JobStatus, ProgressSnapshot,
    };
    use std::sync::Mutex;
    use tokio::time::sleep;

    fn collecting() -> (Arc<dyn StreamObserver>, Arc<Mutex<Vec<ProgressSnapshot>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let observer: Arc<dyn StreamObserver> = Arc::new(move |event: StreamEvent| {
            if let StreamEvent::Progress(snapshot) = event {
                sink.lock().unwrap().push(snapshot);
            }
        });
        (observer, seen)
    }

    #[tokio::test]
    async fn test_stops_when_idle() {
        let state = Arc::new(EngineState::new(EngineConfig::testing()));
        let (observer, seen) = collecting();

        let poller = ProgressPoller::spawn(state, Duration::from_millis(5), observer);
        sleep(Duration::from_millis(50)).await;

        assert!(poller.is_finished());
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_polls_until_completed() {
        let state = Arc::new(EngineState::new(EngineConfig::testing()));
        *state.job.lock().await = Some(DispatchJob::new(
            vec![Contact::new("c1", "Ana", "+1", "a.pdf")],
            DispatchSettings::immediate(1),
        ));
        let (observer, seen) = collecting();

        let poller = ProgressPoller::spawn(state.clone(), Duration::from_millis(5), observer);
        sleep(Duration::from_millis(40)).await;
        assert!(!poller.is_finished());

        if let Some(job) = state.job.lock().await.as_mut() {
            job.set_status(JobStatus::Completed);
        }
        sleep(Duration::from_millis(40)).await;

        assert!(poller.is_finished());
        let seen = seen.lock().unwrap();
        assert!(seen.len() >= 2);
        assert_eq!(seen.last().map(|p| p.job_status), Some(JobStatus::Completed));
    }
}
