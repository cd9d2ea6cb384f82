//! Batch Scheduler
//!
//! Owns the dispatch-job state machine and the background dispatch loop:
//! - `start` creates a job and spawns its loop task
//! - `pause`/`resume`/`retry_failed` change the job status and wake the loop
//! - `cancel` discards the job; an in-flight send finishes without further effect
//!
//! The loop parks instead of exiting while the job is paused or completed, so one
//! long-lived task serves a job for its whole lifetime. The inter-contact and
//! inter-batch sleeps are its only suspension points besides the send itself, and
//! both wake immediately on any control change.

use std::sync::Arc;

use bulksend_core::{
    Contact, DispatchError, DispatchResult, DispatchSettings, JobStatus, SendOutcome,
    SessionEvent, SessionState, Transport,
};
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
    time::{Duration, Instant},
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::managers::{Attempt, DispatchJob};
use crate::state::EngineState;

// ----------------------------------------------------------------------------
// Batch Scheduler
// ----------------------------------------------------------------------------

pub struct BatchScheduler {
    state: Arc<EngineState>,
    transport: Arc<dyn Transport>,
    /// Bumped on every control change to wake the loop
    control: watch::Sender<u64>,
    runner: Mutex<Option<JoinHandle<()>>>,
}

impl BatchScheduler {
    pub fn new(state: Arc<EngineState>, transport: Arc<dyn Transport>) -> Self {
        let (control, _receiver) = watch::channel(0);
        Self {
            state,
            transport,
            control,
            runner: Mutex::new(None),
        }
    }

    /// Create a job and start dispatching
    pub async fn start(
        &self,
        contacts: Vec<Contact>,
        settings: DispatchSettings,
    ) -> DispatchResult<Uuid> {
        settings.validate_against(&self.state.config.limits)?;
        if contacts.is_empty() {
            return Err(DispatchError::EmptyContactList);
        }
        self.require_connected().await?;

        let mut slot = self.state.job.lock().await;
        if slot.as_ref().is_some_and(|job| job.status().is_active()) {
            return Err(DispatchError::JobAlreadyRunning);
        }

        let job = DispatchJob::new(contacts, settings);
        let job_id = job.id();
        let progress = job.progress();
        info!(
            "Starting job {} with {} contacts (batch size {}, pdf interval {:?}, batch interval {:?})",
            job_id,
            progress.stats.total,
            settings.batch_size,
            settings.pdf_interval(),
            settings.batch_interval()
        );
        *slot = Some(job);
        drop(slot);

        self.state.publish_job_changed(JobStatus::Processing).await;
        self.state.publish_progress(progress);
        self.spawn_loop(job_id).await;
        Ok(job_id)
    }

    /// Stop before the next send attempt; idempotent while paused
    pub async fn pause(&self) -> DispatchResult<()> {
        let mut slot = self.state.job.lock().await;
        let job = slot.as_mut().ok_or(DispatchError::NoActiveJob)?;
        if job.status() != JobStatus::Processing {
            debug!("Pause ignored in job status {}", job.status());
            return Ok(());
        }

        job.set_status(JobStatus::Paused);
        let progress = job.progress();
        info!("Job {} paused at cursor {}", job.id(), job.cursor());
        drop(slot);

        self.wake();
        self.state.publish_job_changed(JobStatus::Paused).await;
        self.state.publish_progress(progress);
        Ok(())
    }

    /// Continue a paused job from its cursor
    pub async fn resume(&self) -> DispatchResult<()> {
        let job_id = {
            let slot = self.state.job.lock().await;
            let job = slot.as_ref().ok_or(DispatchError::NoActiveJob)?;
            if job.status() != JobStatus::Paused {
                return Err(DispatchError::JobNotPaused);
            }
            job.id()
        };
        self.require_connected().await?;

        let mut slot = self.state.job.lock().await;
        let job = match slot.as_mut() {
            Some(job) if job.id() == job_id && job.status() == JobStatus::Paused => job,
            Some(_) => return Err(DispatchError::JobNotPaused),
            None => return Err(DispatchError::NoActiveJob),
        };
        job.set_status(JobStatus::Processing);
        let progress = job.progress();
        info!("Job {} resumed at cursor {}", job_id, job.cursor());
        drop(slot);

        self.state.publish_job_changed(JobStatus::Processing).await;
        self.state.publish_progress(progress);
        self.ensure_loop(job_id).await;
        Ok(())
    }

    /// Requeue failed contacts and continue processing
    ///
    /// Returns the number of contacts requeued.
    pub async fn retry_failed(&self) -> DispatchResult<usize> {
        if self.state.job.lock().await.is_none() {
            return Err(DispatchError::NoActiveJob);
        }
        self.require_connected().await?;

        let mut slot = self.state.job.lock().await;
        let job = slot.as_mut().ok_or(DispatchError::NoActiveJob)?;
        let job_id = job.id();
        let requeued = job.requeue_failed();
        // A paused job restarts even with nothing to requeue
        if requeued == 0 && job.status() != JobStatus::Paused {
            debug!("Retry requested for job {} with no failed contacts", job_id);
            return Ok(0);
        }

        job.set_status(JobStatus::Processing);
        let progress = job.progress();
        info!("Job {}: {} failed contacts requeued", job_id, requeued);
        drop(slot);

        self.state.publish_job_changed(JobStatus::Processing).await;
        self.state.publish_progress(progress);
        self.ensure_loop(job_id).await;
        Ok(requeued)
    }

    /// Discard the job, leaving an in-flight send to finish without effect
    pub async fn cancel(&self) -> bool {
        let cancelled = self.state.job.lock().await.take();
        let Some(job) = cancelled else {
            return false;
        };

        info!(
            "Job {} cancelled at cursor {} ({} sent, {} failed)",
            job.id(),
            job.cursor(),
            job.stats().sent,
            job.stats().failed
        );
        self.runner.lock().await.take();
        self.wake();
        self.state.publish_job_changed(JobStatus::Idle).await;
        true
    }

    /// Discard a job that is not processing
    pub async fn reset(&self) -> DispatchResult<()> {
        {
            let slot = self.state.job.lock().await;
            match slot.as_ref() {
                None => return Err(DispatchError::NoActiveJob),
                Some(job) if job.status() == JobStatus::Processing => {
                    return Err(DispatchError::JobAlreadyRunning)
                }
                Some(_) => {}
            }
        }
        self.cancel().await;
        Ok(())
    }

    /// Pause a processing job after the session dropped
    pub async fn pause_on_fatal(&self, reason: &str) -> bool {
        let mut slot = self.state.job.lock().await;
        let Some(job) = slot.as_mut() else {
            return false;
        };
        if job.status() != JobStatus::Processing {
            return false;
        }

        job.set_status(JobStatus::Paused);
        let progress = job.progress();
        warn!("Job {} auto-paused: {}", job.id(), reason);
        drop(slot);

        self.wake();
        self.state.publish_job_changed(JobStatus::Paused).await;
        self.state.publish_progress(progress);
        true
    }

    async fn require_connected(&self) -> DispatchResult<()> {
        if self.state.session_state().await.is_connected() {
            Ok(())
        } else {
            Err(DispatchError::SessionNotConnected)
        }
    }

    fn wake(&self) {
        self.control.send_modify(|epoch| *epoch = epoch.wrapping_add(1));
    }

    async fn spawn_loop(&self, job_id: Uuid) {
        let dispatch_loop = DispatchLoop {
            job_id,
            state: self.state.clone(),
            transport: self.transport.clone(),
            control: self.control.subscribe(),
        };

        // A loop left over from a previous job exits once woken
        *self.runner.lock().await = Some(tokio::spawn(dispatch_loop.run()));
        self.wake();
    }

    async fn ensure_loop(&self, job_id: Uuid) {
        let running = self
            .runner
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished());

        if running {
            self.wake();
        } else {
            self.spawn_loop(job_id).await;
        }
    }
}

impl Drop for BatchScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.runner.get_mut().take() {
            handle.abort();
        }
    }
}

// ----------------------------------------------------------------------------
// Dispatch Loop
// ----------------------------------------------------------------------------

enum Step {
    Send(Attempt),
    Wait,
    Stop,
}

enum AfterSend {
    Sleep(Duration),
    Continue,
    Stop,
}

struct DispatchLoop {
    job_id: Uuid,
    state: Arc<EngineState>,
    transport: Arc<dyn Transport>,
    control: watch::Receiver<u64>,
}

impl DispatchLoop {
    async fn run(mut self) {
        debug!("Dispatch loop started for job {}", self.job_id);

        loop {
            // Mark the current control epoch as seen before reading the job
            let _ = self.control.borrow_and_update();

            match self.next_step().await {
                Step::Stop => break,
                Step::Wait => {
                    if self.control.changed().await.is_err() {
                        break;
                    }
                }
                Step::Send(attempt) => {
                    let result = self.transport.send_one(&attempt.contact).await;
                    match self.record(attempt, result).await {
                        AfterSend::Sleep(delay) => self.pace(delay).await,
                        AfterSend::Continue => {}
                        AfterSend::Stop => break,
                    }
                }
            }
        }

        debug!("Dispatch loop stopped for job {}", self.job_id);
    }

    async fn next_step(&self) -> Step {
        let mut slot = self.state.job.lock().await;
        let Some(job) = slot.as_mut().filter(|job| job.id() == self.job_id) else {
            return Step::Stop;
        };
        if job.status() != JobStatus::Processing {
            return Step::Wait;
        }

        if let Some(attempt) = job.claim_next() {
            return Step::Send(attempt);
        }

        job.set_status(JobStatus::Completed);
        let progress = job.progress();
        drop(slot);

        info!(
            "Job {} completed: {} sent, {} failed of {}",
            self.job_id, progress.stats.sent, progress.stats.failed, progress.stats.total
        );
        self.state.publish_job_changed(JobStatus::Completed).await;
        self.state.publish_progress(progress);
        Step::Wait
    }

    async fn record(&self, attempt: Attempt, result: DispatchResult<SendOutcome>) -> AfterSend {
        let (outcome, fatal) = match result {
            Ok(outcome) => (outcome, None),
            Err(err) => {
                let reason = err.to_string();
                (SendOutcome::failed(format!("session dropped: {}", reason)), Some(reason))
            }
        };

        let mut slot = self.state.job.lock().await;
        let Some(job) = slot.as_mut().filter(|job| job.id() == attempt.job_id) else {
            debug!(
                "Discarding outcome for contact {} of a cancelled job",
                attempt.contact.id
            );
            return AfterSend::Stop;
        };

        if let Err(err) = job.record_outcome(attempt.index, &outcome) {
            warn!("Could not record outcome for {}: {}", attempt.contact.id, err);
        }
        match &outcome {
            SendOutcome::Delivered => debug!("Delivered to {}", attempt.contact.id),
            SendOutcome::Failed { reason } => {
                debug!("Send to {} failed: {}", attempt.contact.id, reason)
            }
        }

        if fatal.is_some() && job.status() == JobStatus::Processing {
            job.set_status(JobStatus::Paused);
        }

        let status = job.status();
        let delay = job.next_delay();
        if delay.is_some() && job.cursor() % job.settings().batch_size.max(1) == 0 {
            info!(
                "Job {}: batch finished at cursor {}, waiting {:?}",
                self.job_id,
                job.cursor(),
                job.settings().batch_interval()
            );
        }
        let progress = job.progress();
        drop(slot);

        self.state.publish_progress(progress);

        if let Some(reason) = fatal {
            error!(
                "Transport fatal error while sending to {}: {}",
                attempt.contact.id, reason
            );
            self.on_fatal(reason).await;
            return AfterSend::Continue;
        }

        match (status, delay) {
            (JobStatus::Processing, Some(delay)) => AfterSend::Sleep(delay),
            _ => AfterSend::Continue,
        }
    }

    async fn on_fatal(&self, reason: String) {
        let dropped = {
            let mut session = self.state.session.lock().await;
            if session.state() == SessionState::Disconnected {
                false
            } else {
                session.apply(SessionEvent::Fatal { reason }).is_ok()
            }
        };

        self.state.publish_job_changed(JobStatus::Paused).await;
        if dropped {
            self.state.publish_session_changed().await;
        }
    }

    /// Sleep between sends; returns early when the job stops processing
    async fn pace(&mut self, delay: Duration) {
        if delay.is_zero() {
            tokio::task::yield_now().await;
            return;
        }

        let deadline = Instant::now() + delay;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return,
                changed = self.control.changed() => {
                    if changed.is_err() || !self.still_processing().await {
                        return;
                    }
                }
            }
        }
    }

    async fn still_processing(&self) -> bool {
        self.state
            .job
            .lock()
            .await
            .as_ref()
            .is_some_and(|job| job.id() == self.job_id && job.status() == JobStatus::Processing)
    }
}
