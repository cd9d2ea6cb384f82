//! Dispatch job bookkeeping for the runtime
//!
//! This module contains the stateful DispatchJob that tracks per-contact outcomes,
//! aggregate stats and the cursor over the attempt order. The dispatch loop is its
//! only writer apart from the scheduler's control operations.

use serde::Serialize;
use tokio::time::Duration;
use uuid::Uuid;

use bulksend_core::{
    Contact, DispatchResult, DispatchSettings, DispatchStats, JobStatus, ProgressSnapshot,
    SendOutcome, Timestamp,
};
use tracing::debug;

// ----------------------------------------------------------------------------
// Attempt
// ----------------------------------------------------------------------------

/// A contact claimed by the dispatch loop for one send
#[derive(Debug, Clone)]
pub struct Attempt {
    pub job_id: Uuid,
    /// Index into the job's contact list
    pub index: usize,
    pub contact: Contact,
}

// ----------------------------------------------------------------------------
// Dispatch Job
// ----------------------------------------------------------------------------

/// One run of sending a contact list
///
/// Contacts keep their list position for the lifetime of the job. The attempt
/// order starts as the list order; retries append the indices of failed contacts,
/// so the cursor never moves backward.
#[derive(Debug, Clone)]
pub struct DispatchJob {
    id: Uuid,
    contacts: Vec<Contact>,
    order: Vec<usize>,
    cursor: usize,
    in_flight: Option<usize>,
    settings: DispatchSettings,
    status: JobStatus,
    stats: DispatchStats,
    started_at: Timestamp,
}

impl DispatchJob {
    /// Create a processing job; contacts are reset to pending
    pub fn new(contacts: Vec<Contact>, settings: DispatchSettings) -> Self {
        let contacts: Vec<Contact> = contacts.into_iter().map(Contact::into_pending).collect();
        let order = (0..contacts.len()).collect();
        let stats = DispatchStats::new(contacts.len());

        Self {
            id: Uuid::new_v4(),
            contacts,
            order,
            cursor: 0,
            in_flight: None,
            settings,
            status: JobStatus::Processing,
            stats,
            started_at: Timestamp::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn set_status(&mut self, status: JobStatus) {
        self.status = status;
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    pub fn is_sending(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Entries of the attempt order not yet consumed
    pub fn has_more(&self) -> bool {
        self.cursor < self.order.len()
    }

    /// Claim the next pending contact, skipping entries that are no longer pending
    pub fn claim_next(&mut self) -> Option<Attempt> {
        while self.cursor < self.order.len() {
            let index = self.order[self.cursor];
            self.cursor += 1;

            let contact = &mut self.contacts[index];
            if contact.begin_attempt().is_ok() {
                self.in_flight = Some(index);
                return Some(Attempt {
                    job_id: self.id,
                    index,
                    contact: contact.clone(),
                });
            }
            debug!("Skipping contact {} ({})", contact.id, contact.status);
        }
        None
    }

    /// Record the outcome of a claimed contact
    pub fn record_outcome(&mut self, index: usize, outcome: &SendOutcome) -> DispatchResult<()> {
        if self.in_flight == Some(index) {
            self.in_flight = None;
        }

        let contact = &mut self.contacts[index];
        match outcome {
            SendOutcome::Delivered => {
                contact.mark_success()?;
                self.stats.record_success();
            }
            SendOutcome::Failed { reason } => {
                contact.mark_failed(reason.clone())?;
                self.stats.record_failure();
            }
        }
        Ok(())
    }

    /// Pause to apply before the next contact, `None` when nothing is left
    pub fn next_delay(&self) -> Option<Duration> {
        if !self.has_more() {
            return None;
        }
        if self.cursor % self.settings.batch_size.max(1) == 0 {
            Some(self.settings.batch_interval())
        } else {
            Some(self.settings.pdf_interval())
        }
    }

    /// Reset failed contacts to pending and queue them behind the remaining work
    ///
    /// Returns the number of contacts requeued.
    pub fn requeue_failed(&mut self) -> usize {
        let mut requeued = 0;
        for (index, contact) in self.contacts.iter_mut().enumerate() {
            if contact.is_failed() && contact.reset_for_retry().is_ok() {
                self.order.push(index);
                requeued += 1;
            }
        }
        self.stats.requeue_failed(requeued);
        requeued
    }

    /// List position of the next contact to finish
    ///
    /// The in-flight contact while a send runs, otherwise the next entry of the
    /// attempt order, or the list length once the order is exhausted.
    fn position(&self) -> usize {
        match self.in_flight {
            Some(index) => index,
            None => self
                .order
                .get(self.cursor)
                .copied()
                .unwrap_or(self.contacts.len()),
        }
    }

    /// Progress derived from stats and the list position
    pub fn progress(&self) -> ProgressSnapshot {
        ProgressSnapshot::compute(
            &self.stats,
            self.position(),
            self.settings.batch_size,
            self.status,
        )
    }

    pub fn failed_contacts(&self) -> Vec<Contact> {
        self.contacts
            .iter()
            .filter(|c| c.is_failed())
            .cloned()
            .collect()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            status: self.status,
            cursor: self.cursor,
            scheduled: self.order.len(),
            settings: self.settings,
            stats: self.stats,
            contacts: self.contacts.clone(),
            started_at: self.started_at,
        }
    }
}

// ----------------------------------------------------------------------------
// Job Snapshot
// ----------------------------------------------------------------------------

/// Full copy of a job for review screens
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub id: Uuid,
    pub status: JobStatus,
    pub cursor: usize,
    /// Length of the attempt order, including retries
    pub scheduled: usize,
    pub settings: DispatchSettings,
    pub stats: DispatchStats,
    pub contacts: Vec<Contact>,
    pub started_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulksend_core::ContactStatus;

    fn create_test_job(count: usize, batch_size: usize) -> DispatchJob {
        let contacts = (1..=count)
            .map(|i| Contact::new(format!("c{}", i), format!("Contact {}", i), "+1", "doc.pdf"))
            .collect();
        DispatchJob::new(contacts, DispatchSettings::new(batch_size, 1.0, 5.0))
    }

    fn run_attempt(job: &mut DispatchJob, outcome: SendOutcome) -> Attempt {
        let attempt = job.claim_next().expect("pending contact");
        job.record_outcome(attempt.index, &outcome).unwrap();
        attempt
    }

    #[test]
    fn test_claims_in_list_order() {
        let mut job = create_test_job(3, 2);
        let first = job.claim_next().unwrap();
        assert_eq!(first.contact.id.as_str(), "c1");
        assert!(job.is_sending());
        assert_eq!(job.contacts()[0].status, ContactStatus::Processing);

        job.record_outcome(first.index, &SendOutcome::Delivered).unwrap();
        assert!(!job.is_sending());
        assert_eq!(job.cursor(), 1);
        assert_eq!(job.stats().sent, 1);
    }

    #[test]
    fn test_batch_boundary_delays() {
        let mut job = create_test_job(5, 2);

        run_attempt(&mut job, SendOutcome::Delivered);
        assert_eq!(job.next_delay(), Some(Duration::from_secs(1)));

        run_attempt(&mut job, SendOutcome::Delivered);
        assert_eq!(job.next_delay(), Some(Duration::from_secs(5)));

        for _ in 0..3 {
            run_attempt(&mut job, SendOutcome::Delivered);
        }
        assert_eq!(job.next_delay(), None);
        assert!(job.claim_next().is_none());
    }

    #[test]
    fn test_requeue_failed_appends_in_original_order() {
        let mut job = create_test_job(4, 10);
        run_attempt(&mut job, SendOutcome::failed("x"));
        run_attempt(&mut job, SendOutcome::Delivered);
        run_attempt(&mut job, SendOutcome::failed("y"));
        run_attempt(&mut job, SendOutcome::Delivered);

        assert_eq!(job.failed_contacts().len(), 2);
        assert_eq!(job.stats(), DispatchStats { total: 4, sent: 2, failed: 2, remaining: 0 });

        let cursor_before = job.cursor();
        assert_eq!(job.requeue_failed(), 2);
        assert_eq!(job.cursor(), cursor_before);
        assert_eq!(job.stats(), DispatchStats { total: 4, sent: 2, failed: 0, remaining: 2 });

        assert_eq!(run_attempt(&mut job, SendOutcome::Delivered).contact.id.as_str(), "c1");
        assert_eq!(run_attempt(&mut job, SendOutcome::Delivered).contact.id.as_str(), "c3");
        assert_eq!(job.stats().sent, 4);
        assert_eq!(job.contacts()[0].attempts, 2);
        assert!(job.stats().is_consistent());
    }

    #[test]
    fn test_progress_excludes_in_flight_contact() {
        let mut job = create_test_job(4, 2);
        run_attempt(&mut job, SendOutcome::Delivered);
        let _in_flight = job.claim_next().unwrap();

        let progress = job.progress();
        assert_eq!(progress.current_batch, 1);
        assert_eq!(progress.batch_progress, 50.0);
        assert_eq!(progress.overall_progress, 25.0);
    }

    #[test]
    fn test_progress_after_retry_keeps_list_batches() {
        let mut job = create_test_job(4, 2);
        run_attempt(&mut job, SendOutcome::failed("busy"));
        for _ in 0..3 {
            run_attempt(&mut job, SendOutcome::Delivered);
        }
        assert_eq!(job.progress().total_batches, 2);

        assert_eq!(job.requeue_failed(), 1);
        let progress = job.progress();
        assert_eq!(progress.total_batches, 2);
        assert_eq!(progress.current_batch, 1);
        assert_eq!(progress.overall_progress, 75.0);

        run_attempt(&mut job, SendOutcome::Delivered);
        let progress = job.progress();
        assert_eq!(progress.total_batches, 2);
        assert_eq!(progress.current_batch, 2);
        assert_eq!(progress.batch_progress, 100.0);
        assert_eq!(progress.overall_progress, 100.0);
    }

    #[test]
    fn test_new_job_resets_contacts() {
        let mut contact = Contact::new("c1", "Ana", "+1", "a.pdf");
        contact.begin_attempt().unwrap();
        contact.mark_failed("old").unwrap();

        let job = DispatchJob::new(vec![contact], DispatchSettings::immediate(1));
        assert_eq!(job.contacts()[0].status, ContactStatus::Pending);
        assert_eq!(job.contacts()[0].attempts, 0);
        assert_eq!(job.status(), JobStatus::Processing);
    }
}
