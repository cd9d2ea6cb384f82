//! Core types for the dispatch coordinator
//!
//! This module defines the fundamental domain types: contacts and their delivery
//! status, aggregate job statistics, job status, and timestamps.

use core::fmt;
use core::ops::Sub;
use serde::{Deserialize, Serialize};

use crate::errors::StateTransitionError;

// ----------------------------------------------------------------------------
// Contact Identifier
// ----------------------------------------------------------------------------

/// Identifier of a contact as supplied by the contact source
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContactId(String);

impl ContactId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random identifier for sources that carry none
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContactId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ContactId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// ----------------------------------------------------------------------------
// Contact
// ----------------------------------------------------------------------------

/// Delivery status of a single contact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactStatus {
    #[default]
    Pending,
    Processing,
    Success,
    Failed,
}

impl ContactStatus {
    pub fn name(&self) -> &'static str {
        match self {
            ContactStatus::Pending => "pending",
            ContactStatus::Processing => "processing",
            ContactStatus::Success => "success",
            ContactStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ContactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One recipient and the document to deliver to them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    pub name: String,
    pub phone: String,
    /// Opaque reference to the document, resolved by the transport
    pub document_ref: String,
    #[serde(default)]
    pub status: ContactStatus,
    /// Set only while `status == Failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Number of send attempts made for this contact
    #[serde(default)]
    pub attempts: u32,
}

impl Contact {
    /// Create a pending contact
    pub fn new(
        id: impl Into<ContactId>,
        name: impl Into<String>,
        phone: impl Into<String>,
        document_ref: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            phone: phone.into(),
            document_ref: document_ref.into(),
            status: ContactStatus::Pending,
            error_message: None,
            attempts: 0,
        }
    }

    /// Reset a contact loaded from an external source to a clean pending state
    pub fn into_pending(mut self) -> Self {
        self.status = ContactStatus::Pending;
        self.error_message = None;
        self.attempts = 0;
        self
    }

    /// pending -> processing
    pub fn begin_attempt(&mut self) -> Result<(), StateTransitionError> {
        self.expect_status(ContactStatus::Pending, "begin_attempt")?;
        self.status = ContactStatus::Processing;
        self.attempts += 1;
        Ok(())
    }

    /// processing -> success
    pub fn mark_success(&mut self) -> Result<(), StateTransitionError> {
        self.expect_status(ContactStatus::Processing, "mark_success")?;
        self.status = ContactStatus::Success;
        self.error_message = None;
        Ok(())
    }

    /// processing -> failed
    pub fn mark_failed(&mut self, reason: impl Into<String>) -> Result<(), StateTransitionError> {
        self.expect_status(ContactStatus::Processing, "mark_failed")?;
        self.status = ContactStatus::Failed;
        self.error_message = Some(reason.into());
        Ok(())
    }

    /// failed -> pending, used only by retry
    pub fn reset_for_retry(&mut self) -> Result<(), StateTransitionError> {
        self.expect_status(ContactStatus::Failed, "reset_for_retry")?;
        self.status = ContactStatus::Pending;
        self.error_message = None;
        Ok(())
    }

    pub fn is_pending(&self) -> bool {
        self.status == ContactStatus::Pending
    }

    pub fn is_failed(&self) -> bool {
        self.status == ContactStatus::Failed
    }

    fn expect_status(
        &self,
        expected: ContactStatus,
        event: &str,
    ) -> Result<(), StateTransitionError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(StateTransitionError::InvalidTransition {
                from_state: self.status.name().to_string(),
                event: event.to_string(),
                reason: format!("contact {} must be {} for {}", self.id, expected, event),
            })
        }
    }
}

// ----------------------------------------------------------------------------
// Dispatch Statistics
// ----------------------------------------------------------------------------

/// Aggregate counters for one dispatch job
///
/// `sent + failed + remaining == total` holds after every mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DispatchStats {
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
    pub remaining: usize,
}

impl DispatchStats {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            sent: 0,
            failed: 0,
            remaining: total,
        }
    }

    pub fn record_success(&mut self) {
        self.sent += 1;
        self.remaining = self.remaining.saturating_sub(1);
    }

    pub fn record_failure(&mut self) {
        self.failed += 1;
        self.remaining = self.remaining.saturating_sub(1);
    }

    /// Move `count` failures back into the remaining work
    pub fn requeue_failed(&mut self, count: usize) {
        let count = count.min(self.failed);
        self.failed -= count;
        self.remaining += count;
    }

    /// Contacts with a final outcome
    pub fn processed(&self) -> usize {
        self.sent + self.failed
    }

    pub fn is_consistent(&self) -> bool {
        self.sent + self.failed + self.remaining == self.total
    }
}

// ----------------------------------------------------------------------------
// Job Status
// ----------------------------------------------------------------------------

/// Status of the dispatch job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Idle,
    Processing,
    Paused,
    Completed,
}

impl JobStatus {
    pub fn name(&self) -> &'static str {
        match self {
            JobStatus::Idle => "idle",
            JobStatus::Processing => "processing",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
        }
    }

    /// Processing or paused: the job still owns unfinished work
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Processing | JobStatus::Paused)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Millisecond timestamp since Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Sub for Timestamp {
    type Output = u64;

    fn sub(self, other: Timestamp) -> u64 {
        self.0.saturating_sub(other.0)
    }
}

impl Timestamp {
    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as u64)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_contact(id: &str) -> Contact {
        Contact::new(id, "Ana", "+5511999990000", "docs/ana.pdf")
    }

    #[test]
    fn test_contact_happy_path() {
        let mut contact = create_test_contact("c1");
        assert!(contact.is_pending());

        contact.begin_attempt().unwrap();
        assert_eq!(contact.status, ContactStatus::Processing);
        assert_eq!(contact.attempts, 1);

        contact.mark_success().unwrap();
        assert_eq!(contact.status, ContactStatus::Success);
        assert!(contact.error_message.is_none());
    }

    #[test]
    fn test_contact_failure_and_retry() {
        let mut contact = create_test_contact("c2");
        contact.begin_attempt().unwrap();
        contact.mark_failed("number not on whatsapp").unwrap();
        assert!(contact.is_failed());
        assert_eq!(
            contact.error_message.as_deref(),
            Some("number not on whatsapp")
        );

        contact.reset_for_retry().unwrap();
        assert!(contact.is_pending());
        assert!(contact.error_message.is_none());

        contact.begin_attempt().unwrap();
        assert_eq!(contact.attempts, 2);
    }

    #[test]
    fn test_contact_rejects_invalid_transitions() {
        let mut contact = create_test_contact("c3");

        // Cannot complete without starting
        assert!(contact.mark_success().is_err());
        // Only failed contacts can be reset
        assert!(contact.reset_for_retry().is_err());

        contact.begin_attempt().unwrap();
        contact.mark_success().unwrap();
        // Success is final
        assert!(contact.begin_attempt().is_err());
        assert!(contact.reset_for_retry().is_err());
    }

    #[test]
    fn test_stats_bookkeeping() {
        let mut stats = DispatchStats::new(3);
        assert!(stats.is_consistent());

        stats.record_success();
        stats.record_failure();
        assert_eq!(stats, DispatchStats { total: 3, sent: 1, failed: 1, remaining: 1 });
        assert!(stats.is_consistent());

        stats.requeue_failed(5);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.remaining, 2);
        assert!(stats.is_consistent());
    }

    #[test]
    fn test_contact_deserializes_without_status() {
        let json = r#"{"id":"7","name":"Bo","phone":"+1555","document_ref":"bo.pdf"}"#;
        let contact: Contact = serde_json::from_str(json).unwrap();
        assert_eq!(contact.id, ContactId::new("7"));
        assert_eq!(contact.status, ContactStatus::Pending);
        assert_eq!(contact.attempts, 0);
    }

    #[test]
    fn test_job_status_activity() {
        assert!(JobStatus::Processing.is_active());
        assert!(JobStatus::Paused.is_active());
        assert!(!JobStatus::Completed.is_active());
        assert!(!JobStatus::Idle.is_active());
    }
}
