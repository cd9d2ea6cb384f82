//! Session manager for the dispatch runtime
//!
//! This module contains the stateful SessionManager that owns the single transport
//! session: its lifecycle state, last error, pending pairing challenge and audit trail.

use std::collections::VecDeque;

use bulksend_core::{
    AuditEntry, DispatchError, DispatchResult, JobStatus, SessionEvent, SessionState,
    SessionTransition, StateTransitionError, StatusSnapshot,
};
use tracing::{debug, info, warn};

/// Number of audit entries retained
pub const AUDIT_TRAIL_CAPACITY: usize = 100;

// ----------------------------------------------------------------------------
// Session Manager
// ----------------------------------------------------------------------------

/// Owns the connection lifecycle of the transport session
#[derive(Debug, Default)]
pub struct SessionManager {
    state: SessionState,
    last_error: Option<String>,
    pairing_challenge: Option<String>,
    audit_trail: VecDeque<AuditEntry>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn pairing_challenge(&self) -> Option<&str> {
        self.pairing_challenge.as_deref()
    }

    /// Move to `Connecting`, or report why a connect cannot start
    pub fn begin_connect(&mut self) -> DispatchResult<SessionTransition> {
        match self.state {
            SessionState::Connecting => Err(DispatchError::AlreadyConnecting),
            SessionState::Connected => Err(DispatchError::AlreadyConnected),
            SessionState::Disconnected => Ok(self.apply(SessionEvent::Connect)?),
        }
    }

    /// Apply an event to the state machine and record it
    pub fn apply(&mut self, event: SessionEvent) -> Result<SessionTransition, StateTransitionError> {
        let transition = self.state.transition(&event)?;

        match &event {
            SessionEvent::Connect => {
                self.last_error = None;
                self.pairing_challenge = None;
            }
            SessionEvent::ConnectFailed { reason } | SessionEvent::Fatal { reason } => {
                warn!("Session {} -> {}: {}", transition.from, transition.to, reason);
                self.last_error = Some(reason.clone());
            }
            SessionEvent::Acknowledged | SessionEvent::Disconnect => {}
        }

        if transition.to != SessionState::Connecting {
            self.pairing_challenge = None;
        }

        info!("Session {} -> {} ({})", transition.from, transition.to, event.name());
        self.state = transition.to;
        self.record(transition.audit_entry.clone());
        Ok(transition)
    }

    /// Store a pairing challenge; ignored unless the session awaits acknowledgment
    pub fn set_pairing_challenge(&mut self, challenge: impl Into<String>) -> bool {
        if self.state != SessionState::Connecting {
            debug!("Ignoring pairing challenge in state {}", self.state);
            return false;
        }
        self.pairing_challenge = Some(challenge.into());
        true
    }

    /// Most recent transitions, oldest first
    pub fn audit_trail(&self) -> Vec<AuditEntry> {
        self.audit_trail.iter().cloned().collect()
    }

    /// Status view combined with the current job status
    pub fn status_snapshot(&self, job_status: JobStatus) -> StatusSnapshot {
        StatusSnapshot {
            session_state: self.state,
            last_error: self.last_error.clone(),
            pairing_challenge: self.pairing_challenge.clone(),
            job_status,
        }
    }

    fn record(&mut self, entry: AuditEntry) {
        if self.audit_trail.len() == AUDIT_TRAIL_CAPACITY {
            self.audit_trail.pop_front();
        }
        self.audit_trail.push_back(entry);
    }
}
