//! Session State Machine
//!
//! Connection lifecycle of the single transport session:
//!
//! ```text
//! Disconnected --Connect--> Connecting --Acknowledged--> Connected
//! Connecting --ConnectFailed | Disconnect | Fatal--> Disconnected
//! Connected --Disconnect | Fatal--> Disconnected
//! ```
//!
//! Every accepted transition yields an `AuditEntry`.

use core::fmt;
use serde::{Deserialize, Serialize};

use crate::errors::StateTransitionError;
use crate::types::Timestamp;

// ----------------------------------------------------------------------------
// State and Events
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "Disconnected",
            SessionState::Connecting => "Connecting",
            SessionState::Connected => "Connected",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Events that drive the session state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Connect,
    Acknowledged,
    ConnectFailed { reason: String },
    Disconnect,
    Fatal { reason: String },
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Connect => "Connect",
            SessionEvent::Acknowledged => "Acknowledged",
            SessionEvent::ConnectFailed { .. } => "ConnectFailed",
            SessionEvent::Disconnect => "Disconnect",
            SessionEvent::Fatal { .. } => "Fatal",
        }
    }

    /// Error detail carried by the event, if any
    pub fn error(&self) -> Option<&str> {
        match self {
            SessionEvent::ConnectFailed { reason } | SessionEvent::Fatal { reason } => {
                Some(reason.as_str())
            }
            _ => None,
        }
    }
}

/// Accepted transition with its audit record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTransition {
    pub from: SessionState,
    pub to: SessionState,
    pub audit_entry: AuditEntry,
}

/// Audit record of one session transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: Timestamp,
    pub from_state: String,
    pub to_state: String,
    pub event: String,
    pub detail: Option<String>,
}

// ----------------------------------------------------------------------------
// State Machine Implementation
// ----------------------------------------------------------------------------

impl SessionState {
    /// Apply an event, rejecting transitions the lifecycle does not allow
    pub fn transition(self, event: &SessionEvent) -> Result<SessionTransition, StateTransitionError> {
        use SessionEvent as E;
        use SessionState as S;

        let to = match (self, event) {
            (S::Disconnected, E::Connect) => S::Connecting,
            (S::Connecting, E::Acknowledged) => S::Connected,
            (S::Connecting, E::ConnectFailed { .. }) => S::Disconnected,
            (S::Connecting | S::Connected, E::Fatal { .. }) => S::Disconnected,
            // Disconnect is valid from any state
            (_, E::Disconnect) => S::Disconnected,
            (from, event) => {
                return Err(StateTransitionError::InvalidTransition {
                    from_state: from.name().to_string(),
                    event: event.name().to_string(),
                    reason: format!("Event {} not valid for state {}", event.name(), from),
                });
            }
        };

        Ok(SessionTransition {
            from: self,
            to,
            audit_entry: AuditEntry {
                timestamp: Timestamp::now(),
                from_state: self.name().to_string(),
                to_state: to.name().to_string(),
                event: event.name().to_string(),
                detail: event.error().map(str::to_string),
            },
        })
    }
}
