//! Error types for the dispatch coordinator
//!
//! This module contains the error taxonomy surfaced by coordinator operations,
//! the adapter-level `TransportError`, the state machine `StateTransitionError`,
//! and the `DispatchError` type that unifies them all.

use core::fmt;

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Adapter-level transport failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Connect failed: {reason}")]
    ConnectFailed { reason: String },
    #[error("Transport session is not paired")]
    NotPaired,
    #[error("Transport session dropped: {reason}")]
    SessionDropped { reason: String },
    #[error("Transport timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },
    #[error("Transport shutdown: {reason}")]
    Shutdown { reason: String },
}

/// Rejected state machine transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateTransitionError {
    /// Invalid state transition attempted
    InvalidTransition {
        from_state: String,
        event: String,
        reason: String,
    },
}

impl fmt::Display for StateTransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateTransitionError::InvalidTransition {
                from_state,
                event,
                reason,
            } => {
                write!(
                    f,
                    "Invalid transition from {} on event {}: {}",
                    from_state, event, reason
                )
            }
        }
    }
}

impl std::error::Error for StateTransitionError {}

// ----------------------------------------------------------------------------
// Dispatch Error
// ----------------------------------------------------------------------------

/// Core error type for coordinator operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DispatchError {
    #[error("Session is not connected")]
    SessionNotConnected,

    #[error("Session is already connecting")]
    AlreadyConnecting,

    #[error("Session is already connected")]
    AlreadyConnected,

    #[error("A dispatch job is already running")]
    JobAlreadyRunning,

    #[error("No active dispatch job")]
    NoActiveJob,

    #[error("Dispatch job is not paused")]
    JobNotPaused,

    #[error("Invalid settings: {field} = {value} (allowed range {min}..={max})")]
    InvalidSettings {
        field: String,
        value: f64,
        min: f64,
        max: f64,
    },

    /// Session dropped while sending; the job is paused
    #[error("Transport fatal error: {reason}")]
    TransportFatal { reason: String },

    /// Recorded per contact, never returned from `start_sending`
    #[error("Send to contact {contact_id} failed: {reason}")]
    ContactSendFailed { contact_id: String, reason: String },

    #[error("Contact list is empty")]
    EmptyContactList,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("State transition error: {0}")]
    StateTransition(#[from] StateTransitionError),

    /// Channel communication error between engine tasks
    #[error("Channel error: {message}")]
    Channel { message: String },

    /// Configuration error
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl DispatchError {
    /// Create a settings range violation
    pub fn invalid_settings<F: Into<String>>(field: F, value: f64, min: f64, max: f64) -> Self {
        DispatchError::InvalidSettings {
            field: field.into(),
            value,
            min,
            max,
        }
    }

    /// Create a transport fatal error with a reason
    pub fn transport_fatal<T: Into<String>>(reason: T) -> Self {
        DispatchError::TransportFatal {
            reason: reason.into(),
        }
    }

    /// Create a per-contact send failure
    pub fn contact_send_failed<C: Into<String>, R: Into<String>>(contact_id: C, reason: R) -> Self {
        DispatchError::ContactSendFailed {
            contact_id: contact_id.into(),
            reason: reason.into(),
        }
    }

    /// Create a channel error with a message
    pub fn channel_error<T: Into<String>>(message: T) -> Self {
        DispatchError::Channel {
            message: message.into(),
        }
    }

    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        DispatchError::Configuration {
            reason: reason.into(),
        }
    }

    /// Precondition violations returned synchronously to the caller
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            DispatchError::SessionNotConnected
                | DispatchError::AlreadyConnecting
                | DispatchError::AlreadyConnected
                | DispatchError::JobAlreadyRunning
                | DispatchError::NoActiveJob
                | DispatchError::JobNotPaused
                | DispatchError::InvalidSettings { .. }
                | DispatchError::EmptyContactList
        )
    }

    /// Errors that end the transport session
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DispatchError::TransportFatal { .. }
                | DispatchError::Transport(TransportError::SessionDropped { .. })
                | DispatchError::Transport(TransportError::Shutdown { .. })
                | DispatchError::Transport(TransportError::NotPaired)
        )
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type DispatchResult<T> = core::result::Result<T, DispatchError>;

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(DispatchError::SessionNotConnected.is_precondition());
        assert!(DispatchError::invalid_settings("batch_size", 0.0, 1.0, 200.0).is_precondition());
        assert!(!DispatchError::transport_fatal("dropped").is_precondition());

        assert!(DispatchError::transport_fatal("dropped").is_fatal());
        assert!(DispatchError::from(TransportError::SessionDropped {
            reason: "phone offline".into()
        })
        .is_fatal());
        assert!(!DispatchError::contact_send_failed("c1", "bad number").is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = DispatchError::invalid_settings("pdf_interval", -1.0, 0.0, 30.0);
        assert_eq!(
            err.to_string(),
            "Invalid settings: pdf_interval = -1 (allowed range 0..=30)"
        );

        let err = DispatchError::from(StateTransitionError::InvalidTransition {
            from_state: "Disconnected".into(),
            event: "Acknowledged".into(),
            reason: "not connecting".into(),
        });
        assert!(err.to_string().contains("Disconnected"));
    }
}
