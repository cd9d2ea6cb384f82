//! Event schema carried between the engine, transports and observers
//!
//! Engine components publish `EngineEvent`s on a broadcast hub. The publisher turns
//! them into `StreamEvent`s for observers of the status and progress streams.
//! Transports report asynchronous session changes as `TransportEvent`s.

use core::fmt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::progress::ProgressSnapshot;
use crate::session_state::SessionState;
use crate::types::JobStatus;

// ----------------------------------------------------------------------------
// Stream Kinds
// ----------------------------------------------------------------------------

/// The two logical observer streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Status,
    Progress,
}

impl StreamKind {
    pub fn name(&self) -> &'static str {
        match self {
            StreamKind::Status => "status",
            StreamKind::Progress => "progress",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ----------------------------------------------------------------------------
// Snapshots and Events
// ----------------------------------------------------------------------------

/// Point-in-time view of the session and job status
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub session_state: SessionState,
    /// Last connect failure or fatal transport error
    pub last_error: Option<String>,
    /// Pairing payload (QR) while the session awaits acknowledgment
    pub pairing_challenge: Option<String>,
    pub job_status: JobStatus,
}

/// Events published on the engine's internal broadcast hub
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Session state, error or pairing challenge changed
    SessionChanged(StatusSnapshot),
    /// Job status changed
    JobChanged(StatusSnapshot),
    /// A contact outcome was recorded
    Progress(ProgressSnapshot),
}

impl EngineEvent {
    /// The stream this event is forwarded on
    pub fn stream_kind(&self) -> StreamKind {
        match self {
            EngineEvent::SessionChanged(_) | EngineEvent::JobChanged(_) => StreamKind::Status,
            EngineEvent::Progress(_) => StreamKind::Progress,
        }
    }

    /// Convert into the observer-facing event
    pub fn into_stream_event(self) -> StreamEvent {
        match self {
            EngineEvent::SessionChanged(snapshot) | EngineEvent::JobChanged(snapshot) => {
                StreamEvent::Status(snapshot)
            }
            EngineEvent::Progress(progress) => StreamEvent::Progress(progress),
        }
    }
}

/// Events delivered to stream observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Status(StatusSnapshot),
    Progress(ProgressSnapshot),
    /// Reconnect attempts are exhausted; the caller must re-subscribe
    Dropped { kind: StreamKind, reason: String },
}

impl StreamEvent {
    pub fn kind(&self) -> StreamKind {
        match self {
            StreamEvent::Status(_) => StreamKind::Status,
            StreamEvent::Progress(_) => StreamKind::Progress,
            StreamEvent::Dropped { kind, .. } => *kind,
        }
    }
}

/// Asynchronous notifications raised by a transport adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A new or refreshed pairing payload
    PairingChallenge(String),
    /// Pairing confirmed; the session can send
    Ready,
    /// Pairing did not complete
    ConnectFailed { reason: String },
    /// The session dropped and cannot recover by itself
    Fatal { reason: String },
}

// ----------------------------------------------------------------------------
// Observers
// ----------------------------------------------------------------------------

/// Identifier of one observer registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(Uuid);

impl ObserverId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ObserverId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Receiver of stream events
///
/// Called from the publisher's task; implementations must not block.
pub trait StreamObserver: Send + Sync {
    fn on_event(&self, event: StreamEvent);
}

impl<F> StreamObserver for F
where
    F: Fn(StreamEvent) + Send + Sync,
{
    fn on_event(&self, event: StreamEvent) {
        self(event)
    }
}
