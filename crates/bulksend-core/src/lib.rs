//! Bulksend Core
//!
//! Stable API definitions for the bulk document dispatch coordinator:
//! - Domain types (`Contact`, `DispatchStats`, `JobStatus`, ...)
//! - The error taxonomy shared by every component
//! - Configuration (settings limits, channel sizes, subscription reconnect policy)
//! - The channel schema carried on status/progress streams
//! - The `Transport`, `ContactSource` and `StreamConnector` contracts
//! - The session state machine and progress math
//!
//! The engine that drives these lives in `bulksend-runtime`.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod channel;
pub mod config;
pub mod errors;
pub mod progress;
pub mod session_state;
pub mod transport;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use channel::{
    EngineEvent, ObserverId, StatusSnapshot, StreamEvent, StreamKind, StreamObserver,
    TransportEvent,
};
pub use config::{
    ChannelConfig, DispatchSettings, EngineConfig, PollingConfig, SettingsLimits,
    SubscriptionConfig,
};
pub use errors::{DispatchError, DispatchResult, StateTransitionError, TransportError};
pub use progress::ProgressSnapshot;
pub use session_state::{AuditEntry, SessionEvent, SessionState, SessionTransition};
pub use transport::{
    ChannelEvent, ConnectResponse, ContactSource, SendOutcome, StreamChannel, StreamConnector,
    Transport, VecContactSource,
};
pub use types::{Contact, ContactId, ContactStatus, DispatchStats, JobStatus, Timestamp};
