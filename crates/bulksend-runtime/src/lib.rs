//! Bulksend Runtime Engine
//!
//! This crate contains the dispatch engine built on `bulksend-core`, including:
//! - `Coordinator`: the facade presentation layers drive
//! - `BatchScheduler`: the dispatch-job state machine and its background loop
//! - `StreamPublisher`: status/progress fan-out with reconnect and backoff
//! - `LifecyclePolicy`: opens and closes streams as session and job state change
//! - Session and job managers
//!
//! `bulksend-core` provides the stable API definitions; this crate drives them.

pub mod builder;
pub mod coordinator;
pub mod lifecycle;
pub mod managers;
pub mod poller;
pub mod publisher;
pub mod reconnect;
pub mod scheduler;
pub mod state;

pub use builder::CoordinatorBuilder;
pub use coordinator::Coordinator;
pub use lifecycle::{AutoObservers, LifecyclePolicy};
pub use managers::*;
pub use poller::ProgressPoller;
pub use publisher::{LocalStreamConnector, StreamPublisher, Subscription, SubscriptionStats};
pub use reconnect::{ReconnectManager, ReconnectPolicy};
pub use scheduler::BatchScheduler;
pub use state::{EngineState, SnapshotSource};

// Re-export core types for convenience
pub use bulksend_core::{
    channel::{ChannelError, EngineEventReceiver, EngineEventSender},
    Contact, ContactId, ContactSource, ContactStatus, DispatchError, DispatchResult,
    DispatchSettings, DispatchStats, EngineConfig, JobStatus, ProgressSnapshot, SessionState,
    StatusSnapshot, StreamConnector, StreamEvent, StreamKind, StreamObserver, Transport,
};
