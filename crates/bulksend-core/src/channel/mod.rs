//! Channel Module
//!
//! This module contains the event schema and channel plumbing shared by the engine:
//! - `communication`: stream kinds, snapshots, engine/transport/stream events, observers
//! - `utils`: channel aliases, creation helpers and channel errors

pub mod communication;
pub mod utils;

// Re-export communication types
pub use communication::{
    EngineEvent, ObserverId, StatusSnapshot, StreamEvent, StreamKind, StreamObserver,
    TransportEvent,
};

// Re-export ChannelConfig from config module
pub use crate::config::ChannelConfig;

// Re-export utility types
pub use utils::{
    broadcast_lossy, create_engine_event_channel, create_stream_channel,
    create_transport_event_channel, ChannelError, ChannelEventSender, EngineEventReceiver,
    EngineEventSender, TransportEventReceiver, TransportEventSender,
};
