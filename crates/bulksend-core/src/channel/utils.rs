//! Channel Utilities
//!
//! Type aliases and creation helpers for the engine's tokio channels.

use core::fmt;
use tokio::sync::{broadcast, mpsc};

use crate::channel::communication::{EngineEvent, TransportEvent};
use crate::config::ChannelConfig;
use crate::errors::DispatchError;
use crate::transport::{ChannelEvent, StreamChannel};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    ChannelFull,
    ChannelClosed,
    ReceiverDropped,
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::ChannelFull => write!(f, "Channel buffer is full"),
            ChannelError::ChannelClosed => write!(f, "Channel is closed"),
            ChannelError::ReceiverDropped => write!(f, "Channel receiver was dropped"),
        }
    }
}

impl std::error::Error for ChannelError {}

impl From<ChannelError> for DispatchError {
    fn from(err: ChannelError) -> Self {
        DispatchError::channel_error(err.to_string())
    }
}

pub type EngineEventSender = broadcast::Sender<EngineEvent>;
pub type EngineEventReceiver = broadcast::Receiver<EngineEvent>;
pub type TransportEventSender = broadcast::Sender<TransportEvent>;
pub type TransportEventReceiver = broadcast::Receiver<TransportEvent>;
pub type ChannelEventSender = mpsc::Sender<ChannelEvent>;

// ----------------------------------------------------------------------------
// Channel Creation Utilities
// ----------------------------------------------------------------------------

/// Create the broadcast hub for engine events (one-to-many: engine -> listeners)
pub fn create_engine_event_channel(
    config: &ChannelConfig,
) -> (EngineEventSender, EngineEventReceiver) {
    broadcast::channel(config.engine_event_buffer)
}

/// Create the broadcast channel a transport reports its session events on
pub fn create_transport_event_channel(
    config: &ChannelConfig,
) -> (TransportEventSender, TransportEventReceiver) {
    broadcast::channel(config.transport_event_buffer)
}

/// Create one bounded stream channel (connector -> publisher)
pub fn create_stream_channel(config: &ChannelConfig) -> (ChannelEventSender, StreamChannel) {
    let (sender, receiver) = mpsc::channel(config.observer_buffer);
    (sender, StreamChannel::new(receiver))
}

/// Broadcast without treating "no receivers" as an error
///
/// Returns the number of receivers the event reached.
pub fn broadcast_lossy<T: Clone>(sender: &broadcast::Sender<T>, event: T) -> usize {
    sender.send(event).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::communication::StatusSnapshot;

    #[test]
    fn test_broadcast_without_receivers() {
        let (sender, receiver) = create_engine_event_channel(&ChannelConfig::testing());
        drop(receiver);
        let reached = broadcast_lossy(
            &sender,
            EngineEvent::SessionChanged(StatusSnapshot::default()),
        );
        assert_eq!(reached, 0);
    }

    #[test]
    fn test_channel_error_conversion() {
        let err: DispatchError = ChannelError::ChannelClosed.into();
        assert!(matches!(err, DispatchError::Channel { .. }));
    }

    #[tokio::test]
    async fn test_stream_channel_delivery() {
        let (sender, mut channel) = create_stream_channel(&ChannelConfig::testing());
        sender.send(ChannelEvent::Opened).await.unwrap();
        drop(sender);

        assert_eq!(channel.next().await, Some(ChannelEvent::Opened));
        assert_eq!(channel.next().await, None);
    }
}
