//! Boundary contracts with external collaborators
//!
//! - `Transport`: the messaging adapter (pairing, per-contact send, disconnect)
//! - `ContactSource`: where a contact list comes from
//! - `StreamConnector`: opens the channel behind a status or progress stream

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

use crate::channel::communication::{StreamEvent, StreamKind, TransportEvent};
use crate::errors::{DispatchError, DispatchResult};
use crate::types::Contact;

// ----------------------------------------------------------------------------
// Transport
// ----------------------------------------------------------------------------

/// Result of beginning a transport session
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConnectResponse {
    /// Pairing payload to present to the user (e.g. QR code contents)
    pub pairing_challenge: Option<String>,
    /// The adapter restored an already-paired session
    pub ready: bool,
}

impl ConnectResponse {
    pub fn pairing(challenge: impl Into<String>) -> Self {
        Self {
            pairing_challenge: Some(challenge.into()),
            ready: false,
        }
    }

    pub fn ready() -> Self {
        Self {
            pairing_challenge: None,
            ready: true,
        }
    }
}

/// Per-contact delivery outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    Failed { reason: String },
}

impl SendOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        SendOutcome::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, SendOutcome::Delivered)
    }
}

/// Messaging adapter consumed by the engine
///
/// `send_one` reports per-contact failures as `Ok(SendOutcome::Failed)`; an `Err`
/// means the session itself is gone and the job must pause.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Begin pairing; acknowledgment arrives later as `TransportEvent::Ready`
    async fn connect(&self) -> DispatchResult<ConnectResponse>;

    /// Deliver the contact's document
    async fn send_one(&self, contact: &Contact) -> DispatchResult<SendOutcome>;

    /// Tear down the session
    async fn disconnect(&self) -> DispatchResult<()>;

    /// Subscribe to asynchronous session events
    fn subscribe_events(&self) -> broadcast::Receiver<TransportEvent>;

    /// Adapter name for logging
    fn name(&self) -> &str {
        "transport"
    }
}

// ----------------------------------------------------------------------------
// Contact Source
// ----------------------------------------------------------------------------

/// Supplies the contact list for a job
#[async_trait]
pub trait ContactSource: Send + Sync {
    async fn load(&self) -> DispatchResult<Vec<Contact>>;
}

/// In-memory contact source
#[derive(Debug, Clone, Default)]
pub struct VecContactSource {
    contacts: Vec<Contact>,
}

impl VecContactSource {
    pub fn new(contacts: Vec<Contact>) -> Self {
        Self { contacts }
    }
}

#[async_trait]
impl ContactSource for VecContactSource {
    async fn load(&self) -> DispatchResult<Vec<Contact>> {
        Ok(self.contacts.clone())
    }
}

// ----------------------------------------------------------------------------
// Stream Connector
// ----------------------------------------------------------------------------

/// Events on one opened stream channel
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// The channel confirmed it is open
    Opened,
    Event(StreamEvent),
    /// The channel failed; the publisher may reconnect
    Error { reason: String },
}

/// Receiving half of an opened stream channel
#[derive(Debug)]
pub struct StreamChannel {
    receiver: mpsc::Receiver<ChannelEvent>,
}

impl StreamChannel {
    pub fn new(receiver: mpsc::Receiver<ChannelEvent>) -> Self {
        Self { receiver }
    }

    /// Next event; `None` once the sending side is gone
    pub async fn next(&mut self) -> Option<ChannelEvent> {
        self.receiver.recv().await
    }

    /// Stop accepting events
    pub fn close(&mut self) {
        self.receiver.close();
    }
}

/// Opens the transport-level channel behind a stream
#[async_trait]
pub trait StreamConnector: Send + Sync {
    async fn open(&self, kind: StreamKind) -> DispatchResult<StreamChannel>;
}

/// Map a closed channel into the error taxonomy
pub fn channel_closed(kind: StreamKind) -> DispatchError {
    DispatchError::channel_error(format!("{} channel closed", kind))
}
