//! Bulksend Harness - Testing Framework
//!
//! Test infrastructure for driving the dispatch engine without a real messaging
//! session:
//!
//! - **MockTransport**: scriptable pairing, latency, per-contact failures and
//!   fatal session drops
//! - **FlakyConnector**: wraps a stream connector to refuse opens or break
//!   channels on demand
//! - **CollectingObserver**: records stream events and waits on them
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use bulksend_harness::{CollectingObserver, MockTransport};
//! use std::sync::Arc;
//!
//! let transport = Arc::new(MockTransport::ideal());
//! transport.fail_contact("c2");
//!
//! let observer = Arc::new(CollectingObserver::new());
//! // hand `transport` to a coordinator and `observer` to a subscription
//! ```

pub mod observer;

#[cfg(feature = "testing")]
pub mod flaky_connector;

#[cfg(feature = "testing")]
pub mod mock_transport;

pub use observer::{wait_until, CollectingObserver};

#[cfg(feature = "testing")]
pub use flaky_connector::FlakyConnector;

#[cfg(feature = "testing")]
pub use mock_transport::{
    ConnectBehavior, MockTransport, MockTransportConfig, MockTransportStats, SendRecord,
};
