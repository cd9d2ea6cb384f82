//! Mock Transport for Testing
//!
//! Provides a scriptable transport for driving the engine without a real
//! messaging session. Supports pairing flows, send latency, random and scripted
//! per-contact failures, and fatal session drops.

use async_trait::async_trait;
use bulksend_core::{
    Contact, ConnectResponse, DispatchError, DispatchResult, SendOutcome, Transport,
    TransportError, TransportEvent,
};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
};
use tokio::{
    sync::broadcast,
    time::{sleep, Duration},
};
use tracing::{debug, info, warn};

// ----------------------------------------------------------------------------
// Mock Transport Configuration
// ----------------------------------------------------------------------------

/// How the mock answers `connect`
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectBehavior {
    /// Connected as soon as `connect` returns
    Immediate,
    /// Return a pairing challenge, then report ready after a delay
    PairThenAck { challenge: String, ack_after: Duration },
    /// Return a pairing challenge and wait for `acknowledge()`
    Manual { challenge: String },
    /// Fail the connect call
    Refuse { reason: String },
}

/// Configuration for mock transport behavior
#[derive(Debug, Clone)]
pub struct MockTransportConfig {
    /// Simulated send latency range (min, max) in milliseconds
    pub latency_range: (u64, u64),
    /// Random per-contact failure rate (0.0 = never, 1.0 = always)
    pub failure_rate: f64,
    pub connect: ConnectBehavior,
    /// Capacity of the transport event channel
    pub event_buffer: usize,
}

impl Default for MockTransportConfig {
    fn default() -> Self {
        Self {
            latency_range: (1, 5),
            failure_rate: 0.0,
            connect: ConnectBehavior::Immediate,
            event_buffer: 64,
        }
    }
}

impl MockTransportConfig {
    /// Instant, always-successful sends
    pub fn ideal() -> Self {
        Self {
            latency_range: (0, 0),
            ..Self::default()
        }
    }

    /// Some sends fail at random
    pub fn lossy() -> Self {
        Self {
            latency_range: (2, 10),
            failure_rate: 0.2,
            ..Self::default()
        }
    }

    /// QR-style pairing acknowledged shortly after connect
    pub fn pairing() -> Self {
        Self {
            connect: ConnectBehavior::PairThenAck {
                challenge: "pairing-challenge".to_string(),
                ack_after: Duration::from_millis(20),
            },
            ..Self::ideal()
        }
    }

    /// Sends take a fixed time
    pub fn with_latency(mut self, millis: u64) -> Self {
        self.latency_range = (millis, millis);
        self
    }

    pub fn with_connect(mut self, connect: ConnectBehavior) -> Self {
        self.connect = connect;
        self
    }
}

// ----------------------------------------------------------------------------
// Mock Transport
// ----------------------------------------------------------------------------

/// One `send_one` call as seen by the mock
#[derive(Debug, Clone, PartialEq)]
pub struct SendRecord {
    pub contact_id: String,
    pub delivered: bool,
}

#[derive(Debug, Default)]
pub struct MockTransportStats {
    pub sends_attempted: AtomicU64,
    pub sends_delivered: AtomicU64,
    pub sends_failed: AtomicU64,
    pub connects: AtomicU64,
    pub disconnects: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
enum Script {
    FailAlways,
    FailTimes(u32),
    Fatal,
}

pub struct MockTransport {
    config: MockTransportConfig,
    events: broadcast::Sender<TransportEvent>,
    connected: Arc<AtomicBool>,
    scripts: Mutex<HashMap<String, Script>>,
    records: Mutex<Vec<SendRecord>>,
    stats: MockTransportStats,
}

impl MockTransport {
    /// Create a new mock transport
    pub fn new(config: MockTransportConfig) -> Self {
        let (events, _receiver) = broadcast::channel(config.event_buffer.max(1));
        Self {
            config,
            events,
            connected: Arc::new(AtomicBool::new(false)),
            scripts: Mutex::new(HashMap::new()),
            records: Mutex::new(Vec::new()),
            stats: MockTransportStats::default(),
        }
    }

    pub fn ideal() -> Self {
        Self::new(MockTransportConfig::ideal())
    }

    pub fn lossy() -> Self {
        Self::new(MockTransportConfig::lossy())
    }

    pub fn pairing() -> Self {
        Self::new(MockTransportConfig::pairing())
    }

    // ------------------------------------------------------------------------
    // Scripting
    // ------------------------------------------------------------------------

    /// Every send to this contact fails
    pub fn fail_contact(&self, contact_id: impl Into<String>) {
        self.script(contact_id.into(), Script::FailAlways);
    }

    /// The next `times` sends to this contact fail
    pub fn fail_contact_times(&self, contact_id: impl Into<String>, times: u32) {
        self.script(contact_id.into(), Script::FailTimes(times));
    }

    /// The next send to this contact drops the session
    pub fn fatal_on(&self, contact_id: impl Into<String>) {
        self.script(contact_id.into(), Script::Fatal);
    }

    pub fn clear_scripts(&self) {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.clear();
        }
    }

    fn script(&self, contact_id: String, script: Script) {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.insert(contact_id, script);
        }
    }

    /// Consume the script for a contact, if any
    fn take_script(&self, contact_id: &str) -> Option<Script> {
        let mut scripts = self.scripts.lock().ok()?;
        let script = scripts.get(contact_id).copied()?;
        match script {
            Script::FailAlways => {}
            Script::FailTimes(n) if n > 1 => {
                scripts.insert(contact_id.to_string(), Script::FailTimes(n - 1));
            }
            Script::FailTimes(_) | Script::Fatal => {
                scripts.remove(contact_id);
            }
        }
        Some(script)
    }

    // ------------------------------------------------------------------------
    // Session Control
    // ------------------------------------------------------------------------

    /// Confirm pairing, as the remote device would
    pub fn acknowledge(&self) {
        self.connected.store(true, Ordering::SeqCst);
        self.emit(TransportEvent::Ready);
    }

    /// Simulate the remote side dropping the session
    pub fn drop_session(&self, reason: impl Into<String>) {
        self.connected.store(false, Ordering::SeqCst);
        self.stats.disconnects.fetch_add(1, Ordering::Relaxed);
        self.emit(TransportEvent::Fatal {
            reason: reason.into(),
        });
    }

    /// Emit an arbitrary transport event
    pub fn emit(&self, event: TransportEvent) {
        if self.events.send(event).is_err() {
            debug!("Mock transport event had no receivers");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------------

    pub fn records(&self) -> Vec<SendRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Contact ids in the order they were attempted
    pub fn attempted_ids(&self) -> Vec<String> {
        self.records().into_iter().map(|r| r.contact_id).collect()
    }

    pub fn delivered_ids(&self) -> Vec<String> {
        self.records()
            .into_iter()
            .filter(|r| r.delivered)
            .map(|r| r.contact_id)
            .collect()
    }

    pub fn attempts_for(&self, contact_id: &str) -> usize {
        self.records()
            .iter()
            .filter(|r| r.contact_id == contact_id)
            .count()
    }

    pub fn stats(&self) -> &MockTransportStats {
        &self.stats
    }

    pub fn sends_attempted(&self) -> u64 {
        self.stats.sends_attempted.load(Ordering::Relaxed)
    }

    fn record(&self, contact: &Contact, delivered: bool) {
        if let Ok(mut records) = self.records.lock() {
            records.push(SendRecord {
                contact_id: contact.id.to_string(),
                delivered,
            });
        }
        let counter = if delivered {
            &self.stats.sends_delivered
        } else {
            &self.stats.sends_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    async fn simulate_latency(&self) {
        let (min, max) = self.config.latency_range;
        let millis = if max > min {
            fastrand::u64(min..=max)
        } else {
            min
        };
        if millis > 0 {
            sleep(Duration::from_millis(millis)).await;
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> DispatchResult<ConnectResponse> {
        self.stats.connects.fetch_add(1, Ordering::Relaxed);

        match &self.config.connect {
            ConnectBehavior::Immediate => {
                self.connected.store(true, Ordering::SeqCst);
                info!("Mock transport connected");
                Ok(ConnectResponse::ready())
            }
            ConnectBehavior::PairThenAck {
                challenge,
                ack_after,
            } => {
                let events = self.events.clone();
                let connected = self.connected.clone();
                let ack_after = *ack_after;
                tokio::spawn(async move {
                    sleep(ack_after).await;
                    connected.store(true, Ordering::SeqCst);
                    let _ = events.send(TransportEvent::Ready);
                });
                Ok(ConnectResponse::pairing(challenge.clone()))
            }
            ConnectBehavior::Manual { challenge } => Ok(ConnectResponse::pairing(challenge.clone())),
            ConnectBehavior::Refuse { reason } => {
                warn!("Mock transport refusing connect: {}", reason);
                Err(TransportError::ConnectFailed {
                    reason: reason.clone(),
                }
                .into())
            }
        }
    }

    async fn send_one(&self, contact: &Contact) -> DispatchResult<SendOutcome> {
        if !self.is_connected() {
            return Err(TransportError::NotPaired.into());
        }
        self.stats.sends_attempted.fetch_add(1, Ordering::Relaxed);
        self.simulate_latency().await;

        match self.take_script(contact.id.as_str()) {
            Some(Script::Fatal) => {
                self.connected.store(false, Ordering::SeqCst);
                self.record(contact, false);
                return Err(DispatchError::transport_fatal("session closed by remote"));
            }
            Some(Script::FailAlways) | Some(Script::FailTimes(_)) => {
                self.record(contact, false);
                return Ok(SendOutcome::failed("recipient rejected document"));
            }
            None => {}
        }

        if self.config.failure_rate > 0.0 && fastrand::f64() < self.config.failure_rate {
            self.record(contact, false);
            return Ok(SendOutcome::failed("simulated delivery failure"));
        }

        self.record(contact, true);
        Ok(SendOutcome::Delivered)
    }

    async fn disconnect(&self) -> DispatchResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.stats.disconnects.fetch_add(1, Ordering::Relaxed);
        debug!("Mock transport disconnected");
        Ok(())
    }

    fn subscribe_events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    fn name(&self) -> &str {
        "mock"
    }
}
