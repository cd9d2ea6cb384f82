//! Dry-run transport
//!
//! Logs each delivery instead of sending it. Used by `bulksend send` to rehearse
//! a contact list and its pacing before pointing it at a real session.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Mutex,
};

use async_trait::async_trait;
use tokio::{sync::broadcast, time::Duration};
use tracing::{debug, info};

use bulksend_core::{
    Contact, ConnectResponse, DispatchResult, SendOutcome, Transport, TransportError,
    TransportEvent,
};

use crate::config::DryRunConfig;

pub struct DryRunTransport {
    config: DryRunConfig,
    rng: Mutex<fastrand::Rng>,
    connected: AtomicBool,
    delivered: AtomicU64,
    failed: AtomicU64,
    events: broadcast::Sender<TransportEvent>,
}

impl DryRunTransport {
    pub fn new(config: DryRunConfig) -> Self {
        Self::with_rng(config, fastrand::Rng::new())
    }

    /// Deterministic failures for a given seed
    pub fn with_seed(config: DryRunConfig, seed: u64) -> Self {
        Self::with_rng(config, fastrand::Rng::with_seed(seed))
    }

    fn with_rng(config: DryRunConfig, rng: fastrand::Rng) -> Self {
        let (events, _receiver) = broadcast::channel(16);
        Self {
            config,
            rng: Mutex::new(rng),
            connected: AtomicBool::new(false),
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            events,
        }
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    fn roll_failure(&self) -> bool {
        if self.config.failure_rate <= 0.0 {
            return false;
        }
        match self.rng.lock() {
            Ok(mut rng) => rng.f64() < self.config.failure_rate,
            Err(poisoned) => poisoned.into_inner().f64() < self.config.failure_rate,
        }
    }
}

#[async_trait]
impl Transport for DryRunTransport {
    async fn connect(&self) -> DispatchResult<ConnectResponse> {
        self.connected.store(true, Ordering::SeqCst);
        info!("Dry-run session ready");
        Ok(ConnectResponse::ready())
    }

    async fn send_one(&self, contact: &Contact) -> DispatchResult<SendOutcome> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotPaired.into());
        }
        if self.config.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.latency_ms)).await;
        }

        if self.roll_failure() {
            self.failed.fetch_add(1, Ordering::Relaxed);
            debug!("Dry run: {} ({}) failed", contact.name, contact.phone);
            return Ok(SendOutcome::failed("simulated delivery failure"));
        }

        self.delivered.fetch_add(1, Ordering::Relaxed);
        info!(
            "Dry run: {} -> {} ({})",
            contact.document_ref, contact.name, contact.phone
        );
        Ok(SendOutcome::Delivered)
    }

    async fn disconnect(&self) -> DispatchResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn subscribe_events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    fn name(&self) -> &str {
        "dry-run"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(failure_rate: f64) -> DryRunConfig {
        DryRunConfig {
            failure_rate,
            latency_ms: 0,
        }
    }

    #[tokio::test]
    async fn test_send_before_connect_is_fatal() {
        let transport = DryRunTransport::new(config(0.0));
        let contact = Contact::new("c1", "Ana", "+1", "a.pdf");
        let result = transport.send_one(&contact).await;
        assert!(result.unwrap_err().is_fatal());
    }

    #[tokio::test]
    async fn test_failure_rate_extremes() {
        let contact = Contact::new("c1", "Ana", "+1", "a.pdf");

        let always = DryRunTransport::with_seed(config(1.0), 7);
        always.connect().await.unwrap();
        for _ in 0..5 {
            assert!(!always.send_one(&contact).await.unwrap().is_delivered());
        }
        assert_eq!(always.failed(), 5);

        let never = DryRunTransport::with_seed(config(0.0), 7);
        never.connect().await.unwrap();
        for _ in 0..5 {
            assert!(never.send_one(&contact).await.unwrap().is_delivered());
        }
        assert_eq!(never.delivered(), 5);
    }
}
