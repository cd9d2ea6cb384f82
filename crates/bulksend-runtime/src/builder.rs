//! Coordinator Builder API
//!
//! Provides a builder-style API for consumers (CLI/tests) to plug in a transport,
//! optionally wrap the stream connector, and get a wired `Coordinator`.

use std::sync::Arc;

use bulksend_core::{
    DispatchError, DispatchResult, EngineConfig, StreamConnector, StreamKind, StreamObserver,
    Transport,
};
use tracing::info;

use crate::coordinator::{watch_transport_events, Coordinator};
use crate::lifecycle::{AutoObservers, LifecyclePolicy};
use crate::publisher::{LocalStreamConnector, StreamPublisher};
use crate::scheduler::BatchScheduler;
use crate::state::EngineState;

type ConnectorLayer = Box<dyn FnOnce(Arc<dyn StreamConnector>) -> Arc<dyn StreamConnector> + Send>;

// ----------------------------------------------------------------------------
// Coordinator Builder
// ----------------------------------------------------------------------------

/// Builder for a coordinator and its background tasks
pub struct CoordinatorBuilder {
    config: EngineConfig,
    transport: Option<Arc<dyn Transport>>,
    connector_layer: Option<ConnectorLayer>,
    status_observers: Vec<Arc<dyn StreamObserver>>,
    progress_observers: Vec<Arc<dyn StreamObserver>>,
}

impl Default for CoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CoordinatorBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            transport: None,
            connector_layer: None,
            status_observers: Vec::new(),
            progress_observers: Vec::new(),
        }
    }

    /// Set the engine configuration
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the transport adapter
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Wrap the local stream connector, e.g. to inject channel faults
    pub fn with_connector_layer<F>(mut self, layer: F) -> Self
    where
        F: FnOnce(Arc<dyn StreamConnector>) -> Arc<dyn StreamConnector> + Send + 'static,
    {
        self.connector_layer = Some(Box::new(layer));
        self
    }

    /// Attach an observer to status streams the lifecycle policy opens
    pub fn with_status_observer(mut self, observer: Arc<dyn StreamObserver>) -> Self {
        self.status_observers.push(observer);
        self
    }

    /// Attach an observer to progress streams the lifecycle policy opens
    pub fn with_progress_observer(mut self, observer: Arc<dyn StreamObserver>) -> Self {
        self.progress_observers.push(observer);
        self
    }

    /// Build the coordinator and start its background tasks
    ///
    /// Must be called within a tokio runtime.
    pub fn build(self) -> DispatchResult<Coordinator> {
        self.config.validate()?;
        let transport = self
            .transport
            .ok_or_else(|| DispatchError::config_error("no transport configured"))?;

        info!("Building coordinator for transport {}", transport.name());

        let state = Arc::new(EngineState::new(self.config));
        let scheduler = Arc::new(BatchScheduler::new(state.clone(), transport.clone()));

        let local: Arc<dyn StreamConnector> = Arc::new(LocalStreamConnector::new(
            state.event_sender(),
            state.clone(),
            state.config().channels.clone(),
        ));
        let connector = match self.connector_layer {
            Some(layer) => layer(local),
            None => local,
        };

        let subscriptions = state.config().subscriptions.clone();
        let status = Arc::new(StreamPublisher::new(
            StreamKind::Status,
            connector.clone(),
            subscriptions.clone(),
        ));
        let progress = Arc::new(StreamPublisher::new(
            StreamKind::Progress,
            connector,
            subscriptions,
        ));

        let auto_observers = Arc::new(AutoObservers::new());
        for observer in self.status_observers {
            auto_observers.register(StreamKind::Status, observer);
        }
        for observer in self.progress_observers {
            auto_observers.register(StreamKind::Progress, observer);
        }

        // Subscribe to both event sources before anything can publish
        let lifecycle = LifecyclePolicy::new(
            status.clone(),
            progress.clone(),
            auto_observers.clone(),
            state.clone(),
        )
        .spawn(state.subscribe_events());
        let watcher = tokio::spawn(watch_transport_events(
            state.clone(),
            scheduler.clone(),
            transport.subscribe_events(),
        ));

        info!("Coordinator started");
        Ok(Coordinator::from_parts(
            state,
            transport,
            scheduler,
            status,
            progress,
            auto_observers,
            vec![lifecycle, watcher],
        ))
    }
}
