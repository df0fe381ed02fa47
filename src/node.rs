//! Control-unit node lifecycle
//!
//! Wires the explicit instances together: one observable manager, one
//! aggregator, one registry, one registration endpoint, all built from the
//! loaded configuration and started in dependency order. There is no global
//! state; everything flows from [`ControlUnit::new`].

use crate::aggregator::{Aggregator, DistributionSink};
use crate::config::Config;
use crate::error::ConfigError;
use crate::model::TomlModelValidator;
use crate::observables::{mqtt_transport_factory, MonitoringCallback, ObservableManager, TransportFactory};
use crate::registration::RegistrationEndpoint;
use crate::registry::ModelRegistry;
use anyhow::Context;
use log::{error, info, warn};
use std::net::SocketAddr;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

/// The assembled node
pub struct ControlUnit {
    observables: Arc<ObservableManager>,
    aggregator: Arc<Aggregator>,
    aggregator_callback: Option<MonitoringCallback>,
    registry: Arc<ModelRegistry>,
    endpoint: RegistrationEndpoint,
    shutdown_sender: Sender<()>,
    shutdown_receiver: Receiver<()>,
}

impl ControlUnit {
    /// Build a node from configuration, with MQTT transports for monitoring
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        let sink = config
            .distribution
            .as_ref()
            .map(DistributionSink::from_config)
            .transpose()?;
        Self::with_parts(config, mqtt_transport_factory(), sink)
    }

    /// Build a node from explicit parts
    ///
    /// The transport factory and distribution sink are injectable so tests
    /// can run the full pipeline against mocks.
    pub fn with_parts(
        config: Config,
        factory: TransportFactory,
        sink: Option<DistributionSink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let observables = Arc::new(ObservableManager::new(factory, config.queue.capacity));
        let aggregator = Arc::new(Aggregator::new(sink));
        let registry = Arc::new(ModelRegistry::new(
            config.models.directory.clone(),
            Arc::new(TomlModelValidator::new()),
            Arc::clone(&observables),
        ));
        let endpoint =
            RegistrationEndpoint::new(Arc::clone(&registry), config.registration.clone());
        let (shutdown_sender, shutdown_receiver) = mpsc::channel();

        Ok(Self {
            observables,
            aggregator,
            aggregator_callback: None,
            registry,
            endpoint,
            shutdown_sender,
            shutdown_receiver,
        })
    }

    /// Load configuration from file or use defaults
    ///
    /// A missing or unreadable file falls back to defaults with a warning; a
    /// file that exists but does not parse or validate is a fatal error.
    pub fn load_config(config_path: Option<&str>) -> Result<Config, ConfigError> {
        match config_path {
            Some(path) => {
                info!("loading configuration from {}", path);
                match Config::from_file(std::path::Path::new(path)) {
                    Ok(config) => Ok(config),
                    Err(ConfigError::ReadError(e)) => {
                        warn!("configuration file unreadable ({}), using defaults", e);
                        Ok(Config::default())
                    }
                    Err(e) => Err(e),
                }
            }
            None => {
                info!("using default configuration");
                Ok(Config::default())
            }
        }
    }

    /// Start the node
    ///
    /// Order: fan-out worker first, then the aggregator subscription, then
    /// preloaded models and their observables, and the registration endpoint
    /// last so no model arrives before the pipeline can carry it.
    pub fn start(&mut self) -> anyhow::Result<()> {
        self.observables.start();

        let callback = self.aggregator.monitoring_callback();
        self.observables.add_callback(Arc::clone(&callback));
        self.aggregator_callback = Some(callback);

        self.registry
            .load_from_directory()
            .context("failed to load persisted models")?;
        self.registry.start();

        self.endpoint
            .start()
            .context("failed to start registration endpoint")?;

        info!("control unit started");
        Ok(())
    }

    /// Stop the node, releasing everything in reverse start order
    pub fn stop(&mut self) {
        self.endpoint.stop();
        self.registry.stop();
        if let Some(callback) = self.aggregator_callback.take() {
            self.observables.remove_callback(&callback);
        }
        self.aggregator.tear_down();
        self.observables.stop();
        info!("control unit stopped");
    }

    /// Address of the HTTP registration listener, when that variant is active
    pub fn registration_addr(&self) -> Option<SocketAddr> {
        self.endpoint.bound_addr()
    }

    /// A sender that requests shutdown when signalled
    pub fn shutdown_sender(&self) -> Sender<()> {
        self.shutdown_sender.clone()
    }

    /// Block until a shutdown request arrives
    pub fn wait_for_shutdown(&self) {
        match self.shutdown_receiver.recv() {
            Ok(()) => info!("shutdown signal received"),
            Err(e) => error!("error waiting for shutdown: {}", e),
        }
    }
}
