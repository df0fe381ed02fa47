//! Dynamic observable-connection management
//!
//! Owns the mapping from monitoring channel to live pub/sub subscription and
//! fans received payloads out to registered consumers. Reception is
//! decoupled from consumption through a bounded queue drained by a single
//! propagator worker: a slow consumer can delay delivery but can no longer
//! block the network-reception threads, and one queue with one worker keeps
//! per-channel arrival order intact.

use crate::error::NetworkError;
use crate::queue::{ElementCallback, GenericQueue, Propagator};
use crate::transport::{PayloadHandler, PubSubTransport, QoS};
use log::{error, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// One received telemetry payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoringSample {
    /// Channel the payload arrived on
    pub channel: String,
    /// Raw payload text
    pub payload: String,
}

/// Consumer of received payloads, invoked with `(channel, payload)`
pub type MonitoringCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Builds an entity-scoped pub/sub transport from `(client_id, host, port)`
pub type TransportFactory =
    Arc<dyn Fn(&str, &str, u16) -> Result<Box<dyn PubSubTransport>, NetworkError> + Send + Sync>;

/// Default factory producing MQTT transports
pub fn mqtt_transport_factory() -> TransportFactory {
    Arc::new(|client_id, host, port| {
        crate::transport::MqttTransport::new(client_id, host, port)
            .map(|t| Box::new(t) as Box<dyn PubSubTransport>)
    })
}

/// Manager of per-entity monitoring subscriptions
///
/// Invariant: at most one active connection per channel. A single bad
/// observable never crashes the node; network errors during setup are
/// logged and surfaced as a boolean failure.
pub struct ObservableManager {
    connections: Mutex<HashMap<String, Box<dyn PubSubTransport>>>,
    callbacks: Arc<Mutex<Vec<MonitoringCallback>>>,
    queue: Arc<GenericQueue<MonitoringSample>>,
    propagator: Mutex<Propagator<MonitoringSample>>,
    factory: TransportFactory,
}

impl ObservableManager {
    /// Create a manager with the given transport factory and queue capacity
    pub fn new(factory: TransportFactory, queue_capacity: usize) -> Self {
        let queue = Arc::new(GenericQueue::new(queue_capacity));
        let propagator = Propagator::new(Arc::clone(&queue));

        let callbacks: Arc<Mutex<Vec<MonitoringCallback>>> = Arc::new(Mutex::new(Vec::new()));
        // Single propagator callback dispatching to the manager's consumer
        // list in registration order.
        let fan_out: ElementCallback<MonitoringSample> = {
            let callbacks = Arc::clone(&callbacks);
            Arc::new(move |sample: &MonitoringSample| {
                let snapshot: Vec<MonitoringCallback> =
                    callbacks.lock().unwrap().iter().cloned().collect();
                for callback in snapshot {
                    callback(&sample.channel, &sample.payload);
                }
            })
        };
        propagator.add_callback(fan_out);

        Self {
            connections: Mutex::new(HashMap::new()),
            callbacks,
            queue,
            propagator: Mutex::new(propagator),
            factory,
        }
    }

    /// Open the fan-out queue and start the propagator worker
    pub fn start(&self) {
        self.propagator.lock().unwrap().start();
        info!("observable manager started");
    }

    /// Close every connection, then stop the propagator after the queue drains
    pub fn stop(&self) {
        let mut connections = self.connections.lock().unwrap();
        for (channel, mut transport) in connections.drain() {
            if let Err(e) = transport.close() {
                warn!("failed to close observable for '{}': {}", channel, e);
            }
        }
        drop(connections);

        self.propagator.lock().unwrap().stop();
        info!("observable manager stopped");
    }

    /// Open a monitoring subscription for one entity
    ///
    /// Returns `false` without side effects when the channel is already
    /// observed, and `false` after logging when transport construction or
    /// subscription fails. Returns `true` only when the subscription is
    /// live and the mapping is stored.
    pub fn add_observable(&self, identifier: &str, channel: &str, host: &str, port: u16) -> bool {
        let mut connections = self.connections.lock().unwrap();
        if connections.contains_key(channel) {
            warn!(
                "channel '{}' already observed, ignoring observable for '{}'",
                channel, identifier
            );
            return false;
        }

        let mut transport = match (self.factory)(identifier, host, port) {
            Ok(transport) => transport,
            Err(e) => {
                error!(
                    "failed to create transport for '{}' ({}:{}): {}",
                    identifier, host, port, e
                );
                return false;
            }
        };

        let handler: PayloadHandler = {
            let queue = Arc::clone(&self.queue);
            Arc::new(move |topic: &str, payload: &str| {
                let accepted = queue.add_element(MonitoringSample {
                    channel: topic.to_string(),
                    payload: payload.to_string(),
                });
                if !accepted {
                    warn!("monitoring queue rejected payload from '{}'", topic);
                }
            })
        };

        if let Err(e) = transport.subscribe(channel, QoS::AtLeastOnce, handler) {
            error!(
                "failed to subscribe '{}' to '{}' ({}:{}): {}",
                identifier, channel, host, port, e
            );
            return false;
        }

        info!("observing '{}' for entity '{}'", channel, identifier);
        connections.insert(channel.to_string(), transport);
        true
    }

    /// Close and remove the subscription for a channel
    ///
    /// Returns `false` when the channel is unknown or closing fails.
    pub fn remove_observable(&self, channel: &str) -> bool {
        let mut connections = self.connections.lock().unwrap();
        let Some(mut transport) = connections.remove(channel) else {
            warn!("no observable for channel '{}'", channel);
            return false;
        };
        drop(connections);

        match transport.close() {
            Ok(()) => {
                info!("stopped observing '{}'", channel);
                true
            }
            Err(e) => {
                error!("failed to close observable for '{}': {}", channel, e);
                false
            }
        }
    }

    /// Register a fan-out consumer
    ///
    /// Duplicates (by pointer identity) are rejected with `false`; no
    /// error is raised.
    pub fn add_callback(&self, callback: MonitoringCallback) -> bool {
        let mut callbacks = self.callbacks.lock().unwrap();
        if callbacks.iter().any(|c| Arc::ptr_eq(c, &callback)) {
            warn!("monitoring callback already registered");
            return false;
        }
        callbacks.push(callback);
        true
    }

    /// Remove a fan-out consumer; unknown callbacks are a no-op
    pub fn remove_callback(&self, callback: &MonitoringCallback) -> bool {
        let mut callbacks = self.callbacks.lock().unwrap();
        let before = callbacks.len();
        callbacks.retain(|c| !Arc::ptr_eq(c, callback));
        callbacks.len() < before
    }

    /// Number of active observables
    pub fn observable_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    /// Whether a channel currently has an active subscription
    pub fn is_observed(&self, channel: &str) -> bool {
        self.connections.lock().unwrap().contains_key(channel)
    }
}
