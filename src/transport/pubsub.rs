//! Bidirectional pub/sub transport
//!
//! [`PubSubTransport`] is the capability the registry, observable manager and
//! aggregator program against; [`MqttTransport`] is the concrete realization
//! over rumqttc. Keeping the trait protocol-agnostic lets deployments pick a
//! different transport without touching registry or aggregation logic.

use crate::channel::ChannelId;
use crate::error::NetworkError;
use log::{debug, error, info, warn};
use rumqttc::{Client, Connection, Event, Incoming, MqttOptions, Outgoing};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Delivery assurance level for subscribe and publish operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
    /// Fire and forget
    AtMostOnce,
    /// Delivered at least once, duplicates possible
    AtLeastOnce,
    /// Delivered exactly once
    ExactlyOnce,
}

impl QoS {
    fn to_mqtt(self) -> rumqttc::QoS {
        match self {
            QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

/// Callback invoked with `(topic, payload)` for every received message
pub type PayloadHandler = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// A bidirectional pub/sub connection over one concrete protocol
///
/// Synchronous failures (connect, subscribe, publish, close) are reported as
/// [`NetworkError`]. Connection loss *after* a successful subscribe is not
/// surfaced to the caller; the transport reconnects on its own with bounded
/// backoff and delivers later messages to the subscribed handler.
pub trait PubSubTransport: Send {
    /// Open the connection
    fn connect(&mut self) -> Result<(), NetworkError>;

    /// Close the connection; a no-op when not connected
    fn disconnect(&mut self) -> Result<(), NetworkError>;

    /// Subscribe `handler` to `topic`
    ///
    /// On an already-connected client this disconnects first, then reconnects
    /// and re-subscribes, so repeated subscription is idempotent.
    fn subscribe(
        &mut self,
        topic: &str,
        qos: QoS,
        handler: PayloadHandler,
    ) -> Result<(), NetworkError>;

    /// Publish one payload synchronously
    ///
    /// Connects before sending and disconnects after, regardless of the
    /// publish outcome, so the caller observes one atomic-looking sequence
    /// and no connection is leaked on failure.
    fn publish(&mut self, topic: &str, qos: QoS, payload: &str) -> Result<(), NetworkError>;

    /// Disconnect if needed and release all resources; repeated calls are no-ops
    fn close(&mut self) -> Result<(), NetworkError>;

    /// Whether the transport currently holds an open connection
    fn is_connected(&self) -> bool;
}

/// Reconnect backoff bounds for the MQTT event loop
const BACKOFF_INITIAL: Duration = Duration::from_secs(2);
const BACKOFF_CEILING: Duration = Duration::from_secs(120);

/// Subscription the event loop restores after every reconnect
struct ActiveSubscription {
    topic: String,
    qos: QoS,
}

/// Live connection state: the request handle plus the event-loop worker
struct LiveConnection {
    client: Client,
    active: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

/// MQTT realization of [`PubSubTransport`] built on rumqttc
///
/// The client identifier is validated as a [`ChannelId`] before any
/// connection attempt. Incoming messages are dispatched from a dedicated
/// event-loop thread; on connection loss that thread retries with backoff
/// starting at 2s and capped at 2min, re-subscribing once the broker accepts
/// the session again.
pub struct MqttTransport {
    client_id: ChannelId,
    host: String,
    port: u16,
    live: Option<LiveConnection>,
    subscription: Arc<Mutex<Option<ActiveSubscription>>>,
    handler: Arc<Mutex<Option<PayloadHandler>>>,
    closed: bool,
}

impl MqttTransport {
    /// Create a transport scoped to one broker
    ///
    /// # Errors
    ///
    /// Returns `NetworkError::InvalidIdentity` when `client_id` violates the
    /// identity rules; nothing is connected in that case.
    pub fn new(client_id: &str, host: &str, port: u16) -> Result<Self, NetworkError> {
        let client_id = ChannelId::new(client_id)?;
        Ok(Self {
            client_id,
            host: host.to_string(),
            port,
            live: None,
            subscription: Arc::new(Mutex::new(None)),
            handler: Arc::new(Mutex::new(None)),
            closed: false,
        })
    }

    /// Event loop: dispatch publishes, restore the subscription after every
    /// reconnect, back off between failed connection attempts.
    ///
    /// Requests handed to the [`Client`] are only written to the socket by
    /// this loop, so it must keep iterating until the outgoing DISCONNECT
    /// has been flushed; exiting earlier would drop queued publishes. The
    /// `active` flag is the backstop for a broken connection, where the
    /// DISCONNECT can never reach the wire.
    fn run_event_loop(
        mut connection: Connection,
        client: Client,
        active: Arc<AtomicBool>,
        subscription: Arc<Mutex<Option<ActiveSubscription>>>,
        handler: Arc<Mutex<Option<PayloadHandler>>>,
    ) {
        let mut backoff = BACKOFF_INITIAL;
        for event in connection.iter() {
            match event {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    debug!("broker accepted session");
                    backoff = BACKOFF_INITIAL;
                    let guard = subscription.lock().unwrap();
                    if let Some(ref sub) = *guard {
                        if let Err(e) = client.subscribe(&sub.topic, sub.qos.to_mqtt()) {
                            error!("re-subscription to '{}' failed: {}", sub.topic, e);
                        }
                    }
                }
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    let payload = String::from_utf8_lossy(&publish.payload).to_string();
                    let current = handler.lock().unwrap().clone();
                    if let Some(h) = current {
                        h(&publish.topic, &payload);
                    }
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    debug!("disconnect written, leaving event loop");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    if !active.load(Ordering::SeqCst) {
                        break;
                    }
                    warn!("connection lost ({}), retrying in {:?}", e, backoff);
                    // Sleep in short slices so disconnect() is not kept
                    // waiting for a full backoff period.
                    let mut remaining = backoff;
                    while remaining > Duration::ZERO && active.load(Ordering::SeqCst) {
                        let slice = remaining.min(Duration::from_millis(250));
                        std::thread::sleep(slice);
                        remaining = remaining.saturating_sub(slice);
                    }
                    backoff = (backoff * 2).min(BACKOFF_CEILING);
                }
            }
        }
        debug!("event loop finished");
    }
}

impl PubSubTransport for MqttTransport {
    fn connect(&mut self) -> Result<(), NetworkError> {
        if self.closed {
            return Err(NetworkError::Closed);
        }
        if self.live.is_some() {
            return Ok(());
        }

        let mut options = MqttOptions::new(self.client_id.as_str(), &self.host, self.port);
        options.set_keep_alive(Duration::from_secs(30));

        let (client, connection) = Client::new(options, 64);
        let active = Arc::new(AtomicBool::new(true));

        let worker = {
            let client = client.clone();
            let active = Arc::clone(&active);
            let subscription = Arc::clone(&self.subscription);
            let handler = Arc::clone(&self.handler);
            std::thread::spawn(move || {
                Self::run_event_loop(connection, client, active, subscription, handler);
            })
        };

        self.live = Some(LiveConnection {
            client,
            active,
            worker: Some(worker),
        });
        info!(
            "mqtt client '{}' connecting to {}:{}",
            self.client_id, self.host, self.port
        );
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), NetworkError> {
        let Some(mut live) = self.live.take() else {
            return Ok(());
        };
        live.active.store(false, Ordering::SeqCst);
        let result = live
            .client
            .disconnect()
            .map_err(|e| NetworkError::DisconnectFailed(e.to_string()));
        if let Some(worker) = live.worker.take() {
            if worker.join().is_err() {
                warn!("event loop thread panicked");
            }
        }
        debug!("mqtt client '{}' disconnected", self.client_id);
        result
    }

    fn subscribe(
        &mut self,
        topic: &str,
        qos: QoS,
        handler: PayloadHandler,
    ) -> Result<(), NetworkError> {
        if self.closed {
            return Err(NetworkError::Closed);
        }
        // Idempotent re-subscription: tear the session down first
        if self.live.is_some() {
            self.disconnect()?;
        }

        *self.handler.lock().unwrap() = Some(handler);
        *self.subscription.lock().unwrap() = Some(ActiveSubscription {
            topic: topic.to_string(),
            qos,
        });

        self.connect()?;
        let live = self.live.as_ref().expect("connected above");
        live.client
            .subscribe(topic, qos.to_mqtt())
            .map_err(|e| NetworkError::SubscribeFailed(e.to_string()))?;
        info!("subscribed '{}' to '{}'", self.client_id, topic);
        Ok(())
    }

    fn publish(&mut self, topic: &str, qos: QoS, payload: &str) -> Result<(), NetworkError> {
        if self.closed {
            return Err(NetworkError::Closed);
        }
        self.connect()?;

        let publish_result = {
            let live = self.live.as_ref().expect("connected above");
            live.client
                .publish(topic, qos.to_mqtt(), false, payload.as_bytes())
                .map_err(|e| NetworkError::PublishFailed(e.to_string()))
        };

        // Disconnect even when the publish failed to avoid leaking an open
        // connection.
        let disconnect_result = self.disconnect();
        publish_result.and(disconnect_result)
    }

    fn close(&mut self) -> Result<(), NetworkError> {
        if self.closed {
            return Ok(());
        }
        let result = self.disconnect();
        *self.subscription.lock().unwrap() = None;
        *self.handler.lock().unwrap() = None;
        self.closed = true;
        debug!("mqtt client '{}' closed", self.client_id);
        result
    }

    fn is_connected(&self) -> bool {
        self.live.is_some()
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// In-memory pub/sub transport for tests and dry runs
///
/// Records every subscribe and publish, can be told to fail either
/// operation, and lets a test inject incoming payloads into the subscribed
/// handler. All clones share the same recorded state.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    connected: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

#[derive(Default)]
struct MockState {
    subscriptions: Vec<String>,
    publishes: Vec<(String, QoS, String)>,
    handler: Option<PayloadHandler>,
    fail_subscribe: bool,
    fail_publish: bool,
}

impl MockTransport {
    /// A transport where every operation succeeds
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport whose `subscribe` always fails
    pub fn failing_subscribe() -> Self {
        let mock = Self::default();
        mock.state.lock().unwrap().fail_subscribe = true;
        mock
    }

    /// A transport whose `publish` always fails
    pub fn failing_publish() -> Self {
        let mock = Self::default();
        mock.state.lock().unwrap().fail_publish = true;
        mock
    }

    /// Topics subscribed so far
    pub fn subscriptions(&self) -> Vec<String> {
        self.state.lock().unwrap().subscriptions.clone()
    }

    /// Payloads published so far as `(topic, qos, payload)`
    pub fn publishes(&self) -> Vec<(String, QoS, String)> {
        self.state.lock().unwrap().publishes.clone()
    }

    /// Deliver an incoming payload to the subscribed handler, if any
    pub fn inject(&self, topic: &str, payload: &str) {
        let handler = self.state.lock().unwrap().handler.clone();
        if let Some(h) = handler {
            h(topic, payload);
        }
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl PubSubTransport for MockTransport {
    fn connect(&mut self) -> Result<(), NetworkError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), NetworkError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn subscribe(
        &mut self,
        topic: &str,
        _qos: QoS,
        handler: PayloadHandler,
    ) -> Result<(), NetworkError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_subscribe {
            return Err(NetworkError::SubscribeFailed(format!(
                "mock failure for '{}'",
                topic
            )));
        }
        state.subscriptions.push(topic.to_string());
        state.handler = Some(handler);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn publish(&mut self, topic: &str, qos: QoS, payload: &str) -> Result<(), NetworkError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_publish {
            return Err(NetworkError::PublishFailed(format!(
                "mock failure for '{}'",
                topic
            )));
        }
        state
            .publishes
            .push((topic.to_string(), qos, payload.to_string()));
        Ok(())
    }

    fn close(&mut self) -> Result<(), NetworkError> {
        self.connected.store(false, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
