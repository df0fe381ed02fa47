//! Registration endpoint: where raw entity models arrive
//!
//! Depending on configuration the endpoint is either an MQTT subscription on
//! the registration channel or an HTTP server accepting POSTs on the
//! registration path. Either way the raw body is handed to the registry and
//! the outcome is logged; the HTTP acknowledgement is deliberately a plain
//! "received" regardless of outcome, so a sender cannot distinguish a
//! rejected model from an accepted one over the wire.

use crate::config::{Protocol, RegistrationConfig};
use crate::error::NetworkError;
use crate::registry::ModelRegistry;
use crate::transport::{MqttTransport, PayloadHandler, PubSubTransport, QoS};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use log::{error, info, warn};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use tokio::sync::oneshot;

enum ActiveEndpoint {
    Mqtt(MqttTransport),
    Http {
        shutdown: oneshot::Sender<()>,
        worker: thread::JoinHandle<()>,
        bound_addr: SocketAddr,
    },
}

/// Inbound endpoint receiving raw model text for the registry
pub struct RegistrationEndpoint {
    registry: Arc<ModelRegistry>,
    config: RegistrationConfig,
    active: Option<ActiveEndpoint>,
}

impl RegistrationEndpoint {
    pub fn new(registry: Arc<ModelRegistry>, config: RegistrationConfig) -> Self {
        Self {
            registry,
            config,
            active: None,
        }
    }

    /// Start receiving registrations
    ///
    /// Binds the HTTP listener (or opens the MQTT subscription) before
    /// returning, so an unusable endpoint fails startup instead of
    /// surfacing later as silently dropped registrations.
    ///
    /// # Errors
    ///
    /// `NetworkError::ConnectFailed` when the listener cannot bind,
    /// `NetworkError::SubscribeFailed` when the MQTT subscription fails.
    pub fn start(&mut self) -> Result<(), NetworkError> {
        let protocol = self
            .config
            .protocol
            .parse::<Protocol>()
            .map_err(|e| NetworkError::ConnectFailed(e.to_string()))?;

        let endpoint = match protocol {
            Protocol::Mqtt => self.start_mqtt()?,
            Protocol::Http => self.start_http()?,
        };
        self.active = Some(endpoint);
        Ok(())
    }

    fn start_mqtt(&self) -> Result<ActiveEndpoint, NetworkError> {
        let mut transport =
            MqttTransport::new("hubnodereg", &self.config.host, self.config.port)?;
        let handler = registration_handler(Arc::clone(&self.registry));
        transport.subscribe(&self.config.channel, QoS::AtLeastOnce, handler)?;
        info!(
            "registration listening on MQTT channel '{}' at {}:{}",
            self.config.channel, self.config.host, self.config.port
        );
        Ok(ActiveEndpoint::Mqtt(transport))
    }

    fn start_http(&self) -> Result<ActiveEndpoint, NetworkError> {
        let path = format!("/{}", self.config.channel.trim_start_matches('/'));
        let app = Router::new()
            .route(&path, post(receive_model))
            .with_state(Arc::clone(&self.registry));

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .map_err(|e| NetworkError::ConnectFailed(e.to_string()))?;

        // Bind synchronously so an occupied port is a startup error, not a
        // log line from a background thread.
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = runtime
            .block_on(tokio::net::TcpListener::bind(&addr))
            .map_err(|e| NetworkError::ConnectFailed(format!("{}: {}", addr, e)))?;
        let bound_addr = listener
            .local_addr()
            .map_err(|e| NetworkError::ConnectFailed(e.to_string()))?;

        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let worker = thread::Builder::new()
            .name("registration-http".to_string())
            .spawn(move || {
                let _guard = runtime.enter();
                let serve = axum::serve(listener, app).with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                });
                if let Err(e) = runtime.block_on(serve.into_future()) {
                    error!("registration HTTP server failed: {}", e);
                }
            })
            .map_err(|e| NetworkError::ConnectFailed(e.to_string()))?;

        info!("registration listening on http://{}{}", bound_addr, path);
        Ok(ActiveEndpoint::Http {
            shutdown,
            worker,
            bound_addr,
        })
    }

    /// Address the HTTP listener actually bound, once started
    pub fn bound_addr(&self) -> Option<SocketAddr> {
        match self.active {
            Some(ActiveEndpoint::Http { bound_addr, .. }) => Some(bound_addr),
            _ => None,
        }
    }

    /// Stop receiving registrations; idempotent
    pub fn stop(&mut self) {
        match self.active.take() {
            Some(ActiveEndpoint::Mqtt(mut transport)) => {
                if let Err(e) = transport.close() {
                    warn!("failed to close registration subscription: {}", e);
                }
            }
            Some(ActiveEndpoint::Http {
                shutdown, worker, ..
            }) => {
                let _ = shutdown.send(());
                if worker.join().is_err() {
                    error!("registration HTTP worker panicked");
                }
            }
            None => {}
        }
        info!("registration endpoint stopped");
    }
}

impl Drop for RegistrationEndpoint {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Payload handler forwarding MQTT registration messages to the registry
fn registration_handler(registry: Arc<ModelRegistry>) -> PayloadHandler {
    Arc::new(move |_channel, payload| match registry.register_received(payload) {
        Ok(key) => info!("registration accepted under key '{}'", key),
        Err(e) => warn!("registration rejected: {}", e),
    })
}

/// HTTP handler for POSTed model text
///
/// Always acknowledges with 200 "received"; the registration outcome is
/// observable only in the node's log and state.
async fn receive_model(
    State(registry): State<Arc<ModelRegistry>>,
    body: String,
) -> (StatusCode, &'static str) {
    let outcome =
        tokio::task::spawn_blocking(move || registry.register_received(&body)).await;
    match outcome {
        Ok(Ok(key)) => info!("registration accepted under key '{}'", key),
        Ok(Err(e)) => warn!("registration rejected: {}", e),
        Err(e) => error!("registration handler panicked: {}", e),
    }
    (StatusCode::OK, "received")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TomlModelValidator;
    use crate::observables::{ObservableManager, TransportFactory};
    use crate::transport::MockTransport;
    use std::time::Duration;
    use tempfile::TempDir;

    const SENSOR1: &str = r#"
name = "sensor1"
host = "127.0.0.1"
port = 1883
channel = "topic/sensor1"
"#;

    fn test_registry(dir: &TempDir) -> Arc<ModelRegistry> {
        let factory: TransportFactory = Arc::new(|_, _, _| {
            Ok(Box::new(MockTransport::new()) as Box<dyn crate::transport::PubSubTransport>)
        });
        let observables = Arc::new(ObservableManager::new(factory, 16));
        let registry = Arc::new(ModelRegistry::new(
            dir.path().to_path_buf(),
            Arc::new(TomlModelValidator::new()),
            observables,
        ));
        registry.start();
        registry
    }

    #[test]
    fn test_mqtt_handler_forwards_to_registry() {
        let dir = TempDir::new().unwrap();
        let registry = test_registry(&dir);

        let handler = registration_handler(Arc::clone(&registry));
        handler("registration", SENSOR1);

        assert_eq!(registry.len(), 1);
        assert!(registry.get_by_key("sensor1").is_some());
    }

    #[test]
    fn test_mqtt_handler_tolerates_rejection() {
        let dir = TempDir::new().unwrap();
        let registry = test_registry(&dir);

        let handler = registration_handler(Arc::clone(&registry));
        handler("registration", "not a model");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_http_endpoint_accepts_model() {
        let dir = TempDir::new().unwrap();
        let registry = test_registry(&dir);

        let config = RegistrationConfig {
            protocol: "http".to_string(),
            host: "127.0.0.1".to_string(),
            port: 0,
            channel: "register".to_string(),
        };
        let mut endpoint = RegistrationEndpoint::new(Arc::clone(&registry), config);
        endpoint.start().unwrap();
        let addr = endpoint.bound_addr().unwrap();

        let url = format!("http://{}/register", addr);
        let client = reqwest::blocking::Client::new();
        let response = client
            .post(&url)
            .body(SENSOR1)
            .timeout(Duration::from_secs(5))
            .send()
            .unwrap();

        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(response.text().unwrap(), "received");
        assert_eq!(registry.len(), 1);

        endpoint.stop();
    }

    #[test]
    fn test_http_ack_does_not_reveal_rejection() {
        let dir = TempDir::new().unwrap();
        let registry = test_registry(&dir);

        let config = RegistrationConfig {
            protocol: "http".to_string(),
            host: "127.0.0.1".to_string(),
            port: 0,
            channel: "register".to_string(),
        };
        let mut endpoint = RegistrationEndpoint::new(Arc::clone(&registry), config);
        endpoint.start().unwrap();
        let addr = endpoint.bound_addr().unwrap();

        let client = reqwest::blocking::Client::new();
        let response = client
            .post(format!("http://{}/register", addr))
            .body("garbage")
            .timeout(Duration::from_secs(5))
            .send()
            .unwrap();

        // Same acknowledgement as for an accepted model
        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(response.text().unwrap(), "received");
        assert!(registry.is_empty());

        endpoint.stop();
    }

    #[test]
    fn test_stop_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let registry = test_registry(&dir);
        let config = RegistrationConfig {
            protocol: "http".to_string(),
            host: "127.0.0.1".to_string(),
            port: 0,
            channel: "register".to_string(),
        };
        let mut endpoint = RegistrationEndpoint::new(registry, config);
        endpoint.start().unwrap();
        endpoint.stop();
        endpoint.stop();
    }
}
