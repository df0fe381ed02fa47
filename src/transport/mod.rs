/// Pub/sub transport abstraction and the MQTT realization
pub mod pubsub;

/// Request/response transport over HTTP
pub mod http;

pub use http::{HttpResponse, HttpTransport, ResponseHandler};
pub use pubsub::{MockTransport, MqttTransport, PayloadHandler, PubSubTransport, QoS};
