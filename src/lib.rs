/// Error types for the control-unit node
pub mod error;

/// Validated transport client identity
pub mod channel;

/// Bounded state-machine queue and its propagator worker
pub mod queue;

/// Pub/sub and HTTP transport clients
pub mod transport;

/// Entity descriptors and the model-validator boundary
pub mod model;

/// Entity model registry
pub mod registry;

/// Observable connection management
pub mod observables;

/// Telemetry aggregation and distribution
pub mod aggregator;

/// Registration endpoint
pub mod registration;

/// Node assembly and lifecycle
pub mod node;

/// Configuration management
pub mod config;

// Re-export commonly used types
pub use error::{ConfigError, NetworkError, RegistryError};
