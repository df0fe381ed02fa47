use thiserror::Error;

/// Errors reported synchronously by the transport clients
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Invalid client identity: {0}")]
    InvalidIdentity(String),

    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    #[error("Subscribe failed: {0}")]
    SubscribeFailed(String),

    #[error("Publish failed: {0}")]
    PublishFailed(String),

    #[error("Disconnect failed: {0}")]
    DisconnectFailed(String),

    #[error("Client is closed")]
    Closed,

    #[error("Request timed out")]
    Timeout,

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Errors that can occur while registering or removing entity models
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Model validation failed: {0}")]
    Validation(String),

    #[error("Duplicate entity: {0}")]
    Duplicate(String),

    #[error("Registration key already in use: {0}")]
    KeyInUse(String),

    #[error("Failed to persist model: {0}")]
    Persistence(#[from] std::io::Error),

    #[error("Monitoring setup failed for channel: {0}")]
    MonitoringSetup(String),

    #[error("Registry is not accepting registrations")]
    NotAccepting,
}

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}
