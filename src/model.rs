//! Entity descriptors and the model-validator boundary
//!
//! The declarative model language and its constraint checker are external
//! collaborators. This module defines the validated in-memory descriptor the
//! registry stores, the [`ModelValidator`] interface the registry drives, and
//! a small TOML-backed realization standing at that boundary.

use log::debug;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Rejection returned by a validator for an unacceptable model
#[derive(Error, Debug)]
#[error("{reason}")]
pub struct ModelRejection {
    /// Human-readable explanation of the failed check
    pub reason: String,
}

impl ModelRejection {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Validated description of one registered entity
///
/// Produced by the external model validator from raw model text; owned by
/// the registry. Maps 1:1 to at most one active observable connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDescriptor {
    /// Declared entity name
    pub identifier: String,
    /// Host of the entity's runtime/monitoring endpoint
    pub host: String,
    /// Port of the monitoring endpoint
    pub port: u16,
    /// Pub/sub channel carrying the entity's telemetry
    pub monitoring_channel: String,
    /// Where the underlying model text was persisted
    #[serde(skip)]
    pub source_location: PathBuf,
}

// Equality is structural over the identifying fields; two descriptors
// persisted at different locations still count as duplicates.
impl PartialEq for EntityDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.identifier == other.identifier
            && self.host == other.host
            && self.port == other.port
            && self.monitoring_channel == other.monitoring_channel
    }
}

impl Eq for EntityDescriptor {}

/// External model validator consumed at its interface boundary
///
/// `validate` turns raw model text into a descriptor or a rejection. The
/// `model_*` hooks keep the validator's view of on-disk models consistent
/// with what the registry persists.
pub trait ModelValidator: Send + Sync {
    /// Validate raw model text persisted (or to be persisted) at `location`
    fn validate(&self, raw: &str, location: &Path) -> Result<EntityDescriptor, ModelRejection>;

    /// The model's own declared name, when obtainable without full validation
    fn declared_name(&self, raw: &str) -> Option<String> {
        let _ = raw;
        None
    }

    /// A new model file was persisted
    fn model_added(&self, location: &Path) {
        let _ = location;
    }

    /// An existing model file was rewritten
    fn model_updated(&self, location: &Path) {
        let _ = location;
    }

    /// A model file was deleted
    fn model_removed(&self, location: &Path) {
        let _ = location;
    }
}

/// Raw shape of a TOML entity model
#[derive(Debug, Deserialize)]
struct RawModel {
    name: String,
    host: String,
    port: u16,
    channel: String,
}

/// TOML-backed validator realization
///
/// Accepts models of the form:
///
/// ```toml
/// name = "sensor1"
/// host = "127.0.0.1"
/// port = 1883
/// channel = "topic/sensor1"
/// ```
#[derive(Debug, Default)]
pub struct TomlModelValidator;

impl TomlModelValidator {
    pub fn new() -> Self {
        Self
    }
}

impl ModelValidator for TomlModelValidator {
    fn validate(&self, raw: &str, location: &Path) -> Result<EntityDescriptor, ModelRejection> {
        let model: RawModel = toml::from_str(raw)
            .map_err(|e| ModelRejection::new(format!("model text is not valid: {}", e)))?;

        if model.name.trim().is_empty() {
            return Err(ModelRejection::new("entity name must not be empty"));
        }
        if model.host.trim().is_empty() {
            return Err(ModelRejection::new("host must not be empty"));
        }
        if model.channel.trim().is_empty() {
            return Err(ModelRejection::new("monitoring channel must not be empty"));
        }

        Ok(EntityDescriptor {
            identifier: model.name,
            host: model.host,
            port: model.port,
            monitoring_channel: model.channel,
            source_location: location.to_path_buf(),
        })
    }

    fn declared_name(&self, raw: &str) -> Option<String> {
        let model: RawModel = toml::from_str(raw).ok()?;
        Some(model.name)
    }

    fn model_added(&self, location: &Path) {
        debug!("model added at {}", location.display());
    }

    fn model_updated(&self, location: &Path) {
        debug!("model updated at {}", location.display());
    }

    fn model_removed(&self, location: &Path) {
        debug!("model removed at {}", location.display());
    }
}
