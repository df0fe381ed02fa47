//! Entity model registry
//!
//! Keyed storage of validated entity descriptions. Receiving a model means
//! validate, scan for structural duplicates, persist to the model directory,
//! insert, and open monitoring; a monitoring failure rolls the whole
//! registration back so the registry never holds an entity it cannot
//! observe.

use crate::error::RegistryError;
use crate::model::{EntityDescriptor, ModelValidator};
use crate::observables::ObservableManager;
use chrono::Utc;
use log::{error, info, warn};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

struct RegistryInner {
    entries: BTreeMap<String, EntityDescriptor>,
    accepting: bool,
    started: bool,
}

/// Registry of entity models keyed by registration identifier
///
/// All public operations go through one registry-wide lock, so concurrent
/// registrations and lookups never observe a partially updated map.
pub struct ModelRegistry {
    model_dir: PathBuf,
    validator: Arc<dyn ModelValidator>,
    observables: Arc<ObservableManager>,
    inner: Mutex<RegistryInner>,
}

impl ModelRegistry {
    /// Create a registry persisting models under `model_dir`
    pub fn new(
        model_dir: PathBuf,
        validator: Arc<dyn ModelValidator>,
        observables: Arc<ObservableManager>,
    ) -> Self {
        Self {
            model_dir,
            validator,
            observables,
            inner: Mutex::new(RegistryInner {
                entries: BTreeMap::new(),
                accepting: false,
                started: false,
            }),
        }
    }

    /// Scan the model directory and register every readable, valid model
    ///
    /// A file that cannot be read or fails validation is logged and skipped;
    /// startup continues with the models that do validate. Monitoring is not
    /// opened here; that happens in [`ModelRegistry::start`].
    pub fn load_from_directory(&self) -> Result<usize, RegistryError> {
        if !self.model_dir.exists() {
            std::fs::create_dir_all(&self.model_dir)?;
            info!("created model directory {}", self.model_dir.display());
            return Ok(0);
        }

        let mut loaded = 0;
        for entry in std::fs::read_dir(&self.model_dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            let raw = match std::fs::read_to_string(&path) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("skipping unreadable model {}: {}", path.display(), e);
                    continue;
                }
            };

            let descriptor = match self.validator.validate(&raw, &path) {
                Ok(descriptor) => descriptor,
                Err(rejection) => {
                    warn!("skipping invalid model {}: {}", path.display(), rejection);
                    continue;
                }
            };

            let key = self
                .validator
                .declared_name(&raw)
                .unwrap_or_else(Self::generated_key);

            let mut inner = self.inner.lock().unwrap();
            if inner.entries.values().any(|d| *d == descriptor) {
                warn!(
                    "skipping duplicate model {} for entity '{}'",
                    path.display(),
                    descriptor.identifier
                );
                continue;
            }
            if inner.entries.contains_key(&key) {
                warn!(
                    "skipping model {}: key '{}' already registered",
                    path.display(),
                    key
                );
                continue;
            }
            inner.entries.insert(key, descriptor);
            loaded += 1;
        }

        info!("loaded {} model(s) from {}", loaded, self.model_dir.display());
        Ok(loaded)
    }

    /// Register raw model text received over the registration transport
    ///
    /// Assigns a fresh registration identifier (the model's declared name
    /// when obtainable, else a generated timestamp-based one), validates,
    /// rejects structural duplicates, persists the raw text, inserts the
    /// descriptor, and opens monitoring. A monitoring failure triggers full
    /// rollback: the persisted file is deleted and the entry removed.
    ///
    /// # Errors
    ///
    /// `Validation`, `Duplicate`, `KeyInUse`, `Persistence` or
    /// `MonitoringSetup`, all recoverable per registration.
    pub fn register_received(&self, raw: &str) -> Result<String, RegistryError> {
        {
            let inner = self.inner.lock().unwrap();
            if !inner.accepting {
                return Err(RegistryError::NotAccepting);
            }
        }

        let key = self
            .validator
            .declared_name(raw)
            .unwrap_or_else(Self::generated_key);
        // The key becomes a file name inside the model directory; a name
        // carrying path separators or dot components would escape it.
        if !Self::key_is_safe_file_name(&key) {
            return Err(RegistryError::Validation(format!(
                "entity name '{}' is not usable as a file name",
                key
            )));
        }
        let location = self.model_dir.join(format!("{}.toml", key));

        let descriptor = self
            .validator
            .validate(raw, &location)
            .map_err(|rejection| RegistryError::Validation(rejection.to_string()))?;

        // Lock ordering throughout the registry is inner -> observables;
        // stop() takes them in the same order.
        let mut inner = self.inner.lock().unwrap();
        if !inner.accepting {
            return Err(RegistryError::NotAccepting);
        }
        if inner.entries.values().any(|d| *d == descriptor) {
            info!(
                "rejecting duplicate registration for entity '{}'",
                descriptor.identifier
            );
            return Err(RegistryError::Duplicate(descriptor.identifier));
        }
        if inner.entries.contains_key(&key) {
            return Err(RegistryError::KeyInUse(key));
        }

        std::fs::create_dir_all(&self.model_dir)?;
        std::fs::write(&location, raw)?;
        self.validator.model_added(&location);

        inner.entries.insert(key.clone(), descriptor.clone());

        let monitoring_ok = self.observables.add_observable(
            &descriptor.identifier,
            &descriptor.monitoring_channel,
            &descriptor.host,
            descriptor.port,
        );
        if !monitoring_ok {
            error!(
                "monitoring setup failed for '{}', rolling back registration '{}'",
                descriptor.identifier, key
            );
            inner.entries.remove(&key);
            if let Err(e) = std::fs::remove_file(&location) {
                warn!("rollback could not delete {}: {}", location.display(), e);
            }
            self.validator.model_removed(&location);
            return Err(RegistryError::MonitoringSetup(
                descriptor.monitoring_channel,
            ));
        }

        info!(
            "registered entity '{}' under key '{}'",
            descriptor.identifier, key
        );
        Ok(key)
    }

    /// Look up a descriptor by registration key
    pub fn get_by_key(&self, key: &str) -> Option<EntityDescriptor> {
        self.inner.lock().unwrap().entries.get(key).cloned()
    }

    /// Look up a descriptor by monitoring channel
    ///
    /// Channel uniqueness across entities is not enforced; when several
    /// descriptors share a channel the first match in key order wins.
    pub fn get_by_channel(&self, channel: &str) -> Option<EntityDescriptor> {
        self.inner
            .lock()
            .unwrap()
            .entries
            .values()
            .find(|d| d.monitoring_channel == channel)
            .cloned()
    }

    /// Registration keys currently present, in key order
    pub fn keys(&self) -> Vec<String> {
        self.inner.lock().unwrap().entries.keys().cloned().collect()
    }

    /// Number of registered entities
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    /// Whether the registry holds no entities
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Open monitoring for every descriptor already present, then begin
    /// accepting registrations
    ///
    /// A descriptor whose monitoring cannot be opened stays registered; the
    /// failure is logged and startup continues.
    ///
    /// # Panics
    ///
    /// Panics when called twice; double setup is a programming error.
    pub fn start(&self) {
        let mut inner = self.inner.lock().unwrap();
        assert!(!inner.started, "registry started twice");
        inner.started = true;

        for descriptor in inner.entries.values() {
            let ok = self.observables.add_observable(
                &descriptor.identifier,
                &descriptor.monitoring_channel,
                &descriptor.host,
                descriptor.port,
            );
            if !ok {
                warn!(
                    "could not open monitoring for preloaded entity '{}'",
                    descriptor.identifier
                );
            }
        }

        inner.accepting = true;
        info!("registry started with {} entit(ies)", inner.entries.len());
    }

    /// Stop accepting registrations, tear down every observable, clear state
    ///
    /// The accepting flag drops first so in-flight registrations cannot race
    /// the teardown.
    pub fn stop(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.accepting = false;

        for descriptor in inner.entries.values() {
            self.observables
                .remove_observable(&descriptor.monitoring_channel);
        }
        inner.entries.clear();
        inner.started = false;
        info!("registry stopped");
    }

    /// Timestamp-based identifier for models without an obtainable name
    fn generated_key() -> String {
        format!("entity{}", Utc::now().format("%Y%m%d%H%M%S%3f"))
    }

    /// Whether a registration key is a plain single-component file name
    fn key_is_safe_file_name(key: &str) -> bool {
        !key.is_empty()
            && key != "."
            && key != ".."
            && !key.contains(['/', '\\', '\0'])
    }
}
