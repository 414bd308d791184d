//! Engine configuration and the application context
//!
//! Configuration is read from `bookflow.toml`. Nothing is cached in globals:
//! the [`AppContext`] owns the loaded config together with the catalog derived
//! from it and reloads both when the file changes on disk.

use crate::store::{DocumentStore, LockOptions};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

pub const DEFAULT_CONFIG_FILE: &str = "bookflow.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON document holding events, clients and tasks
    pub path: PathBuf,
    pub lock_timeout_secs: u64,
    pub lock_poll_ms: u64,
    pub stale_lock_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/events.json"),
            lock_timeout_secs: 60,
            lock_poll_ms: 100,
            stale_lock_secs: 300,
        }
    }
}

impl StoreConfig {
    pub fn lock_options(&self) -> LockOptions {
        LockOptions {
            timeout: Duration::from_secs(self.lock_timeout_secs),
            poll_interval: Duration::from_millis(self.lock_poll_ms),
            stale_after: Duration::from_secs(self.stale_lock_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Detours allowed while handling one message before a human is asked
    pub max_detours_per_request: u32,
    /// Upper bound on handler invocations per message
    pub max_steps_per_request: u32,
    /// Extra phrases that mark a message as revising an earlier decision
    pub revision_signals: Vec<String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            max_detours_per_request: 3,
            max_steps_per_request: 16,
            revision_signals: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HilConfig {
    /// Require a manager decision once the client accepts an offer
    pub approve_offer_acceptance: bool,
    pub max_pending_approvals: usize,
}

impl Default for HilConfig {
    fn default() -> Self {
        Self {
            approve_offer_acceptance: true,
            max_pending_approvals: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomConfig {
    pub id: String,
    pub name: String,
    pub capacity: u32,
    #[serde(default)]
    pub day_rate_cents: u64,
    /// Dates the room cannot be booked
    #[serde(default)]
    pub unavailable: Vec<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductConfig {
    pub name: String,
    pub unit_price_cents: u64,
}

/// Top-level configuration (`bookflow.toml`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub routing: RoutingConfig,

    #[serde(default)]
    pub hil: HilConfig,

    #[serde(default)]
    pub rooms: Vec<RoomConfig>,

    #[serde(default)]
    pub products: Vec<ProductConfig>,
}

impl EngineConfig {
    /// Load config from `path`; a missing file yields defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: EngineConfig =
            toml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.lock_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "store.lock_timeout_secs must be >= 1".to_string(),
            ));
        }
        if self.store.lock_poll_ms == 0 {
            return Err(ConfigError::Invalid(
                "store.lock_poll_ms must be >= 1".to_string(),
            ));
        }
        if self.routing.max_steps_per_request == 0 {
            return Err(ConfigError::Invalid(
                "routing.max_steps_per_request must be >= 1".to_string(),
            ));
        }
        if self.hil.max_pending_approvals == 0 {
            return Err(ConfigError::Invalid(
                "hil.max_pending_approvals must be >= 1".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for room in &self.rooms {
            if !seen.insert(room.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate room id '{}'",
                    room.id
                )));
            }
        }
        Ok(())
    }
}

/// Lookup tables derived from the config
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    rooms: HashMap<String, RoomConfig>,
    room_order: Vec<String>,
    products: HashMap<String, ProductConfig>,
}

impl Catalog {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            rooms: config
                .rooms
                .iter()
                .map(|r| (r.id.clone(), r.clone()))
                .collect(),
            room_order: config.rooms.iter().map(|r| r.id.clone()).collect(),
            products: config
                .products
                .iter()
                .map(|p| (p.name.to_lowercase(), p.clone()))
                .collect(),
        }
    }

    pub fn room(&self, room_id: &str) -> Option<&RoomConfig> {
        self.rooms.get(room_id)
    }

    /// Rooms in configuration order
    pub fn rooms(&self) -> impl Iterator<Item = &RoomConfig> {
        self.room_order.iter().filter_map(|id| self.rooms.get(id))
    }

    pub fn product(&self, name: &str) -> Option<&ProductConfig> {
        self.products.get(&name.trim().to_lowercase())
    }
}

/// Explicit application context passed into the engine
///
/// Holds the config and the catalog derived from it. When created from a
/// file, [`AppContext::refresh`] reloads both if the file's modification time
/// changed; otherwise the cached values stay valid.
#[derive(Debug, Clone)]
pub struct AppContext {
    config: EngineConfig,
    catalog: Catalog,
    source: Option<PathBuf>,
    loaded_mtime: Option<SystemTime>,
    store_override: Option<PathBuf>,
}

impl AppContext {
    pub fn new(config: EngineConfig) -> Self {
        let catalog = Catalog::from_config(&config);
        Self {
            config,
            catalog,
            source: None,
            loaded_mtime: None,
            store_override: None,
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config = EngineConfig::load(path)?;
        let mut ctx = Self::new(config);
        ctx.source = Some(path.to_path_buf());
        ctx.loaded_mtime = modified(path);
        Ok(ctx)
    }

    /// Point the store at `path` instead of the configured location
    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.config.store.path = path.clone();
        self.store_override = Some(path);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Reload config and catalog if the source file changed; returns whether it did
    pub fn refresh(&mut self) -> Result<bool, ConfigError> {
        let Some(path) = self.source.clone() else {
            return Ok(false);
        };
        let current = modified(&path);
        if current == self.loaded_mtime {
            return Ok(false);
        }

        let mut config = EngineConfig::load(&path)?;
        if let Some(store) = &self.store_override {
            config.store.path = store.clone();
        }
        tracing::info!(config = %path.display(), "configuration changed, reloading");
        self.catalog = Catalog::from_config(&config);
        self.config = config;
        self.loaded_mtime = current;
        Ok(true)
    }

    /// Store handle configured with this context's path and lock timings
    pub fn store(&self) -> DocumentStore {
        DocumentStore::new(&self.config.store.path)
            .with_lock_options(self.config.store.lock_options())
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
