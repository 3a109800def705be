//! Configuration management for ratekeeper using the prefer crate.
//!
//! [`ManagerConfig`] is the resolved, typed configuration the manager runs
//! with. [`ConfigFile`] is the on-disk shape: every field optional, applied
//! over the defaults, then environment overrides are applied on top.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{BuildError, ConfigError};
use crate::rate_limit::EndpointKey;

/// Default spacing between requests to one endpoint when quota is healthy.
pub const DEFAULT_DELAY_MS: u64 = 200;
/// Absolute remaining count below which requests are slowed down.
pub const DEFAULT_THROTTLE_THRESHOLD: u32 = 10;
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 1000;
pub const DEFAULT_QUEUE_WORKERS: usize = 5;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Base of the exponential backoff for transient failures.
pub const DEFAULT_RETRY_BASE_MS: u64 = 1000;
/// Wait after a 429 that names no reset time.
pub const DEFAULT_RATE_LIMITED_FALLBACK_SECS: u64 = 5;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const USER_AGENT: &str = concat!("ratekeeper/", env!("CARGO_PKG_VERSION"));

/// Name used for config file discovery.
const CONFIG_NAME: &str = "ratekeeper";

/// Throttling and retry knobs resolved for one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointSettings {
    pub default_delay: Duration,
    pub throttle_threshold: u32,
    pub max_retries: u32,
}

/// Per-endpoint overrides. Unset fields fall back to the global values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throttle_threshold: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

/// Maps URLs starting with `prefix` (scheme and query ignored) to `key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointRoute {
    pub prefix: String,
    pub key: String,
}

impl EndpointRoute {
    pub fn new(prefix: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            key: key.into(),
        }
    }
}

fn default_routes() -> Vec<EndpointRoute> {
    vec![
        EndpointRoute::new("api.wynncraft.com/v3/player/", "wynncraft_player_api"),
        EndpointRoute::new("api.wynncraft.com/v3/", "wynncraft_api_v3"),
        EndpointRoute::new("nori.fish", "nori_fish_api"),
    ]
}

fn default_endpoints() -> HashMap<String, EndpointOverrides> {
    let mut endpoints = HashMap::new();
    endpoints.insert(
        "nori_fish_api".to_string(),
        EndpointOverrides {
            default_delay_ms: Some(500),
            throttle_threshold: Some(5),
            max_retries: Some(2),
        },
    );
    endpoints
}

/// Resolved manager configuration.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub default_delay: Duration,
    pub throttle_threshold: u32,
    pub max_queue_size: usize,
    pub queue_workers: usize,
    pub max_retries: u32,
    pub retry_base: Duration,
    pub rate_limited_fallback: Duration,
    pub request_timeout: Duration,
    pub user_agent: String,
    /// Overrides keyed by endpoint key.
    pub endpoints: HashMap<String, EndpointOverrides>,
    /// Checked in order; first match wins.
    pub routes: Vec<EndpointRoute>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            default_delay: Duration::from_millis(DEFAULT_DELAY_MS),
            throttle_threshold: DEFAULT_THROTTLE_THRESHOLD,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            queue_workers: DEFAULT_QUEUE_WORKERS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base: Duration::from_millis(DEFAULT_RETRY_BASE_MS),
            rate_limited_fallback: Duration::from_secs(DEFAULT_RATE_LIMITED_FALLBACK_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            user_agent: USER_AGENT.to_string(),
            endpoints: default_endpoints(),
            routes: default_routes(),
        }
    }
}

impl ManagerConfig {
    /// Discover a config file, apply it over the defaults, then apply env overrides.
    pub async fn load() -> Self {
        let mut config = Self::default();
        if let Some(file) = ConfigFile::discover().await {
            file.apply_to(&mut config);
        }
        config.with_env_overrides()
    }

    /// Like [`ManagerConfig::load`] but from an explicit path.
    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        ConfigFile::load_from_path(path).await?.apply_to(&mut config);
        Ok(config.with_env_overrides())
    }

    /// Apply `RATE_LIMIT_*` environment variables. Unparsable values are ignored.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(ms) = env_value::<u64>("RATE_LIMIT_DEFAULT_DELAY_MS") {
            self.default_delay = Duration::from_millis(ms);
        }
        if let Some(threshold) = env_value("RATE_LIMIT_THROTTLE_THRESHOLD") {
            self.throttle_threshold = threshold;
        }
        if let Some(size) = env_value("RATE_LIMIT_MAX_QUEUE_SIZE") {
            self.max_queue_size = size;
        }
        if let Some(workers) = env_value("RATE_LIMIT_QUEUE_WORKERS") {
            self.queue_workers = workers;
        }
        if let Some(retries) = env_value("RATE_LIMIT_MAX_RETRIES") {
            self.max_retries = retries;
        }
        self
    }

    /// Reject configurations the manager cannot run with.
    pub fn validate(&self) -> Result<(), BuildError> {
        if self.queue_workers == 0 {
            return Err(BuildError::InvalidConfig(
                "queue_workers must be at least 1".to_string(),
            ));
        }
        if self.max_queue_size == 0 {
            return Err(BuildError::InvalidConfig(
                "max_queue_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Settings for `key`, with its overrides applied.
    pub fn settings_for(&self, key: &EndpointKey) -> EndpointSettings {
        let overrides = self.endpoints.get(key.as_str());
        EndpointSettings {
            default_delay: overrides
                .and_then(|o| o.default_delay_ms)
                .map(Duration::from_millis)
                .unwrap_or(self.default_delay),
            throttle_threshold: overrides
                .and_then(|o| o.throttle_threshold)
                .unwrap_or(self.throttle_threshold),
            max_retries: overrides
                .and_then(|o| o.max_retries)
                .unwrap_or(self.max_retries),
        }
    }
}

fn env_value<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring unparsable {}={:?}", name, raw);
            None
        }
    }
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throttle_threshold: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_queue_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_workers: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_base_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limited_fallback_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Merged into the built-in overrides, replacing entries with the same key.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub endpoints: HashMap<String, EndpointOverrides>,
    /// Checked before the built-in routes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<EndpointRoute>,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl ConfigFile {
    /// Use prefer for file discovery, then parse with serde.
    pub async fn discover() -> Option<Self> {
        let found = prefer::load(CONFIG_NAME).await.ok()?;
        let path = found.source_path()?;
        match Self::load_from_path(path).await {
            Ok(file) => Some(file),
            Err(e) => {
                warn!("Ignoring config file {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Load configuration from a specific file path.
    /// Format is chosen by extension: TOML, YAML, otherwise JSON.
    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let expanded = shellexpand::tilde(&path.to_string_lossy()).into_owned();
        let path = PathBuf::from(expanded);
        let contents = tokio::fs::read_to_string(&path).await?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        let mut file: ConfigFile = match ext {
            "toml" => toml::from_str(&contents)?,
            "yaml" | "yml" => serde_yaml::from_str(&contents)?,
            _ => serde_json::from_str(&contents)?,
        };

        debug!("Loaded config from {}", path.display());
        file.source_path = Some(path);
        Ok(file)
    }

    /// Apply the fields that are set onto `config`.
    pub fn apply_to(&self, config: &mut ManagerConfig) {
        if let Some(ms) = self.default_delay_ms {
            config.default_delay = Duration::from_millis(ms);
        }
        if let Some(threshold) = self.throttle_threshold {
            config.throttle_threshold = threshold;
        }
        if let Some(size) = self.max_queue_size {
            config.max_queue_size = size;
        }
        if let Some(workers) = self.queue_workers {
            config.queue_workers = workers;
        }
        if let Some(retries) = self.max_retries {
            config.max_retries = retries;
        }
        if let Some(ms) = self.retry_base_ms {
            config.retry_base = Duration::from_millis(ms);
        }
        if let Some(secs) = self.rate_limited_fallback_secs {
            config.rate_limited_fallback = Duration::from_secs(secs);
        }
        if let Some(secs) = self.request_timeout {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(ref user_agent) = self.user_agent {
            config.user_agent = user_agent.clone();
        }
        for (key, overrides) in &self.endpoints {
            config.endpoints.insert(key.clone(), overrides.clone());
        }
        if !self.routes.is_empty() {
            let mut routes = self.routes.clone();
            routes.append(&mut config.routes);
            config.routes = routes;
        }
    }
}

impl From<&ManagerConfig> for ConfigFile {
    fn from(config: &ManagerConfig) -> Self {
        Self {
            default_delay_ms: Some(config.default_delay.as_millis() as u64),
            throttle_threshold: Some(config.throttle_threshold),
            max_queue_size: Some(config.max_queue_size),
            queue_workers: Some(config.queue_workers),
            max_retries: Some(config.max_retries),
            retry_base_ms: Some(config.retry_base.as_millis() as u64),
            rate_limited_fallback_secs: Some(config.rate_limited_fallback.as_secs()),
            request_timeout: Some(config.request_timeout.as_secs()),
            user_agent: Some(config.user_agent.clone()),
            endpoints: config.endpoints.clone(),
            routes: config.routes.clone(),
            source_path: None,
        }
    }
}
