//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! The twin store endpoint may also come from `TWIN_STORE_URL` (or the
//! legacy `ADT_SERVICE_URL`). A missing endpoint is fatal at startup.

use crate::domain::error::ConfigError;
use crate::domain::types::{RoomId, TwinIds};
use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

/// Environment variables consulted for the twin store endpoint, in order
pub const ENDPOINT_ENV_VARS: [&str; 2] = ["TWIN_STORE_URL", "ADT_SERVICE_URL"];

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TwinStoreConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Static bearer token; credential acquisition is handled outside this process
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_twin_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_twin_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct TwinsConfig {
    #[serde(default = "default_door_twin")]
    pub door: String,
    #[serde(default = "default_room1_twin")]
    pub room1: String,
    #[serde(default = "default_room2_twin")]
    pub room2: String,
}

impl Default for TwinsConfig {
    fn default() -> Self {
        Self { door: default_door_twin(), room1: default_room1_twin(), room2: default_room2_twin() }
    }
}

fn default_door_twin() -> String {
    "Door".to_string()
}

fn default_room1_twin() -> String {
    "Room1".to_string()
}

fn default_room2_twin() -> String {
    "Room2".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct OccupancyConfig {
    #[serde(default = "default_hallway_timeout_secs")]
    pub hallway_timeout_secs: u64,
    #[serde(default = "default_door_adjacent_timeout_secs")]
    pub door_adjacent_timeout_secs: u64,
}

impl Default for OccupancyConfig {
    fn default() -> Self {
        Self {
            hallway_timeout_secs: default_hallway_timeout_secs(),
            door_adjacent_timeout_secs: default_door_adjacent_timeout_secs(),
        }
    }
}

fn default_hallway_timeout_secs() -> u64 {
    10
}

fn default_door_adjacent_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnomalyConfig {
    #[serde(default = "default_anomaly_enabled")]
    pub enabled: bool,
    /// Absolute gyro rate (deg/s) above which the door counts as slammed
    #[serde(default = "default_slam_gyro_threshold")]
    pub slam_gyro_threshold: f64,
    /// CO2 ppm above which a room's air quality is flagged
    #[serde(default = "default_co2_threshold")]
    pub co2_threshold: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            enabled: default_anomaly_enabled(),
            slam_gyro_threshold: default_slam_gyro_threshold(),
            co2_threshold: default_co2_threshold(),
        }
    }
}

fn default_anomaly_enabled() -> bool {
    true
}

fn default_slam_gyro_threshold() -> f64 {
    65.0
}

fn default_co2_threshold() -> f64 {
    2000.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_http_port")]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { bind_address: default_http_bind_address(), port: default_http_port() }
    }
}

fn default_http_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub topic: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuditConfig {
    /// JSONL file receiving one line per patch decision
    #[serde(default)]
    pub file: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Seconds between metrics summary log lines
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval_secs() }
    }
}

fn default_metrics_interval_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    #[serde(default = "default_site_id")]
    pub id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

fn default_site_id() -> String {
    "twin-reconciler".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub twin_store: TwinStoreConfig,
    #[serde(default)]
    pub twins: TwinsConfig,
    #[serde(default)]
    pub occupancy: OccupancyConfig,
    #[serde(default)]
    pub anomaly: AnomalyConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub mqtt: Option<MqttConfig>,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    twin_store_endpoint: Option<String>,
    twin_store_api_token: Option<String>,
    twin_store_timeout_ms: u64,
    door_twin_id: String,
    room1_twin_id: String,
    room2_twin_id: String,
    hallway_timeout_secs: u64,
    door_adjacent_timeout_secs: u64,
    anomaly_enabled: bool,
    slam_gyro_threshold: f64,
    co2_threshold: f64,
    http_bind_address: String,
    http_port: u16,
    mqtt: Option<MqttConfig>,
    audit_file: Option<String>,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            site_id: default_site_id(),
            twin_store_endpoint: None,
            twin_store_api_token: None,
            twin_store_timeout_ms: default_twin_timeout_ms(),
            door_twin_id: default_door_twin(),
            room1_twin_id: default_room1_twin(),
            room2_twin_id: default_room2_twin(),
            hallway_timeout_secs: default_hallway_timeout_secs(),
            door_adjacent_timeout_secs: default_door_adjacent_timeout_secs(),
            anomaly_enabled: default_anomaly_enabled(),
            slam_gyro_threshold: default_slam_gyro_threshold(),
            co2_threshold: default_co2_threshold(),
            http_bind_address: default_http_bind_address(),
            http_port: default_http_port(),
            mqtt: None,
            audit_file: None,
            metrics_interval_secs: default_metrics_interval_secs(),
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, path.display().to_string()))
    }

    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            site_id: toml_config.site.id,
            twin_store_endpoint: toml_config.twin_store.endpoint.filter(|e| !e.trim().is_empty()),
            twin_store_api_token: toml_config.twin_store.api_token,
            twin_store_timeout_ms: toml_config.twin_store.timeout_ms,
            door_twin_id: toml_config.twins.door,
            room1_twin_id: toml_config.twins.room1,
            room2_twin_id: toml_config.twins.room2,
            hallway_timeout_secs: toml_config.occupancy.hallway_timeout_secs,
            door_adjacent_timeout_secs: toml_config.occupancy.door_adjacent_timeout_secs,
            anomaly_enabled: toml_config.anomaly.enabled,
            slam_gyro_threshold: toml_config.anomaly.slam_gyro_threshold,
            co2_threshold: toml_config.anomaly.co2_threshold,
            http_bind_address: toml_config.http.bind_address,
            http_port: toml_config.http.port,
            mqtt: toml_config.mqtt,
            audit_file: toml_config.audit.file,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            config_file,
        }
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    /// Full startup load: file (or defaults), environment overrides, validation
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_path(path);
        config.apply_env_overrides(|key| env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Override the endpoint from the first non-empty endpoint variable
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let endpoint = ENDPOINT_ENV_VARS
            .iter()
            .filter_map(|key| lookup(key))
            .find(|value| !value.trim().is_empty());
        if let Some(endpoint) = endpoint {
            self.twin_store_endpoint = Some(endpoint);
        }
    }

    /// Reject configurations the service cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let Some(endpoint) = self.twin_store_endpoint.as_deref() else {
            return Err(ConfigError::MissingEndpoint);
        };
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "twin store endpoint must be an http(s) URL, got {endpoint}"
            )));
        }
        if self.twin_store_timeout_ms == 0 {
            return Err(ConfigError::Invalid("twin_store.timeout_ms must be > 0".to_string()));
        }
        if self.hallway_timeout_secs == 0 || self.door_adjacent_timeout_secs == 0 {
            return Err(ConfigError::Invalid("occupancy timeouts must be > 0".to_string()));
        }
        if self.metrics_interval_secs == 0 {
            return Err(ConfigError::Invalid("metrics.interval_secs must be > 0".to_string()));
        }
        Ok(())
    }

    /// Twin id for a room
    pub fn room_twin_id(&self, room: RoomId) -> &str {
        match room {
            RoomId::Room1 => &self.room1_twin_id,
            RoomId::Room2 => &self.room2_twin_id,
        }
    }

    pub fn twin_ids(&self) -> TwinIds {
        TwinIds {
            door: self.door_twin_id.clone(),
            room1: self.room1_twin_id.clone(),
            room2: self.room2_twin_id.clone(),
        }
    }

    // Getters for all config fields
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn twin_store_endpoint(&self) -> Option<&str> {
        self.twin_store_endpoint.as_deref()
    }

    pub fn twin_store_api_token(&self) -> Option<&str> {
        self.twin_store_api_token.as_deref()
    }

    pub fn twin_store_timeout_ms(&self) -> u64 {
        self.twin_store_timeout_ms
    }

    pub fn door_twin_id(&self) -> &str {
        &self.door_twin_id
    }

    pub fn hallway_timeout_secs(&self) -> u64 {
        self.hallway_timeout_secs
    }

    pub fn door_adjacent_timeout_secs(&self) -> u64 {
        self.door_adjacent_timeout_secs
    }

    pub fn anomaly_enabled(&self) -> bool {
        self.anomaly_enabled
    }

    pub fn slam_gyro_threshold(&self) -> f64 {
        self.slam_gyro_threshold
    }

    pub fn co2_threshold(&self) -> f64 {
        self.co2_threshold
    }

    pub fn http_bind_address(&self) -> &str {
        &self.http_bind_address
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn mqtt(&self) -> Option<&MqttConfig> {
        self.mqtt.as_ref()
    }

    pub fn audit_file(&self) -> Option<&str> {
        self.audit_file.as_deref()
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method to set the twin store endpoint
    pub fn with_twin_store_endpoint(mut self, endpoint: &str) -> Self {
        self.twin_store_endpoint = Some(endpoint.to_string());
        self
    }

    /// Builder method to toggle anomaly detection
    pub fn with_anomaly_enabled(mut self, enabled: bool) -> Self {
        self.anomaly_enabled = enabled;
        self
    }

    /// Builder method for tests to shorten the store call timeout
    #[cfg(test)]
    pub fn with_twin_store_timeout_ms(mut self, ms: u64) -> Self {
        self.twin_store_timeout_ms = ms;
        self
    }
}
