//! # Windlass Host Configuration
//!
//! One TOML file describes the boat, the application limits, the relay board
//! wiring and the background loops. Every field has a default, so an empty
//! file yields a working mock setup.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [boat]
//! boat_name = "Sea Otter"
//! boat_length = 10.5
//! chain_length = 60.0
//! down_speed = 15.0
//! up_speed = 12.0
//!
//! [app]
//! min_length_up = 5.0
//! allow_retract = true
//! manual_range = 0.5
//!
//! [relay]
//! backend = "sysfs"
//! extend_pin = 26
//! retract_pin = 20
//! fan_pin = 21
//! ```
//!
//! ## Example: Rust Usage
//!
//! ```rust
//! use windlass_rs::config::Config;
//! let config: Config = toml::from_str("[boat]\nchain_length = 60.0").unwrap();
//! assert_eq!(config.boat.chain_length, 60.0);
//! assert_eq!(config.app.min_length_up, 5.0);
//! assert!(config.validate().is_ok());
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration struct for the boat, app limits, relay board and loops.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub boat: BoatConfig,
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub windlass: WindlassConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Boat-level configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BoatConfig {
    #[serde(default)]
    pub boat_name: Option<String>,
    #[serde(default = "default_boat_length")]
    pub boat_length: f64,
    #[serde(default = "default_boat_draught")]
    pub boat_draught: f64,
    #[serde(default = "default_chain_length")]
    pub chain_length: f64,
    /// Metres per minute while deploying.
    #[serde(default = "default_down_speed")]
    pub down_speed: f64,
    /// Metres per minute while retrieving.
    #[serde(default = "default_up_speed")]
    pub up_speed: f64,
}

impl Default for BoatConfig {
    fn default() -> Self {
        Self {
            boat_name: None,
            boat_length: default_boat_length(),
            boat_draught: default_boat_draught(),
            chain_length: default_chain_length(),
            down_speed: default_down_speed(),
            up_speed: default_up_speed(),
        }
    }
}

/// Application limits, as set by the operator.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default = "default_min_length_up")]
    pub min_length_up: f64,
    /// Retrieving may be unsafe on some installations.
    #[serde(default = "default_true")]
    pub allow_retract: bool,
    #[serde(default = "default_manual_range")]
    pub manual_range: f64,
    #[serde(default = "default_max_manual_range")]
    pub max_manual_range: f64,
    /// Chain kept on the gypsy when computing a deploy length.
    #[serde(default = "default_min_length_remain")]
    pub min_length_remain: f64,
    #[serde(default = "default_true")]
    pub cpu_temp_monitor: bool,
    #[serde(default = "default_cpu_temp_target")]
    pub cpu_temp_target: f64,
    #[serde(default = "default_cpu_temp_high")]
    pub cpu_temp_high: f64,
    #[serde(default)]
    pub tz_hour_adjust: i64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            min_length_up: default_min_length_up(),
            allow_retract: true,
            manual_range: default_manual_range(),
            max_manual_range: default_max_manual_range(),
            min_length_remain: default_min_length_remain(),
            cpu_temp_monitor: true,
            cpu_temp_target: default_cpu_temp_target(),
            cpu_temp_high: default_cpu_temp_high(),
            tz_hour_adjust: 0,
        }
    }
}

/// Timing constants of the run loop and the telemetry stream.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WindlassConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_on_target_threshold")]
    pub on_target_threshold: f64,
    #[serde(default = "default_telemetry_fast_ms")]
    pub telemetry_fast_ms: u64,
    #[serde(default = "default_telemetry_idle_ms")]
    pub telemetry_idle_ms: u64,
}

impl Default for WindlassConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            on_target_threshold: default_on_target_threshold(),
            telemetry_fast_ms: default_telemetry_fast_ms(),
            telemetry_idle_ms: default_telemetry_idle_ms(),
        }
    }
}

impl WindlassConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn telemetry_fast(&self) -> Duration {
        Duration::from_millis(self.telemetry_fast_ms)
    }

    pub fn telemetry_idle(&self) -> Duration {
        Duration::from_millis(self.telemetry_idle_ms)
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RelayBackend {
    Mock,
    Sysfs,
}

/// Relay board wiring.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelayConfig {
    #[serde(default = "default_relay_backend")]
    pub backend: RelayBackend,
    #[serde(default = "default_extend_pin")]
    pub extend_pin: u32,
    #[serde(default = "default_retract_pin")]
    pub retract_pin: u32,
    #[serde(default = "default_fan_pin")]
    pub fan_pin: u32,
    /// The common opto-isolated relay boards switch on a low level.
    #[serde(default = "default_true")]
    pub active_low: bool,
    #[serde(default = "default_gpio_root")]
    pub gpio_root: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            backend: default_relay_backend(),
            extend_pin: default_extend_pin(),
            retract_pin: default_retract_pin(),
            fan_pin: default_fan_pin(),
            active_low: true,
            gpio_root: default_gpio_root(),
        }
    }
}

/// CPU temperature monitor.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitorConfig {
    #[serde(default = "default_monitor_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_disabled_interval_secs")]
    pub disabled_interval_secs: u64,
    #[serde(default = "default_thermal_zone")]
    pub thermal_zone: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_monitor_interval_secs(),
            disabled_interval_secs: default_disabled_interval_secs(),
            thermal_zone: default_thermal_zone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            log_level: default_log_level(),
        }
    }
}

impl ServerConfig {
    pub fn tracing_level(&self) -> tracing::Level {
        self.log_level.parse().unwrap_or(tracing::Level::INFO)
    }
}

impl Config {
    /// Reject combinations the run loop cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let boat = &self.boat;
        if boat.chain_length <= 0.0 {
            return Err(ConfigError::Invalid("chain_length must be > 0".to_string()));
        }
        if boat.down_speed <= 0.0 || boat.up_speed <= 0.0 {
            return Err(ConfigError::Invalid("down_speed and up_speed must be > 0".to_string()));
        }
        if self.app.min_length_up < 0.0 || self.app.min_length_up >= boat.chain_length {
            return Err(ConfigError::Invalid(format!(
                "min_length_up must be within [0, {})",
                boat.chain_length
            )));
        }
        if self.app.manual_range <= 0.0 || self.app.manual_range > self.app.max_manual_range {
            return Err(ConfigError::Invalid(
                "manual_range must be > 0 and not exceed max_manual_range".to_string(),
            ));
        }
        if self.app.cpu_temp_target > self.app.cpu_temp_high {
            return Err(ConfigError::Invalid(
                "cpu_temp_target must not exceed cpu_temp_high".to_string(),
            ));
        }
        if self.windlass.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("tick_interval_ms must be > 0".to_string()));
        }
        if self.windlass.on_target_threshold <= 0.0 {
            return Err(ConfigError::Invalid("on_target_threshold must be > 0".to_string()));
        }
        Ok(())
    }
}

/// The slice of configuration the windlass state machine needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindlassParameters {
    pub chain_length: f64,
    pub min_length_up: f64,
    pub down_speed: f64,
    pub up_speed: f64,
    pub boat_length: f64,
}

impl WindlassParameters {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chain_length: config.boat.chain_length,
            min_length_up: config.app.min_length_up,
            down_speed: config.boat.down_speed,
            up_speed: config.boat.up_speed,
            boat_length: config.boat.boat_length,
        }
    }
}

impl Default for WindlassParameters {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

// Default value functions
fn default_true() -> bool { true }
fn default_boat_length() -> f64 { 10.0 }
fn default_boat_draught() -> f64 { 1.5 }
fn default_chain_length() -> f64 { 50.0 }
fn default_down_speed() -> f64 { 15.0 }
fn default_up_speed() -> f64 { 12.0 }
fn default_min_length_up() -> f64 { 5.0 }
fn default_manual_range() -> f64 { 0.5 }
fn default_max_manual_range() -> f64 { 5.0 }
fn default_min_length_remain() -> f64 { 5.0 }
fn default_cpu_temp_target() -> f64 { 50.0 }
fn default_cpu_temp_high() -> f64 { 60.0 }
fn default_tick_interval_ms() -> u64 { 200 }
fn default_on_target_threshold() -> f64 { 0.3 }
fn default_telemetry_fast_ms() -> u64 { 100 }
fn default_telemetry_idle_ms() -> u64 { 500 }
fn default_relay_backend() -> RelayBackend { RelayBackend::Mock }
fn default_extend_pin() -> u32 { 26 }
fn default_retract_pin() -> u32 { 20 }
fn default_fan_pin() -> u32 { 21 }
fn default_gpio_root() -> String { "/sys/class/gpio".to_string() }
fn default_monitor_interval_secs() -> u64 { 20 }
fn default_disabled_interval_secs() -> u64 { 60 }
fn default_thermal_zone() -> String { "/sys/class/thermal/thermal_zone0/temp".to_string() }
fn default_bind() -> String { "0.0.0.0:3000".to_string() }
fn default_log_level() -> String { "info".to_string() }

/// Load configuration from a TOML file at the given path.
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        tracing::error!("Failed to read config file '{}': {}", path, e);
        ConfigError::Io(e)
    })?;
    let config: Config = toml::from_str(&contents).map_err(|e| {
        tracing::error!("Failed to parse config TOML: {}", e);
        ConfigError::Toml(e)
    })?;
    config.validate()?;
    Ok(config)
}
