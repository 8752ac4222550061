//! Configuration system for hive-monitor
//!
//! Supports loading configuration from:
//! 1. CLI --config argument
//! 2. ~/.config/hive-monitor/config.{HIVE_MONITOR_ENV}.json
//! 3. Default values
//!
//! Where HIVE_MONITOR_ENV can be: production (default), development, test
//!
//! # Examples
//!
//! ```no_run
//! use hive_monitor::config::MonitorConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MonitorConfig::load(None)?;
//! println!("Polling every {}ms", config.tick_interval_ms);
//! # Ok(())
//! # }
//! ```
//!
//! ## Environment Variables
//!
//! Environment variables override config file values:
//! - HIVE_MONITOR_TICK_MS
//! - HIVE_MONITOR_GRACE_MS
//! - HIVE_MONITOR_FAILURE_THRESHOLD
//! - HIVE_MONITOR_DEBUG

use crate::monitor::TickPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config JSON: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Settings for the built-in simulated status source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Ticks a simulated task reports `pending` before it starts
    #[serde(default = "default_startup_ticks")]
    pub startup_ticks: u32,

    /// Smallest per-tick progress increment (percent)
    #[serde(default = "default_min_step")]
    pub min_step: f64,

    /// Largest per-tick progress increment (percent)
    #[serde(default = "default_max_step")]
    pub max_step: f64,

    /// Probability (0.0 - 1.0) that a tick reports a crash
    #[serde(default)]
    pub failure_rate: f64,
}

fn default_startup_ticks() -> u32 {
    1
}

fn default_min_step() -> f64 {
    2.0
}

fn default_max_step() -> f64 {
    12.0
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            startup_ticks: default_startup_ticks(),
            min_step: default_min_step(),
            max_step: default_max_step(),
            failure_rate: 0.0,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.min_step > 0.0 && self.min_step <= self.max_step) {
            return Err(ConfigError::ValidationError(format!(
                "simulation steps must satisfy 0 < min_step <= max_step, got {}..{}",
                self.min_step, self.max_step
            )));
        }
        if !(0.0..=1.0).contains(&self.failure_rate) {
            return Err(ConfigError::ValidationError(format!(
                "failure_rate must be between 0.0 and 1.0, got {}",
                self.failure_rate
            )));
        }
        Ok(())
    }
}

/// Main monitor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Interval between ticks for each task
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// How long a finished task stays visible before it is discarded
    #[serde(default = "default_grace_delay")]
    pub grace_delay_ms: u64,

    /// Consecutive status source errors before a task is marked failed
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// A pending task with no reported activity is assumed running after this
    #[serde(default = "default_start_timeout")]
    pub start_timeout_ms: u64,

    /// No ETA is shown until progress exceeds this percent
    #[serde(default = "default_eta_floor")]
    pub eta_floor_percent: f64,

    /// Log entries shown per rendered snapshot
    #[serde(default = "default_render_log_lines")]
    pub render_log_lines: usize,

    /// Progress bar width in cells
    #[serde(default = "default_bar_width")]
    pub bar_width: usize,

    /// Enable debug logging
    #[serde(default)]
    pub debug: bool,

    /// Simulated status source
    #[serde(default)]
    pub simulation: SimulationConfig,
}

fn default_tick_interval() -> u64 {
    1000
}

fn default_grace_delay() -> u64 {
    1500
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_start_timeout() -> u64 {
    5000
}

fn default_eta_floor() -> f64 {
    1.0
}

fn default_render_log_lines() -> usize {
    5
}

fn default_bar_width() -> usize {
    30
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval(),
            grace_delay_ms: default_grace_delay(),
            failure_threshold: default_failure_threshold(),
            start_timeout_ms: default_start_timeout(),
            eta_floor_percent: default_eta_floor(),
            render_log_lines: default_render_log_lines(),
            bar_width: default_bar_width(),
            debug: false,
            simulation: SimulationConfig::default(),
        }
    }
}

impl MonitorConfig {
    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: MonitorConfig = serde_json::from_str(&content)?;

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Load configuration with standard priority:
    /// 1. Explicit path
    /// 2. ~/.config/hive-monitor/config.{HIVE_MONITOR_ENV}.json
    /// 3. Defaults
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit_path {
            if path.exists() {
                tracing::info!("Loading config from: {:?}", path);
                return Self::from_file(path);
            } else {
                return Err(ConfigError::ValidationError(format!(
                    "Config file not found: {:?}",
                    path
                )));
            }
        }

        if let Some(config_path) = Self::default_path() {
            if config_path.exists() {
                tracing::info!("Loading config from: {:?}", config_path);
                return Self::from_file(&config_path);
            }
        }

        tracing::info!("Using default configuration with environment overrides");
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Some(ms) = env_parse::<u64>("HIVE_MONITOR_TICK_MS") {
            self.tick_interval_ms = ms;
        }

        if let Some(ms) = env_parse::<u64>("HIVE_MONITOR_GRACE_MS") {
            self.grace_delay_ms = ms;
        }

        if let Some(threshold) = env_parse::<u32>("HIVE_MONITOR_FAILURE_THRESHOLD") {
            self.failure_threshold = threshold;
        }

        if let Ok(debug) = std::env::var("HIVE_MONITOR_DEBUG") {
            self.debug = debug.eq_ignore_ascii_case("true")
                || debug == "1"
                || debug.eq_ignore_ascii_case("yes");
        }
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "tick_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.failure_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "failure_threshold must be greater than 0".to_string(),
            ));
        }

        if !(0.0..100.0).contains(&self.eta_floor_percent) {
            return Err(ConfigError::ValidationError(format!(
                "eta_floor_percent must be in [0, 100), got {}",
                self.eta_floor_percent
            )));
        }

        if self.bar_width == 0 {
            return Err(ConfigError::ValidationError(
                "bar_width must be greater than 0".to_string(),
            ));
        }

        self.simulation.validate()
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn grace_delay(&self) -> Duration {
        Duration::from_millis(self.grace_delay_ms)
    }

    /// Transition knobs handed to each task's progress record
    pub fn tick_policy(&self) -> TickPolicy {
        TickPolicy {
            failure_threshold: self.failure_threshold,
            start_timeout: Duration::from_millis(self.start_timeout_ms),
            eta_floor_percent: self.eta_floor_percent,
        }
    }

    /// Get the config directory path
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("hive-monitor"))
    }

    /// Environment-specific config file in the config directory
    pub fn default_path() -> Option<PathBuf> {
        let env = std::env::var("HIVE_MONITOR_ENV").unwrap_or_else(|_| "production".to_string());
        Self::config_dir().map(|d| d.join(format!("config.{}.json", env)))
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring {}: cannot parse {:?}", key, raw);
            None
        }
    }
}
