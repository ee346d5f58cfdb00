use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use log::LevelFilter;
use serde::Deserialize;

/// Configuration loading failures.
#[derive(Debug)]
pub enum ConfigError {
    Io(io::Error),
    Parse(toml::de::Error),
}

impl From<io::Error> for ConfigError {
    fn from(err: io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Parse(err)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "failed to read config: {}", err),
            ConfigError::Parse(err) => write!(f, "failed to parse config: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Gateway configuration, loaded once at startup.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub influx: InfluxConfig,
    pub serial: SerialConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

/// Time-series sink connection parameters.
#[derive(Clone, Debug, Deserialize)]
pub struct InfluxConfig {
    pub url: String,
    pub org: String,
    pub bucket: String,
    pub token: String,
}

/// Serial link parameters.
#[derive(Clone, Debug, Deserialize)]
pub struct SerialConfig {
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Pipeline tuning knobs; the defaults mirror the node's batch size.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub batch_size: usize,
    pub flush_queue_depth: usize,
    pub poll_interval_ms: u64,
    pub sync_time_on_start: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            batch_size: crate::dispatch::DEFAULT_BATCH_SIZE,
            flush_queue_depth: crate::dispatch::DEFAULT_FLUSH_QUEUE_DEPTH,
            poll_interval_ms: 1000,
            sync_time_on_start: true,
        }
    }
}

/// Load and parse the TOML config file.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let contents = fs::read_to_string(path)?;
    let config = toml::from_str(&contents)?;
    Ok(config)
}

/// Map a configured level name to a logging severity. `None` for unknown
/// names; the caller falls back to `Info` and warns.
pub fn level_filter(name: &str) -> Option<LevelFilter> {
    match name.to_ascii_uppercase().as_str() {
        "DEBUG" => Some(LevelFilter::Debug),
        "INFO" => Some(LevelFilter::Info),
        "WARN" => Some(LevelFilter::Warn),
        "ERROR" => Some(LevelFilter::Error),
        _ => None,
    }
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_log_level() -> String {
    "INFO".to_string()
}
