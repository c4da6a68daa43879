//! Configuration types for candle-bundle

use crate::telemetry::LogFormat;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub bundle: BundleConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Remote exchange configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExchangeConfig {
    /// Exchange name, also the bundle subdirectory
    #[serde(default = "default_exchange_name")]
    pub name: String,

    /// REST API base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// HTTP request timeout (seconds)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Page size for kline requests
    #[serde(default = "default_max_bars_per_request")]
    pub max_bars_per_request: usize,
}

fn default_exchange_name() -> String {
    "binance".to_string()
}
fn default_base_url() -> String {
    "https://api.binance.com".to_string()
}
fn default_request_timeout_secs() -> u64 {
    10
}
fn default_max_bars_per_request() -> usize {
    1000
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            name: default_exchange_name(),
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            max_bars_per_request: default_max_bars_per_request(),
        }
    }
}

impl ExchangeConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Bar store configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BundleConfig {
    /// Root directory holding `{exchange}/{frequency}_bundle`
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Trading calendar name for newly created stores
    #[serde(default = "default_calendar")]
    pub calendar: String,

    /// Bars per session for minute stores
    #[serde(default = "default_minutes_per_day")]
    pub minutes_per_day: u32,

    /// Scale applied to OHLC prices before they are stored as integers
    #[serde(default = "default_ohlc_ratio")]
    pub default_ohlc_ratio: u64,
}

fn default_root() -> PathBuf {
    PathBuf::from("./data")
}
fn default_calendar() -> String {
    "OPEN".to_string()
}
fn default_minutes_per_day() -> u32 {
    1440
}
fn default_ohlc_ratio() -> u64 {
    1_000_000
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            calendar: default_calendar(),
            minutes_per_day: default_minutes_per_day(),
            default_ohlc_ratio: default_ohlc_ratio(),
        }
    }
}

/// Ingestion run configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestConfig {
    /// Upper bound on a single history fetch (seconds)
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Log per-chunk progress
    #[serde(default = "default_true")]
    pub show_progress: bool,
}

fn default_fetch_timeout_secs() -> u64 {
    30
}
fn default_true() -> bool {
    true
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: default_fetch_timeout_secs(),
            show_progress: true,
        }
    }
}

impl IngestConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
    /// Prometheus exporter port; no exporter when unset
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            metrics_port: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}
