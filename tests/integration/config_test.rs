//! Configuration integration tests

use candle_bundle::config::Config;
use candle_bundle::telemetry::LogFormat;
use std::path::PathBuf;
use std::time::Duration;

#[test]
fn test_config_example_loads() {
    let config = Config::load("config.toml.example").unwrap();

    assert_eq!(config.exchange.name, "binance");
    assert_eq!(config.exchange.request_timeout(), Duration::from_secs(10));
    assert_eq!(config.bundle.root, PathBuf::from("./data"));
    assert_eq!(config.bundle.calendar, "OPEN");
    assert_eq!(config.ingest.fetch_timeout(), Duration::from_secs(30));
    assert_eq!(config.telemetry.log_format, LogFormat::Pretty);
    assert!(config.telemetry.metrics_port.is_none());
}

#[test]
fn test_missing_config_file_errors() {
    assert!(Config::load("does-not-exist.toml").is_err());
}
