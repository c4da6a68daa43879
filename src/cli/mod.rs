//! CLI interface for candle-bundle
//!
//! Provides subcommands for:
//! - `ingest`: Bring a bundle up to date from the exchange
//! - `import`: Import one cached chunk bundle
//! - `status`: Show bundle metadata
//! - `config`: Show effective configuration

mod import;
mod ingest;
mod status;

pub use import::ImportArgs;
pub use ingest::IngestArgs;
pub use status::StatusArgs;

use crate::bundle::ExchangeBundle;
use crate::config::Config;
use crate::exchange::HttpExchange;
use crate::store::ParquetBarStore;
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "candle-bundle")]
#[command(about = "Incremental OHLCV ingestion into local bar bundles")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest missing chunks into a bundle
    Ingest(IngestArgs),
    /// Import one cached chunk bundle
    Import(ImportArgs),
    /// Show bundle metadata
    Status(StatusArgs),
    /// Show configuration
    Config,
}

/// Parse `YYYY-MM-DD` (midnight UTC) or an RFC 3339 timestamp
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(day) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(day.and_time(chrono::NaiveTime::MIN).and_utc());
    }
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("invalid date '{}': {}", s, e))
}

/// Exchange bundle backed by the HTTP exchange and Parquet store
fn open_bundle(config: &Config) -> anyhow::Result<ExchangeBundle> {
    let exchange = Arc::new(HttpExchange::new((&config.exchange).into())?);
    let bundle = ExchangeBundle::new(
        exchange,
        Arc::new(ParquetBarStore::new()),
        &config.bundle,
        &config.ingest,
    )?;
    Ok(bundle)
}
