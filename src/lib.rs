//! candle-bundle: Incremental OHLCV ingestion into local bar bundles
//!
//! This library provides the core components for:
//! - Instrument resolution with a memoizing symbol cache
//! - Historical candle download from Binance-style REST APIs
//! - Trading calendars and bar granularities
//! - Monthly chunk planning against existing store coverage
//! - Forward-filled, idempotent commits to Parquet bar stores
//! - Logging and Prometheus metrics

pub mod asset;
pub mod bundle;
pub mod calendar;
pub mod candle;
pub mod cli;
pub mod config;
pub mod exchange;
pub mod store;
pub mod telemetry;
