//! Bundle ingestion types

use crate::asset::{Asset, AssetError};
use crate::calendar::TradingCalendar;
use crate::candle::{Granularity, ParseGranularityError};
use crate::exchange::ExchangeError;
use crate::store::StoreError;
use chrono::{DateTime, NaiveDate, Utc};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Bundle ingestion errors
#[derive(Debug, Error)]
pub enum BundleError {
    /// Start does not precede end
    #[error("Invalid date range: {0}")]
    InvalidRange(String),
    #[error(transparent)]
    InvalidGranularity(#[from] ParseGranularityError),
    /// Calendar name not in the registry
    #[error("Unknown calendar: {0}")]
    UnknownCalendar(String),
    /// A write failed again after the writer was recreated
    #[error("Write failed for {granularity} bundle: {source}")]
    WriteFailed {
        granularity: Granularity,
        #[source]
        source: StoreError,
    },
    /// History fetch exceeded its deadline
    #[error("Fetching {symbol} timed out after {timeout:?}")]
    FetchTimeout { symbol: String, timeout: Duration },
    /// Another ingestion run holds the lock
    #[error("Bundle locked by {holder}: {path:?}")]
    StoreLocked { path: PathBuf, holder: String },
    /// No cached chunk to import
    #[error("Chunk not cached: {0}")]
    ChunkNotCached(PathBuf),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Asset(#[from] AssetError),
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}

/// One (instrument, calendar month) unit of ingestion work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub asset: Asset,
    pub granularity: Granularity,
    /// `"{year}-{month}"`, month not zero-padded
    pub period: String,
    /// Last calendar day of the month
    pub period_end: NaiveDate,
    /// Month clamped to the asset's adjusted range, inclusive
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

impl Chunk {
    /// Bar opens the calendar expects in this chunk's window
    pub fn periods(&self, calendar: &dyn TradingCalendar) -> Vec<DateTime<Utc>> {
        self.granularity
            .periods_in_range(calendar, self.window_start, self.window_end)
    }
}

/// Result of committing tables to a store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Written(usize),
    /// The rows were already stored
    Skipped,
}

/// Result of ingesting one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// The exchange returned no candles
    NoData,
    /// Every fetched row was already stored
    UpToDate,
    Committed(CommitOutcome),
}

impl ChunkOutcome {
    pub fn rows_written(&self) -> usize {
        match self {
            ChunkOutcome::Committed(CommitOutcome::Written(n)) => *n,
            _ => 0,
        }
    }
}

/// Where chunk rows come from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IngestSource {
    /// Download from the exchange
    #[default]
    Exchange,
    /// Import previously cached per-instrument chunk bundles
    ChunkCache,
}

/// Parameters of one ingestion run
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub granularity: Granularity,
    /// Symbols to ingest; all listed assets when `None`
    pub include_symbols: Option<Vec<String>>,
    pub exclude_symbols: Vec<String>,
    pub start: Option<DateTime<Utc>>,
    /// Exclusive end; "now" when `None`
    pub end: Option<DateTime<Utc>>,
    pub source: IngestSource,
}

impl IngestOptions {
    pub fn new(granularity: Granularity) -> Self {
        Self {
            granularity,
            include_symbols: None,
            exclude_symbols: Vec::new(),
            start: None,
            end: None,
            source: IngestSource::Exchange,
        }
    }
}

/// Totals of one ingestion run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub assets: usize,
    pub chunks_planned: usize,
    pub chunks_written: usize,
    pub chunks_skipped: usize,
    pub rows_written: usize,
    /// Stopped early by the cancellation flag
    pub cancelled: bool,
}
