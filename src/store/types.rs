//! Bar store types

use crate::asset::Sid;
use crate::candle::{Candle, Granularity};
use arrow::error::ArrowError;
use chrono::{DateTime, NaiveDate, Utc};
use parquet::errors::ParquetError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

/// Current on-disk metadata version
pub const METADATA_VERSION: u32 = 1;

/// Bar store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// No store exists at the path
    #[error("Bar store not found: {0}")]
    NotFound(PathBuf),
    /// A write touched timestamps that are already stored
    #[error("Overlapping data for sid {sid} in [{first}, {last}]")]
    OverlappingData {
        sid: Sid,
        first: DateTime<Utc>,
        last: DateTime<Utc>,
    },
    /// Rows violate the table contract
    #[error("Invalid data: {0}")]
    InvalidData(String),
    /// A row falls outside the writer's sessions
    #[error("Bar at {timestamp} for sid {sid} outside sessions [{start_session}, {end_session}]")]
    OutOfRange {
        sid: Sid,
        timestamp: DateTime<Utc>,
        start_session: NaiveDate,
        end_session: NaiveDate,
    },
    /// Metadata missing fields or inconsistent
    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parquet error: {0}")]
    Parquet(#[from] ParquetError),
    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),
    #[error("Metadata encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Persisted description of a bar store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMetadata {
    pub version: u32,
    pub granularity: Granularity,
    pub calendar_name: String,
    /// First session the store accepts
    pub start_session: NaiveDate,
    /// Last session the store accepts
    pub end_session: NaiveDate,
    pub minutes_per_day: u32,
    pub default_ohlc_ratio: u64,
    #[serde(default)]
    pub ohlc_ratios_per_sid: BTreeMap<Sid, u64>,
    /// First traded bar of instruments ingested from their listing
    ///
    /// Bars before it never existed and do not count as missing.
    #[serde(default)]
    pub first_bars_per_sid: BTreeMap<Sid, DateTime<Utc>>,
}

impl StoreMetadata {
    /// Create metadata, rejecting an inverted session range
    pub fn new(
        granularity: Granularity,
        calendar_name: impl Into<String>,
        start_session: NaiveDate,
        end_session: NaiveDate,
        minutes_per_day: u32,
        default_ohlc_ratio: u64,
    ) -> Result<Self, StoreError> {
        let metadata = Self {
            version: METADATA_VERSION,
            granularity,
            calendar_name: calendar_name.into(),
            start_session,
            end_session,
            minutes_per_day,
            default_ohlc_ratio,
            ohlc_ratios_per_sid: BTreeMap::new(),
            first_bars_per_sid: BTreeMap::new(),
        };
        metadata.validate()?;
        Ok(metadata)
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        if self.start_session > self.end_session {
            return Err(StoreError::InvalidMetadata(format!(
                "start_session {} after end_session {}",
                self.start_session, self.end_session
            )));
        }
        if self.default_ohlc_ratio == 0 {
            return Err(StoreError::InvalidMetadata(
                "default_ohlc_ratio must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Price scale for `sid`
    pub fn ohlc_ratio(&self, sid: Sid) -> u64 {
        self.ohlc_ratios_per_sid
            .get(&sid)
            .copied()
            .unwrap_or(self.default_ohlc_ratio)
    }

    pub fn first_bar(&self, sid: Sid) -> Option<DateTime<Utc>> {
        self.first_bars_per_sid.get(&sid).copied()
    }

    pub fn contains_session(&self, session: NaiveDate) -> bool {
        session >= self.start_session && session <= self.end_session
    }

    /// Widen the session range to include `[start, end]`
    ///
    /// Never narrows. Returns whether anything changed.
    pub fn extend_to(&mut self, start: NaiveDate, end: NaiveDate) -> bool {
        let mut extended = false;
        if start < self.start_session {
            self.start_session = start;
            extended = true;
        }
        if end > self.end_session {
            self.end_session = end;
            extended = true;
        }
        extended
    }
}

/// Rows for one instrument, ascending by timestamp
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarTable {
    pub sid: Sid,
    pub candles: Vec<Candle>,
}

impl BarTable {
    pub fn new(sid: Sid, candles: Vec<Candle>) -> Self {
        Self { sid, candles }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }
}

/// A stored OHLCV column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OhlcvField {
    Open,
    High,
    Low,
    Close,
    Volume,
}

impl OhlcvField {
    pub const ALL: [OhlcvField; 5] = [
        OhlcvField::Open,
        OhlcvField::High,
        OhlcvField::Low,
        OhlcvField::Close,
        OhlcvField::Volume,
    ];

    pub fn of(&self, candle: &Candle) -> Decimal {
        match self {
            OhlcvField::Open => candle.open,
            OhlcvField::High => candle.high,
            OhlcvField::Low => candle.low,
            OhlcvField::Close => candle.close,
            OhlcvField::Volume => candle.volume,
        }
    }
}

/// Dense columns over a calendar window
///
/// `values[field][sid][period]` lines up with `fields`, the requested sids
/// and `timestamps`; periods with no stored bar are `None`.
#[derive(Debug, Clone, Default)]
pub struct RawArrays {
    pub timestamps: Vec<DateTime<Utc>>,
    pub fields: Vec<OhlcvField>,
    pub values: Vec<Vec<Vec<Option<Decimal>>>>,
}

impl RawArrays {
    /// Complete candles for the sid at `sid_index`, ascending
    pub fn candles(&self, sid_index: usize) -> Vec<Candle> {
        let column = |field: OhlcvField| {
            self.fields
                .iter()
                .position(|f| *f == field)
                .and_then(|i| self.values.get(i))
                .and_then(|per_sid| per_sid.get(sid_index))
        };
        let (Some(open), Some(high), Some(low), Some(close), Some(volume)) = (
            column(OhlcvField::Open),
            column(OhlcvField::High),
            column(OhlcvField::Low),
            column(OhlcvField::Close),
            column(OhlcvField::Volume),
        ) else {
            return Vec::new();
        };

        self.timestamps
            .iter()
            .enumerate()
            .filter_map(|(i, ts)| {
                Some(Candle {
                    timestamp: *ts,
                    open: open.get(i).copied().flatten()?,
                    high: high.get(i).copied().flatten()?,
                    low: low.get(i).copied().flatten()?,
                    close: close.get(i).copied().flatten()?,
                    volume: volume.get(i).copied().flatten()?,
                })
            })
            .collect()
    }
}
