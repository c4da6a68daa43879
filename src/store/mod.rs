//! Bar store module
//!
//! Engine-level traits for reading and writing per-instrument bar tables.
//! A store lives in one directory per (exchange, granularity) and owns its
//! file layout and metadata encoding.

mod parquet;
mod types;

pub use self::parquet::ParquetBarStore;
pub use types::{BarTable, OhlcvField, RawArrays, StoreError, StoreMetadata, METADATA_VERSION};

use crate::asset::Sid;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeSet;
use std::path::Path;

/// Trait for bar store engines
pub trait BarStore: Send + Sync {
    /// Open a reader, failing with [`StoreError::NotFound`] if nothing exists
    fn open_reader(&self, dir: &Path) -> Result<Box<dyn BarReader>, StoreError>;

    /// Persisted metadata, or `None` for an empty store
    fn read_metadata(&self, dir: &Path) -> Result<Option<StoreMetadata>, StoreError>;

    /// Create a new store and persist its metadata
    fn create_writer(
        &self,
        dir: &Path,
        metadata: StoreMetadata,
    ) -> Result<Box<dyn BarWriter>, StoreError>;

    /// Open a writer over an existing store
    ///
    /// `metadata` replaces the persisted copy when `write_metadata` is set.
    fn open_writer(
        &self,
        dir: &Path,
        metadata: StoreMetadata,
        write_metadata: bool,
    ) -> Result<Box<dyn BarWriter>, StoreError>;
}

/// Read side of a bar store
pub trait BarReader: Send + Sync {
    fn metadata(&self) -> &StoreMetadata;

    fn first_trading_day(&self) -> NaiveDate {
        self.metadata().start_session
    }

    /// Latest stored bar open across all instruments
    fn last_available_dt(&self) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Stored bar opens for `sid` in `[start, end]`
    fn present_timestamps(
        &self,
        sid: Sid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<BTreeSet<DateTime<Utc>>, StoreError>;

    /// Whether every bar the calendar expects in `[start, end]` is stored
    fn covers(&self, sid: Sid, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Dense OHLCV columns over the calendar window `[start, end]`
    fn load_raw_arrays(
        &self,
        fields: &[OhlcvField],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        sids: &[Sid],
    ) -> Result<RawArrays, StoreError>;
}

/// Write side of a bar store
pub trait BarWriter: Send + Sync {
    fn metadata(&self) -> &StoreMetadata;

    fn start_session(&self) -> NaiveDate {
        self.metadata().start_session
    }

    fn end_session(&self) -> NaiveDate {
        self.metadata().end_session
    }

    /// Strict write of ascending per-instrument tables
    ///
    /// Fails with [`StoreError::OverlappingData`] if any timestamp is
    /// already stored; nothing is written in that case. Returns rows written.
    fn write(&mut self, tables: &[BarTable]) -> Result<usize, StoreError>;

    /// Record `sid`'s first traded bar and persist the metadata
    ///
    /// Readers opened afterwards treat the bars before it as covered.
    fn mark_first_bar(&mut self, sid: Sid, first_bar: DateTime<Utc>) -> Result<(), StoreError>;
}
