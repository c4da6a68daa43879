//! Parquet-backed bar store
//!
//! Layout under a bundle directory:
//!
//! ```text
//! metadata.json
//! sid={sid}/{first}_{last}.parquet
//! ```
//!
//! Every committed table becomes one immutable part file named after its
//! first and last bar. OHLC prices are stored as integers scaled by an OHLC
//! ratio: the instrument's ratio, multiplied by powers of ten until every
//! price in the part scales exactly. The part's ratio is kept in its schema
//! metadata. Volume keeps full decimal precision as a string.
//! Part files and metadata are written to a temporary file and renamed into
//! place.

use super::{BarReader, BarStore, BarTable, BarWriter, OhlcvField, RawArrays, StoreError, StoreMetadata};
use crate::asset::Sid;
use crate::calendar::{get_calendar, TradingCalendar};
use crate::candle::Candle;
use arrow::array::{ArrayRef, Int64Array, StringArray, TimestampMicrosecondArray};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, NaiveDateTime, Utc};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::{ArrowWriter, ProjectionMask};
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

const METADATA_FILE: &str = "metadata.json";
const PART_TS_FORMAT: &str = "%Y%m%dT%H%M%S";
const OHLC_RATIO_KEY: &str = "ohlc_ratio";
const PRICE_FIELDS: [OhlcvField; 4] = [
    OhlcvField::Open,
    OhlcvField::High,
    OhlcvField::Low,
    OhlcvField::Close,
];

/// Bar table schema
pub fn bar_schema() -> Schema {
    Schema::new(vec![
        Field::new(
            "timestamp",
            DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
            false,
        ),
        Field::new("open", DataType::Int64, false),
        Field::new("high", DataType::Int64, false),
        Field::new("low", DataType::Int64, false),
        Field::new("close", DataType::Int64, false),
        Field::new("volume", DataType::Utf8, false), // Store as string for Decimal precision
    ])
}

/// Bar store engine writing Parquet part files
#[derive(Debug, Clone, Copy, Default)]
pub struct ParquetBarStore;

impl ParquetBarStore {
    pub fn new() -> Self {
        Self
    }
}

impl BarStore for ParquetBarStore {
    fn open_reader(&self, dir: &Path) -> Result<Box<dyn BarReader>, StoreError> {
        let metadata =
            load_metadata(dir)?.ok_or_else(|| StoreError::NotFound(dir.to_path_buf()))?;
        let calendar = get_calendar(&metadata.calendar_name).ok_or_else(|| {
            StoreError::InvalidMetadata(format!("unknown calendar {}", metadata.calendar_name))
        })?;

        tracing::debug!(
            path = ?dir,
            start_session = %metadata.start_session,
            end_session = %metadata.end_session,
            "Opened bar reader"
        );

        Ok(Box::new(ParquetBarReader {
            dir: dir.to_path_buf(),
            metadata,
            calendar,
        }))
    }

    fn read_metadata(&self, dir: &Path) -> Result<Option<StoreMetadata>, StoreError> {
        load_metadata(dir)
    }

    fn create_writer(
        &self,
        dir: &Path,
        metadata: StoreMetadata,
    ) -> Result<Box<dyn BarWriter>, StoreError> {
        metadata.validate()?;
        fs::create_dir_all(dir)?;
        save_metadata(dir, &metadata)?;

        tracing::info!(
            path = ?dir,
            start_session = %metadata.start_session,
            end_session = %metadata.end_session,
            "Created bar store"
        );

        Ok(Box::new(ParquetBarWriter {
            dir: dir.to_path_buf(),
            metadata,
        }))
    }

    fn open_writer(
        &self,
        dir: &Path,
        metadata: StoreMetadata,
        write_metadata: bool,
    ) -> Result<Box<dyn BarWriter>, StoreError> {
        metadata.validate()?;
        if write_metadata {
            fs::create_dir_all(dir)?;
            save_metadata(dir, &metadata)?;
            tracing::info!(
                path = ?dir,
                start_session = %metadata.start_session,
                end_session = %metadata.end_session,
                "Extended bar store sessions"
            );
        }

        Ok(Box::new(ParquetBarWriter {
            dir: dir.to_path_buf(),
            metadata,
        }))
    }
}

/// Reader over one bundle directory
///
/// Part files are listed on every query, so bars committed after the reader
/// was opened are visible.
struct ParquetBarReader {
    dir: PathBuf,
    metadata: StoreMetadata,
    calendar: Arc<dyn TradingCalendar>,
}

impl ParquetBarReader {
    fn candles(
        &self,
        sid: Sid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<BTreeMap<DateTime<Utc>, Candle>, StoreError> {
        let fallback_ratio = self.metadata.ohlc_ratio(sid);
        let mut candles = BTreeMap::new();
        for path in part_files(&self.dir, sid, start, end)? {
            for candle in read_part(&path, fallback_ratio)? {
                if candle.timestamp >= start && candle.timestamp <= end {
                    candles.insert(candle.timestamp, candle);
                }
            }
        }
        Ok(candles)
    }
}

impl BarReader for ParquetBarReader {
    fn metadata(&self) -> &StoreMetadata {
        &self.metadata
    }

    fn last_available_dt(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let mut last = None;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_sid_dir = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("sid="));
            if !is_sid_dir || !path.is_dir() {
                continue;
            }
            for part in list_parts(&path)? {
                let part_last = match part_range(&part) {
                    Some((_, part_last)) => Some(part_last),
                    None => read_part_timestamps(&part)?.last().copied(),
                };
                last = last.max(part_last);
            }
        }
        Ok(last)
    }

    fn present_timestamps(
        &self,
        sid: Sid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<BTreeSet<DateTime<Utc>>, StoreError> {
        let mut present = BTreeSet::new();
        for path in part_files(&self.dir, sid, start, end)? {
            present.extend(
                read_part_timestamps(&path)?
                    .into_iter()
                    .filter(|ts| *ts >= start && *ts <= end),
            );
        }
        Ok(present)
    }

    fn covers(&self, sid: Sid, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<bool, StoreError> {
        // Nothing before the first traded bar can be missing
        let start = match self.metadata.first_bar(sid) {
            Some(first_bar) => start.max(first_bar),
            None => start,
        };
        let expected = self
            .metadata
            .granularity
            .periods_in_range(self.calendar.as_ref(), start, end);
        if expected.is_empty() {
            return Ok(true);
        }
        let present = self.present_timestamps(sid, start, end)?;
        Ok(expected.iter().all(|ts| present.contains(ts)))
    }

    fn load_raw_arrays(
        &self,
        fields: &[OhlcvField],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        sids: &[Sid],
    ) -> Result<RawArrays, StoreError> {
        let timestamps = self
            .metadata
            .granularity
            .periods_in_range(self.calendar.as_ref(), start, end);

        let per_sid = sids
            .iter()
            .map(|sid| self.candles(*sid, start, end))
            .collect::<Result<Vec<_>, _>>()?;

        let values = fields
            .iter()
            .map(|field| {
                per_sid
                    .iter()
                    .map(|candles| {
                        timestamps
                            .iter()
                            .map(|ts| candles.get(ts).map(|c| field.of(c)))
                            .collect()
                    })
                    .collect()
            })
            .collect();

        Ok(RawArrays {
            timestamps,
            fields: fields.to_vec(),
            values,
        })
    }
}

/// Writer over one bundle directory
struct ParquetBarWriter {
    dir: PathBuf,
    metadata: StoreMetadata,
}

impl ParquetBarWriter {
    fn validate(&self, table: &BarTable) -> Result<(), StoreError> {
        for pair in table.candles.windows(2) {
            if pair[1].timestamp <= pair[0].timestamp {
                return Err(StoreError::InvalidData(format!(
                    "timestamps for sid {} not strictly increasing at {}",
                    table.sid, pair[1].timestamp
                )));
            }
        }
        for candle in &table.candles {
            if !self.metadata.contains_session(candle.timestamp.date_naive()) {
                return Err(StoreError::OutOfRange {
                    sid: table.sid,
                    timestamp: candle.timestamp,
                    start_session: self.metadata.start_session,
                    end_session: self.metadata.end_session,
                });
            }
        }
        Ok(())
    }

    fn check_overlap(&self, table: &BarTable) -> Result<(), StoreError> {
        let (Some(first), Some(last)) = (table.candles.first(), table.candles.last()) else {
            return Ok(());
        };
        let mut stored = BTreeSet::new();
        for path in part_files(&self.dir, table.sid, first.timestamp, last.timestamp)? {
            stored.extend(read_part_timestamps(&path)?);
        }
        if table.candles.iter().any(|c| stored.contains(&c.timestamp)) {
            return Err(StoreError::OverlappingData {
                sid: table.sid,
                first: first.timestamp,
                last: last.timestamp,
            });
        }
        Ok(())
    }
}

impl BarWriter for ParquetBarWriter {
    fn metadata(&self) -> &StoreMetadata {
        &self.metadata
    }

    fn write(&mut self, tables: &[BarTable]) -> Result<usize, StoreError> {
        let mut seen = HashSet::new();
        for table in tables {
            if !seen.insert(table.sid) {
                return Err(StoreError::InvalidData(format!(
                    "sid {} appears twice in one write",
                    table.sid
                )));
            }
            self.validate(table)?;
        }
        for table in tables {
            self.check_overlap(table)?;
        }

        let mut written = 0;
        for table in tables.iter().filter(|t| !t.is_empty()) {
            let (first, last) = (&table.candles[0], &table.candles[table.len() - 1]);
            let path = sid_dir(&self.dir, table.sid).join(part_name(first.timestamp, last.timestamp));
            let ratio = part_ohlc_ratio(&table.candles, self.metadata.ohlc_ratio(table.sid))?;
            write_part(&path, &table.candles, ratio)?;
            written += table.len();

            tracing::debug!(
                path = ?path,
                sid = table.sid,
                count = table.len(),
                ratio,
                "Wrote bars to Parquet"
            );
        }
        Ok(written)
    }

    fn mark_first_bar(&mut self, sid: Sid, first_bar: DateTime<Utc>) -> Result<(), StoreError> {
        if self.metadata.first_bar(sid) == Some(first_bar) {
            return Ok(());
        }
        self.metadata.first_bars_per_sid.insert(sid, first_bar);
        save_metadata(&self.dir, &self.metadata)
    }
}

fn metadata_path(dir: &Path) -> PathBuf {
    dir.join(METADATA_FILE)
}

fn load_metadata(dir: &Path) -> Result<Option<StoreMetadata>, StoreError> {
    let path = metadata_path(dir);
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path)?;
    let metadata: StoreMetadata = serde_json::from_str(&content)?;
    metadata.validate()?;
    Ok(Some(metadata))
}

fn save_metadata(dir: &Path, metadata: &StoreMetadata) -> Result<(), StoreError> {
    let path = metadata_path(dir);
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, serde_json::to_string_pretty(metadata)?)?;
    rename_into_place(&tmp_path, &path)
}

fn rename_into_place(tmp_path: &Path, path: &Path) -> Result<(), StoreError> {
    fs::rename(tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(tmp_path);
        StoreError::Io(e)
    })
}

fn sid_dir(dir: &Path, sid: Sid) -> PathBuf {
    dir.join(format!("sid={}", sid))
}

fn part_name(first: DateTime<Utc>, last: DateTime<Utc>) -> String {
    format!(
        "{}_{}.parquet",
        first.format(PART_TS_FORMAT),
        last.format(PART_TS_FORMAT)
    )
}

/// First and last bar encoded in a part file name
fn part_range(path: &Path) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let stem = path.file_stem()?.to_str()?;
    let (first, last) = stem.split_once('_')?;
    let first = NaiveDateTime::parse_from_str(first, PART_TS_FORMAT).ok()?;
    let last = NaiveDateTime::parse_from_str(last, PART_TS_FORMAT).ok()?;
    Some((first.and_utc(), last.and_utc()))
}

fn list_parts(sid_dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let mut parts = Vec::new();
    for entry in fs::read_dir(sid_dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("parquet") {
            parts.push(path);
        }
    }
    parts.sort();
    Ok(parts)
}

/// Part files for `sid` that may hold bars in `[start, end]`
fn part_files(
    dir: &Path,
    sid: Sid,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<PathBuf>, StoreError> {
    let sid_dir = sid_dir(dir, sid);
    if !sid_dir.is_dir() {
        return Ok(Vec::new());
    }
    Ok(list_parts(&sid_dir)?
        .into_iter()
        .filter(|path| match part_range(path) {
            Some((first, last)) => first <= end && last >= start,
            None => true,
        })
        .collect())
}

/// Scale `price` to an integer, failing unless the result is exact
fn scale_price(price: Decimal, ratio: u64) -> Result<i64, StoreError> {
    price
        .checked_mul(Decimal::from(ratio))
        .filter(|scaled| scaled.fract().is_zero())
        .and_then(|scaled| scaled.to_i64())
        .ok_or_else(|| {
            StoreError::InvalidData(format!("price {} not representable at ratio {}", price, ratio))
        })
}

/// Smallest `base * 10^k` that scales every OHLC price of `candles` exactly
fn part_ohlc_ratio(candles: &[Candle], base: u64) -> Result<u64, StoreError> {
    let mut ratio = base;
    loop {
        let exact = candles.iter().all(|candle| {
            PRICE_FIELDS
                .iter()
                .all(|field| scale_price(field.of(candle), ratio).is_ok())
        });
        if exact {
            return Ok(ratio);
        }
        ratio = ratio.checked_mul(10).ok_or_else(|| {
            StoreError::InvalidData(format!(
                "prices cannot be stored exactly at any multiple of ratio {}",
                base
            ))
        })?;
    }
}

fn unscale_price(value: i64, ratio: u64) -> Decimal {
    (Decimal::from(value) / Decimal::from(ratio)).normalize()
}

fn write_part(path: &Path, candles: &[Candle], ratio: u64) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let schema = Arc::new(bar_schema().with_metadata(HashMap::from([(
        OHLC_RATIO_KEY.to_string(),
        ratio.to_string(),
    )])));
    let tmp_path = path.with_extension("parquet.tmp");
    let file = File::create(&tmp_path)?;

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();

    let mut writer = ArrowWriter::try_new(file, schema.clone(), Some(props))?;

    let timestamps: Vec<i64> = candles
        .iter()
        .map(|c| c.timestamp.timestamp_micros())
        .collect();
    let scaled = |field: OhlcvField| -> Result<Vec<i64>, StoreError> {
        candles
            .iter()
            .map(|c| scale_price(field.of(c), ratio))
            .collect()
    };
    let volumes: Vec<String> = candles.iter().map(|c| c.volume.to_string()).collect();

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(TimestampMicrosecondArray::from(timestamps).with_timezone("UTC")) as ArrayRef,
            Arc::new(Int64Array::from(scaled(OhlcvField::Open)?)) as ArrayRef,
            Arc::new(Int64Array::from(scaled(OhlcvField::High)?)) as ArrayRef,
            Arc::new(Int64Array::from(scaled(OhlcvField::Low)?)) as ArrayRef,
            Arc::new(Int64Array::from(scaled(OhlcvField::Close)?)) as ArrayRef,
            Arc::new(StringArray::from(
                volumes.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
            )) as ArrayRef,
        ],
    )?;

    writer.write(&batch)?;
    writer.close()?;

    rename_into_place(&tmp_path, path)
}

fn read_part_timestamps(path: &Path) -> Result<Vec<DateTime<Utc>>, StoreError> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let mask = ProjectionMask::roots(builder.parquet_schema(), [0]);
    let reader = builder.with_projection(mask).build()?;

    let mut timestamps = Vec::new();
    for batch_result in reader {
        let batch = batch_result?;
        let column = batch
            .column(0)
            .as_any()
            .downcast_ref::<TimestampMicrosecondArray>()
            .ok_or_else(|| StoreError::InvalidData("Invalid timestamp column".to_string()))?;
        for i in 0..batch.num_rows() {
            timestamps.push(micros_to_datetime(column.value(i))?);
        }
    }
    Ok(timestamps)
}

/// Read a part, unscaling prices by its own ratio or `fallback_ratio`
fn read_part(path: &Path, fallback_ratio: u64) -> Result<Vec<Candle>, StoreError> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let ratio = match builder.schema().metadata().get(OHLC_RATIO_KEY) {
        Some(value) => value
            .parse::<u64>()
            .ok()
            .filter(|ratio| *ratio > 0)
            .ok_or_else(|| {
                StoreError::InvalidData(format!("Invalid ohlc_ratio {} in {:?}", value, path))
            })?,
        None => fallback_ratio,
    };
    let reader = builder.build()?;

    let mut candles = Vec::new();
    for batch_result in reader {
        let batch = batch_result?;

        let timestamps = batch
            .column(0)
            .as_any()
            .downcast_ref::<TimestampMicrosecondArray>()
            .ok_or_else(|| StoreError::InvalidData("Invalid timestamp column".to_string()))?;
        let price_column = |index: usize, name: &str| {
            batch
                .column(index)
                .as_any()
                .downcast_ref::<Int64Array>()
                .ok_or_else(|| StoreError::InvalidData(format!("Invalid {} column", name)))
        };
        let opens = price_column(1, "open")?;
        let highs = price_column(2, "high")?;
        let lows = price_column(3, "low")?;
        let closes = price_column(4, "close")?;
        let volumes = batch
            .column(5)
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| StoreError::InvalidData("Invalid volume column".to_string()))?;

        for i in 0..batch.num_rows() {
            candles.push(Candle {
                timestamp: micros_to_datetime(timestamps.value(i))?,
                open: unscale_price(opens.value(i), ratio),
                high: unscale_price(highs.value(i), ratio),
                low: unscale_price(lows.value(i), ratio),
                close: unscale_price(closes.value(i), ratio),
                volume: Decimal::from_str(volumes.value(i))
                    .map_err(|e| StoreError::InvalidData(format!("volume: {}", e)))?,
            });
        }
    }
    Ok(candles)
}

fn micros_to_datetime(micros: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| StoreError::InvalidData(format!("Invalid timestamp {}", micros)))
}
