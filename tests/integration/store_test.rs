//! Bar store integration tests

use crate::common::{at, candle_at};
use candle_bundle::bundle::{BarStoreHandle, CommitOutcome};
use candle_bundle::candle::{Candle, Granularity};
use candle_bundle::config::BundleConfig;
use candle_bundle::store::{BarStore, BarTable, ParquetBarStore, StoreError, StoreMetadata};
use chrono::{Duration, NaiveDate};
use std::sync::Arc;
use tempfile::TempDir;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn days(start: chrono::DateTime<chrono::Utc>, count: i64) -> Vec<Candle> {
    (0..count).map(|d| candle_at(start + Duration::days(d))).collect()
}

#[test]
fn test_metadata_extends_right_never_truncates() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(ParquetBarStore::new());
    let config = BundleConfig {
        root: temp_dir.path().to_path_buf(),
        ..BundleConfig::default()
    };

    let mut handle = BarStoreHandle::new(store.clone(), "mock", &config).unwrap();
    let january = handle
        .commit(
            &[BarTable::new(1, days(at(2024, 1, 1), 31))],
            Granularity::Daily,
            date(2024, 1, 1),
            date(2024, 1, 31),
        )
        .unwrap();
    assert_eq!(january, CommitOutcome::Written(31));

    // Fresh handle, as a later run would have
    let mut handle = BarStoreHandle::new(store.clone(), "mock", &config).unwrap();
    handle
        .commit(
            &[BarTable::new(1, days(at(2024, 2, 1), 29))],
            Granularity::Daily,
            date(2024, 2, 1),
            date(2024, 2, 29),
        )
        .unwrap();

    let metadata = store
        .read_metadata(&handle.bundle_dir(Granularity::Daily))
        .unwrap()
        .unwrap();
    assert_eq!(metadata.start_session, date(2024, 1, 1));
    assert_eq!(metadata.end_session, date(2024, 2, 29));

    let reader = handle.get_reader(Granularity::Daily).unwrap().unwrap();
    assert!(reader.covers(1, at(2024, 1, 1), at(2024, 2, 29)).unwrap());
}

#[test]
fn test_writer_is_strict_about_existing_rows() {
    let temp_dir = TempDir::new().unwrap();
    let store = ParquetBarStore::new();
    let metadata =
        StoreMetadata::new(Granularity::Daily, "OPEN", date(2024, 1, 1), date(2024, 1, 31), 1440, 1_000_000)
            .unwrap();
    let mut writer = store.create_writer(temp_dir.path(), metadata).unwrap();

    writer
        .write(&[BarTable::new(3, days(at(2024, 1, 1), 10))])
        .unwrap();
    let overlap = writer.write(&[BarTable::new(3, days(at(2024, 1, 8), 5))]);
    assert!(matches!(overlap, Err(StoreError::OverlappingData { sid: 3, .. })));

    let outside = writer.write(&[BarTable::new(3, days(at(2024, 2, 1), 1))]);
    assert!(matches!(outside, Err(StoreError::OutOfRange { sid: 3, .. })));

    // Other sids are independent
    assert_eq!(
        writer
            .write(&[BarTable::new(4, days(at(2024, 1, 1), 10))])
            .unwrap(),
        10
    );
}

#[test]
fn test_weekday_calendar_coverage_skips_weekends() {
    let temp_dir = TempDir::new().unwrap();
    let store = ParquetBarStore::new();
    let metadata = StoreMetadata::new(
        Granularity::Daily,
        "WEEKDAYS",
        date(2024, 1, 1),
        date(2024, 1, 31),
        1440,
        1_000_000,
    )
    .unwrap();
    let mut writer = store.create_writer(temp_dir.path(), metadata).unwrap();

    // Mon 1st to Fri 5th, then Mon 8th
    let mut candles = days(at(2024, 1, 1), 5);
    candles.push(candle_at(at(2024, 1, 8)));
    writer.write(&[BarTable::new(1, candles)]).unwrap();

    let reader = store.open_reader(temp_dir.path()).unwrap();
    assert!(reader.covers(1, at(2024, 1, 1), at(2024, 1, 8)).unwrap());
    assert!(!reader.covers(1, at(2024, 1, 1), at(2024, 1, 9)).unwrap());
    assert_eq!(reader.last_available_dt().unwrap(), Some(at(2024, 1, 8)));
}
