//! End-to-end ingestion tests

use crate::common::{asset, at, candle_at, exchange_bundle, MockExchange};
use candle_bundle::asset::AssetError;
use candle_bundle::bundle::{
    BundleError, Chunk, ChunkOutcome, IngestLock, IngestOptions, IngestProgress,
    IngestSource, IngestSummary, NoProgress, LOCK_FILE,
};
use candle_bundle::candle::{Candle, Granularity};
use candle_bundle::store::{BarStore, BarTable, OhlcvField, ParquetBarStore, StoreMetadata};
use chrono::{Duration, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

fn daily_options(
    start: Option<chrono::DateTime<Utc>>,
    end: chrono::DateTime<Utc>,
) -> IngestOptions {
    IngestOptions {
        start,
        end: Some(end),
        ..IngestOptions::new(Granularity::Daily)
    }
}

#[derive(Default)]
struct RecordingProgress {
    total: Mutex<Option<usize>>,
    chunks: Mutex<Vec<(String, ChunkOutcome)>>,
    finished: Mutex<Option<IngestSummary>>,
}

impl IngestProgress for RecordingProgress {
    fn on_start(&self, total: usize) {
        *self.total.lock().unwrap() = Some(total);
    }

    fn on_chunk(&self, _index: usize, _total: usize, chunk: &Chunk, outcome: &ChunkOutcome) {
        self.chunks
            .lock()
            .unwrap()
            .push((chunk.period.clone(), *outcome));
    }

    fn on_finish(&self, summary: &IngestSummary) {
        *self.finished.lock().unwrap() = Some(summary.clone());
    }
}

#[tokio::test]
async fn test_listing_clamped_daily_ingest_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let exchange = Arc::new(MockExchange::new(vec![asset(1, "XUSDT", at(2024, 1, 10))]));
    let mut bundle = exchange_bundle(temp_dir.path(), exchange.clone());
    let options = daily_options(Some(at(2023, 1, 1)), at(2024, 2, 1));
    let cancel = AtomicBool::new(false);

    let summary = bundle.ingest(&options, &NoProgress, &cancel).await.unwrap();
    assert_eq!(summary.chunks_planned, 1);
    assert_eq!(summary.chunks_written, 1);
    assert_eq!(summary.rows_written, 22);
    assert_eq!(exchange.history_calls(), 1);

    let reader = bundle
        .handle_mut()
        .get_reader(Granularity::Daily)
        .unwrap()
        .unwrap();
    let stored = reader
        .present_timestamps(1, at(2024, 1, 1), at(2024, 1, 31))
        .unwrap();
    assert_eq!(stored.len(), 22);
    assert_eq!(stored.first(), Some(&at(2024, 1, 10)));
    assert_eq!(stored.last(), Some(&at(2024, 1, 31)));

    let rerun = bundle.ingest(&options, &NoProgress, &cancel).await.unwrap();
    assert_eq!(rerun.chunks_planned, 0);
    assert_eq!(rerun.rows_written, 0);
    assert_eq!(exchange.history_calls(), 1);
}

#[tokio::test]
async fn test_minute_gap_forward_filled() {
    let temp_dir = TempDir::new().unwrap();
    let gap = Utc.with_ymd_and_hms(2024, 3, 1, 3, 0, 0).unwrap();
    let exchange = Arc::new(
        MockExchange::new(vec![asset(7, "BTCUSDT", at(2024, 3, 1))]).with_gap(7, gap),
    );
    let mut bundle = exchange_bundle(temp_dir.path(), exchange);
    let options = IngestOptions {
        end: Some(Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap()),
        ..IngestOptions::new(Granularity::Minute)
    };

    let summary = bundle
        .ingest(&options, &NoProgress, &AtomicBool::new(false))
        .await
        .unwrap();
    assert_eq!(summary.rows_written, 360);

    let reader = bundle
        .handle_mut()
        .get_reader(Granularity::Minute)
        .unwrap()
        .unwrap();
    let filled = reader
        .load_raw_arrays(&OhlcvField::ALL, gap, gap, &[7])
        .unwrap()
        .candles(0);
    let before = candle_at(gap - Duration::minutes(1));

    assert_eq!(filled.len(), 1);
    assert_eq!(filled[0], Candle::flat(gap, before.close));
    assert_eq!(filled[0].volume, Decimal::ZERO);
}

#[tokio::test]
async fn test_extending_end_ingests_only_new_month() {
    let temp_dir = TempDir::new().unwrap();
    let exchange = Arc::new(MockExchange::new(vec![asset(1, "XUSDT", at(2024, 1, 1))]));
    let mut bundle = exchange_bundle(temp_dir.path(), exchange);
    let cancel = AtomicBool::new(false);
    let progress = RecordingProgress::default();

    let first = bundle
        .ingest(&daily_options(None, at(2024, 4, 1)), &progress, &cancel)
        .await
        .unwrap();
    assert_eq!(first.chunks_planned, 3);
    assert_eq!(first.rows_written, 31 + 29 + 31);
    assert_eq!(*progress.total.lock().unwrap(), Some(3));
    let periods: Vec<String> = progress
        .chunks
        .lock()
        .unwrap()
        .iter()
        .map(|(period, _)| period.clone())
        .collect();
    assert_eq!(periods, vec!["2024-1", "2024-2", "2024-3"]);
    assert_eq!(progress.finished.lock().unwrap().as_ref(), Some(&first));

    let second = bundle
        .ingest(&daily_options(None, at(2024, 5, 1)), &NoProgress, &cancel)
        .await
        .unwrap();
    assert_eq!(second.chunks_planned, 1);
    assert_eq!(second.rows_written, 30);

    let metadata = ParquetBarStore::new()
        .read_metadata(&bundle.handle().bundle_dir(Granularity::Daily))
        .unwrap()
        .unwrap();
    assert_eq!(metadata.start_session, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
    assert_eq!(metadata.end_session, NaiveDate::from_ymd_opt(2024, 4, 30).unwrap());
}

#[tokio::test]
async fn test_cancelled_run_stops_before_fetching() {
    let temp_dir = TempDir::new().unwrap();
    let exchange = Arc::new(MockExchange::new(vec![asset(1, "XUSDT", at(2024, 1, 1))]));
    let mut bundle = exchange_bundle(temp_dir.path(), exchange.clone());

    let summary = bundle
        .ingest(
            &daily_options(None, at(2024, 3, 1)),
            &NoProgress,
            &AtomicBool::new(true),
        )
        .await
        .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.chunks_planned, 2);
    assert_eq!(summary.chunks_written, 0);
    assert_eq!(exchange.history_calls(), 0);
    assert!(!bundle
        .handle()
        .bundle_dir(Granularity::Daily)
        .join(LOCK_FILE)
        .exists());
}

#[tokio::test]
async fn test_locked_bundle_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let exchange = Arc::new(MockExchange::new(vec![asset(1, "XUSDT", at(2024, 1, 1))]));
    let mut bundle = exchange_bundle(temp_dir.path(), exchange.clone());
    let _held = IngestLock::acquire(&bundle.handle().bundle_dir(Granularity::Daily)).unwrap();

    let result = bundle
        .ingest(
            &daily_options(None, at(2024, 2, 1)),
            &NoProgress,
            &AtomicBool::new(false),
        )
        .await;

    assert!(matches!(result, Err(BundleError::StoreLocked { .. })));
    assert_eq!(exchange.history_calls(), 0);
}

#[tokio::test]
async fn test_exclude_symbols() {
    let temp_dir = TempDir::new().unwrap();
    let exchange = Arc::new(MockExchange::new(vec![
        asset(1, "BTCUSDT", at(2024, 1, 1)),
        asset(2, "ETHUSDT", at(2024, 1, 1)),
    ]));
    let mut bundle = exchange_bundle(temp_dir.path(), exchange);
    let options = IngestOptions {
        exclude_symbols: vec!["ethusdt".to_string()],
        ..daily_options(None, at(2024, 2, 1))
    };

    let summary = bundle
        .ingest(&options, &NoProgress, &AtomicBool::new(false))
        .await
        .unwrap();

    assert_eq!(summary.assets, 1);
    assert_eq!(summary.rows_written, 31);
    let reader = bundle
        .handle_mut()
        .get_reader(Granularity::Daily)
        .unwrap()
        .unwrap();
    assert!(reader
        .present_timestamps(2, at(2024, 1, 1), at(2024, 1, 31))
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_unknown_include_symbol_fails() {
    let temp_dir = TempDir::new().unwrap();
    let exchange = Arc::new(MockExchange::new(vec![asset(1, "BTCUSDT", at(2024, 1, 1))]));
    let mut bundle = exchange_bundle(temp_dir.path(), exchange);
    let options = IngestOptions {
        include_symbols: Some(vec!["DOGEUSDT".to_string()]),
        ..daily_options(None, at(2024, 2, 1))
    };

    let result = bundle
        .ingest(&options, &NoProgress, &AtomicBool::new(false))
        .await;

    assert!(matches!(
        result,
        Err(BundleError::Asset(AssetError::SymbolNotFound(ref symbol))) if symbol == "DOGEUSDT"
    ));
}

#[tokio::test]
async fn test_import_from_chunk_cache() {
    let temp_dir = TempDir::new().unwrap();
    let exchange = Arc::new(MockExchange::new(vec![asset(1, "BTCUSDT", at(2024, 1, 1))]));
    let mut bundle = exchange_bundle(temp_dir.path(), exchange.clone());

    // Only January was cached
    let cache_dir = bundle
        .handle()
        .chunk_cache_dir("BTCUSDT", Granularity::Daily, "2024-1");
    let metadata = StoreMetadata::new(
        Granularity::Daily,
        "OPEN",
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        1440,
        1_000_000,
    )
    .unwrap();
    let candles = (0..31).map(|d| candle_at(at(2024, 1, 1) + Duration::days(d))).collect();
    ParquetBarStore::new()
        .create_writer(&cache_dir, metadata)
        .unwrap()
        .write(&[BarTable::new(1, candles)])
        .unwrap();

    let options = IngestOptions {
        source: IngestSource::ChunkCache,
        ..daily_options(None, at(2024, 3, 1))
    };
    let cancel = AtomicBool::new(false);

    let summary = bundle.ingest(&options, &NoProgress, &cancel).await.unwrap();
    assert_eq!(summary.chunks_planned, 2);
    assert_eq!(summary.chunks_written, 1);
    assert_eq!(summary.chunks_skipped, 1);
    assert_eq!(summary.rows_written, 31);
    assert_eq!(exchange.history_calls(), 0);

    // February is still missing
    let rerun = bundle.ingest(&options, &NoProgress, &cancel).await.unwrap();
    assert_eq!(rerun.chunks_planned, 1);

    // Importing January again is a no-op
    let asset = asset(1, "BTCUSDT", at(2024, 1, 1));
    let outcome = bundle
        .ingest_ctable(&asset, Granularity::Daily, "2024-1")
        .unwrap();
    assert_eq!(outcome, ChunkOutcome::UpToDate);
}

#[tokio::test]
async fn test_chunk_import_respects_lock() {
    let temp_dir = TempDir::new().unwrap();
    let exchange = Arc::new(MockExchange::new(vec![asset(1, "BTCUSDT", at(2024, 1, 1))]));
    let mut bundle = exchange_bundle(temp_dir.path(), exchange);
    let asset = asset(1, "BTCUSDT", at(2024, 1, 1));
    let held = IngestLock::acquire(&bundle.handle().bundle_dir(Granularity::Daily)).unwrap();

    let result = bundle.ingest_ctable(&asset, Granularity::Daily, "2024-1");
    assert!(matches!(result, Err(BundleError::StoreLocked { .. })));

    drop(held);
    let result = bundle.ingest_ctable(&asset, Granularity::Daily, "2024-1");
    assert!(matches!(result, Err(BundleError::ChunkNotCached(_))));
}

#[tokio::test]
async fn test_gap_at_listing_minute_not_replanned() {
    let temp_dir = TempDir::new().unwrap();
    let listed = at(2024, 3, 1);
    let exchange = Arc::new(
        MockExchange::new(vec![asset(7, "BTCUSDT", listed)]).with_gap(7, listed),
    );
    let mut bundle = exchange_bundle(temp_dir.path(), exchange.clone());
    let options = IngestOptions {
        end: Some(Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap()),
        ..IngestOptions::new(Granularity::Minute)
    };
    let cancel = AtomicBool::new(false);

    let first = bundle.ingest(&options, &NoProgress, &cancel).await.unwrap();
    assert_eq!(first.chunks_written, 1);
    // The listing minute never traded and has nothing to carry forward
    assert_eq!(first.rows_written, 359);
    assert_eq!(exchange.history_calls(), 1);

    for _ in 0..2 {
        let rerun = bundle.ingest(&options, &NoProgress, &cancel).await.unwrap();
        assert_eq!(rerun.chunks_planned, 0);
        assert_eq!(rerun.rows_written, 0);
    }
    assert_eq!(exchange.history_calls(), 1);

    // A fresh handle reads the first traded minute from disk
    let mut reopened = exchange_bundle(temp_dir.path(), exchange.clone());
    let summary = reopened.ingest(&options, &NoProgress, &cancel).await.unwrap();
    assert_eq!(summary.chunks_planned, 0);
}

#[tokio::test]
async fn test_resumed_run_fills_month_opening_gap() {
    let temp_dir = TempDir::new().unwrap();
    let exchange = Arc::new(
        MockExchange::new(vec![asset(1, "XUSDT", at(2024, 1, 1))]).with_gap(1, at(2024, 2, 1)),
    );
    let mut bundle = exchange_bundle(temp_dir.path(), exchange.clone());
    let cancel = AtomicBool::new(false);

    bundle
        .ingest(&daily_options(None, at(2024, 2, 1)), &NoProgress, &cancel)
        .await
        .unwrap();

    let resumed = bundle
        .ingest(&daily_options(None, at(2024, 3, 1)), &NoProgress, &cancel)
        .await
        .unwrap();
    assert_eq!(resumed.chunks_planned, 1);
    assert_eq!(resumed.rows_written, 29);
    // Seeded from the stored Jan 31 bar, no extra request
    assert_eq!(exchange.history_calls(), 2);

    let reader = bundle
        .handle_mut()
        .get_reader(Granularity::Daily)
        .unwrap()
        .unwrap();
    let filled = reader
        .load_raw_arrays(&OhlcvField::ALL, at(2024, 2, 1), at(2024, 2, 1), &[1])
        .unwrap()
        .candles(0);
    assert_eq!(filled, vec![Candle::flat(at(2024, 2, 1), candle_at(at(2024, 1, 31)).close)]);

    let rerun = bundle
        .ingest(&daily_options(None, at(2024, 3, 1)), &NoProgress, &cancel)
        .await
        .unwrap();
    assert_eq!(rerun.chunks_planned, 0);
}

#[tokio::test]
async fn test_open_bar_never_committed() {
    let temp_dir = TempDir::new().unwrap();
    let today = Granularity::Daily.truncate(Utc::now());
    let exchange = Arc::new(MockExchange::new(vec![asset(1, "XUSDT", at(2020, 1, 1))]));
    let mut bundle = exchange_bundle(temp_dir.path(), exchange);
    let options = IngestOptions {
        start: Some(today - Duration::days(3)),
        ..IngestOptions::new(Granularity::Daily)
    };

    let summary = bundle
        .ingest(&options, &NoProgress, &AtomicBool::new(false))
        .await
        .unwrap();
    let still_open = Granularity::Daily.truncate(Utc::now());

    assert!(summary.rows_written >= 3);
    let reader = bundle
        .handle_mut()
        .get_reader(Granularity::Daily)
        .unwrap()
        .unwrap();
    let stored = reader
        .present_timestamps(1, today - Duration::days(3), still_open + Duration::days(1))
        .unwrap();
    assert!(stored.iter().all(|ts| *ts < still_open));
    assert!(stored.last().is_some_and(|last| *last >= today - Duration::days(1)));
}
