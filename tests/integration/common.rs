//! Shared fixtures for integration tests

use async_trait::async_trait;
use candle_bundle::asset::{Asset, AssetError, Sid};
use candle_bundle::bundle::ExchangeBundle;
use candle_bundle::candle::{Candle, Granularity};
use candle_bundle::config::{BundleConfig, IngestConfig};
use candle_bundle::exchange::{Exchange, ExchangeError};
use candle_bundle::store::ParquetBarStore;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
}

pub fn asset(sid: Sid, symbol: &str, start_date: DateTime<Utc>) -> Asset {
    Asset {
        sid,
        symbol: symbol.to_string(),
        exchange: "mock".to_string(),
        start_date,
        end_date: None,
    }
}

/// Deterministic candle for a bar open
pub fn candle_at(ts: DateTime<Utc>) -> Candle {
    let close = Decimal::from(100 + (ts.timestamp() / 60) % 50);
    Candle {
        timestamp: ts,
        open: close - Decimal::ONE,
        high: close + Decimal::TWO,
        low: close - Decimal::TWO,
        close,
        volume: Decimal::from(10),
    }
}

/// Exchange serving synthetic candles from each asset's listing onwards
pub struct MockExchange {
    assets: Vec<Asset>,
    gaps: HashSet<(Sid, DateTime<Utc>)>,
    history_calls: AtomicUsize,
}

impl MockExchange {
    pub fn new(assets: Vec<Asset>) -> Self {
        Self {
            assets,
            gaps: HashSet::new(),
            history_calls: AtomicUsize::new(0),
        }
    }

    /// Leave out the bar opening at `ts`
    pub fn with_gap(mut self, sid: Sid, ts: DateTime<Utc>) -> Self {
        self.gaps.insert((sid, ts));
        self
    }

    pub fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Exchange for MockExchange {
    fn name(&self) -> &str {
        "mock"
    }

    async fn get_asset(
        &self,
        symbol: &str,
        _as_of: Option<DateTime<Utc>>,
        _fuzzy: bool,
    ) -> Result<Asset, AssetError> {
        self.assets
            .iter()
            .find(|a| a.symbol.eq_ignore_ascii_case(symbol))
            .cloned()
            .ok_or_else(|| AssetError::SymbolNotFound(symbol.to_string()))
    }

    async fn get_asset_by_sid(&self, sid: Sid) -> Result<Asset, AssetError> {
        self.assets
            .iter()
            .find(|a| a.sid == sid)
            .cloned()
            .ok_or(AssetError::SidsNotFound(vec![sid]))
    }

    async fn get_assets(&self, symbols: Option<&[String]>) -> Result<Vec<Asset>, AssetError> {
        Ok(match symbols {
            Some(symbols) => self
                .assets
                .iter()
                .filter(|a| symbols.contains(&a.symbol))
                .cloned()
                .collect(),
            None => self.assets.clone(),
        })
    }

    async fn get_history(
        &self,
        assets: &[Asset],
        end_dt: DateTime<Utc>,
        bar_count: usize,
        granularity: Granularity,
        _fallback: bool,
    ) -> Result<HashMap<Sid, Vec<Candle>>, ExchangeError> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        let step = granularity.bar_duration();

        let mut history = HashMap::new();
        for asset in assets {
            let candles: Vec<Candle> = (0..bar_count as i32)
                .rev()
                .map(|i| end_dt - step * i)
                .filter(|ts| *ts >= asset.start_date)
                .filter(|ts| !self.gaps.contains(&(asset.sid, *ts)))
                .map(candle_at)
                .collect();
            history.insert(asset.sid, candles);
        }
        Ok(history)
    }
}

pub fn bundle_config(root: &Path) -> BundleConfig {
    BundleConfig {
        root: root.to_path_buf(),
        ..BundleConfig::default()
    }
}

pub fn exchange_bundle(root: &Path, exchange: Arc<MockExchange>) -> ExchangeBundle {
    ExchangeBundle::new(
        exchange,
        Arc::new(ParquetBarStore::new()),
        &bundle_config(root),
        &IngestConfig::default(),
    )
    .unwrap()
}
