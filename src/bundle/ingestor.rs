//! Chunk ingestion: fetch, forward-fill, commit

use super::ffill::ffill_candles;
use super::{BarStoreHandle, BundleError, Chunk, ChunkOutcome};
use crate::asset::{Asset, Sid};
use crate::calendar::TradingCalendar;
use crate::candle::{Candle, Granularity};
use crate::exchange::Exchange;
use crate::store::{BarTable, OhlcvField, StoreError};
use crate::telemetry::{record_latency, LatencyMetric};
use chrono::{DateTime, NaiveTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Turns planned chunks into committed bar tables
pub struct CandleIngestor {
    exchange: Arc<dyn Exchange>,
    calendar: Arc<dyn TradingCalendar>,
    fetch_timeout: Duration,
}

impl CandleIngestor {
    pub fn new(
        exchange: Arc<dyn Exchange>,
        calendar: Arc<dyn TradingCalendar>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            exchange,
            calendar,
            fetch_timeout,
        }
    }

    /// Fetch the last `bar_count` bars of a chunk's window and commit them
    ///
    /// `previous` carries each asset's last filled candle across chunks so
    /// forward-fill continues over chunk boundaries. Without one, a gap at
    /// the window's first bar is seeded from the last stored bar or a short
    /// exchange lookback. Rows the store already holds are dropped before
    /// the commit.
    pub async fn ingest_chunk(
        &self,
        chunk: &Chunk,
        bar_count: usize,
        handle: &mut BarStoreHandle,
        previous: &mut HashMap<Sid, Candle>,
    ) -> Result<ChunkOutcome, BundleError> {
        let sid = chunk.asset.sid;
        let granularity = chunk.granularity;
        let periods = chunk.periods(self.calendar.as_ref());
        let dense = &periods[periods.len().saturating_sub(bar_count)..];
        let (Some(&first_open), Some(&end_dt)) = (dense.first(), dense.last()) else {
            tracing::debug!(symbol = %chunk.asset.symbol, period = %chunk.period, "No sessions in chunk");
            return Ok(ChunkOutcome::NoData);
        };

        let slots = bar_slots(first_open, end_dt, granularity);
        let raw = self.fetch(&chunk.asset, end_dt, slots, granularity).await?;
        if raw.is_empty() {
            tracing::debug!(
                symbol = %chunk.asset.symbol,
                period = %chunk.period,
                end = %end_dt,
                "No candles returned, skipping"
            );
            return Ok(ChunkOutcome::NoData);
        }

        let seed = match previous.get(&sid) {
            Some(candle) => Some(candle.clone()),
            None if opens_with_gap(&raw, first_open, granularity) => {
                self.find_seed(&chunk.asset, first_open, granularity, handle)
                    .await?
            }
            None => None,
        };
        let candles = ffill_candles(&raw, dense, granularity, seed.as_ref());
        let (Some(first), Some(last)) = (candles.first(), candles.last()) else {
            return Ok(ChunkOutcome::NoData);
        };
        previous.insert(sid, last.clone());

        // Leading bars were dropped with nothing traded before them
        let first_trade = (first.timestamp > first_open
            && chunk.window_start <= chunk.asset.start_date)
            .then_some(first.timestamp);

        tracing::debug!(
            symbol = %chunk.asset.symbol,
            period = %chunk.period,
            raw = raw.len(),
            filled = candles.len(),
            seeded = seed.is_some(),
            "Forward-filled candles"
        );

        let outcome = commit_new_rows(handle, sid, granularity, candles)?;
        if let Some(first_trade) = first_trade {
            handle.mark_first_bar(granularity, sid, first_trade)?;
        }
        Ok(outcome)
    }

    async fn fetch(
        &self,
        asset: &Asset,
        end_dt: DateTime<Utc>,
        bar_count: usize,
        granularity: Granularity,
    ) -> Result<Vec<Candle>, BundleError> {
        let started = Instant::now();
        let fetch = self.exchange.get_history(
            std::slice::from_ref(asset),
            end_dt,
            bar_count,
            granularity,
            false,
        );
        let mut history = tokio::time::timeout(self.fetch_timeout, fetch)
            .await
            .map_err(|_| BundleError::FetchTimeout {
                symbol: asset.symbol.clone(),
                timeout: self.fetch_timeout,
            })??;
        record_latency(LatencyMetric::Fetch, started.elapsed());
        Ok(history.remove(&asset.sid).unwrap_or_default())
    }

    /// Last candle before `before`: stored, else from the exchange
    async fn find_seed(
        &self,
        asset: &Asset,
        before: DateTime<Utc>,
        granularity: Granularity,
        handle: &mut BarStoreHandle,
    ) -> Result<Option<Candle>, BundleError> {
        if let Some(candle) = stored_seed(handle, asset, before, granularity)? {
            return Ok(Some(candle));
        }
        if before <= asset.start_date {
            return Ok(None);
        }

        let lookback_end = before - granularity.bar_duration();
        let lookback = self
            .fetch(asset, lookback_end, seed_lookback(granularity), granularity)
            .await?;
        Ok(lookback.into_iter().rev().find(|c| c.timestamp < before))
    }

    /// Import an out-of-band cached chunk bundle into the main store
    ///
    /// Reads the cached bundle's whole window and commits its complete rows
    /// in ascending order.
    pub fn import_chunk(
        &self,
        asset: &Asset,
        granularity: Granularity,
        period: &str,
        handle: &mut BarStoreHandle,
    ) -> Result<ChunkOutcome, BundleError> {
        let cached = handle.open_chunk_cache(&asset.symbol, granularity, period)?;
        let Some(last) = cached.last_available_dt()? else {
            return Ok(ChunkOutcome::NoData);
        };
        let first = cached.first_trading_day().and_time(NaiveTime::MIN).and_utc();

        let arrays = cached.load_raw_arrays(&OhlcvField::ALL, first, last, &[asset.sid])?;
        let mut candles = arrays.candles(0);
        candles.sort_by_key(|c| c.timestamp);

        tracing::debug!(
            symbol = %asset.symbol,
            period,
            rows = candles.len(),
            "Loaded cached chunk"
        );

        commit_new_rows(handle, asset.sid, granularity, candles)
    }
}

/// Bar slots from `first` to `last` inclusive, ignoring the calendar
fn bar_slots(first: DateTime<Utc>, last: DateTime<Utc>, granularity: Granularity) -> usize {
    let bar = granularity.bar_duration().num_seconds();
    ((last - first).num_seconds() / bar).max(0) as usize + 1
}

/// One day of minutes, one week of days
fn seed_lookback(granularity: Granularity) -> usize {
    match granularity {
        Granularity::Minute => 1440,
        Granularity::Daily => 7,
    }
}

fn opens_with_gap(raw: &[Candle], first_open: DateTime<Utc>, granularity: Granularity) -> bool {
    !raw.iter().any(|c| granularity.truncate(c.timestamp) == first_open)
}

fn stored_seed(
    handle: &mut BarStoreHandle,
    asset: &Asset,
    before: DateTime<Utc>,
    granularity: Granularity,
) -> Result<Option<Candle>, StoreError> {
    let Some(reader) = handle.get_reader(granularity)? else {
        return Ok(None);
    };
    let stored = reader.present_timestamps(
        asset.sid,
        asset.start_date,
        before - chrono::Duration::nanoseconds(1),
    )?;
    let Some(&last) = stored.last() else {
        return Ok(None);
    };
    let arrays = reader.load_raw_arrays(&OhlcvField::ALL, last, last, &[asset.sid])?;
    Ok(arrays.candles(0).pop())
}

fn commit_new_rows(
    handle: &mut BarStoreHandle,
    sid: Sid,
    granularity: Granularity,
    candles: Vec<Candle>,
) -> Result<ChunkOutcome, BundleError> {
    let candles = drop_stored(handle, sid, granularity, candles)?;
    let (Some(first), Some(last)) = (candles.first(), candles.last()) else {
        return Ok(ChunkOutcome::UpToDate);
    };
    let (start_session, end_session) = (first.timestamp.date_naive(), last.timestamp.date_naive());

    handle.ensure_writer_covers(start_session, end_session, granularity)?;
    let outcome = handle.commit(
        &[BarTable::new(sid, candles)],
        granularity,
        start_session,
        end_session,
    )?;
    Ok(ChunkOutcome::Committed(outcome))
}

fn drop_stored(
    handle: &mut BarStoreHandle,
    sid: Sid,
    granularity: Granularity,
    candles: Vec<Candle>,
) -> Result<Vec<Candle>, StoreError> {
    let (Some(first), Some(last)) = (candles.first(), candles.last()) else {
        return Ok(candles);
    };
    let Some(reader) = handle.get_reader(granularity)? else {
        return Ok(candles);
    };

    let stored = reader.present_timestamps(sid, first.timestamp, last.timestamp)?;
    if stored.is_empty() {
        return Ok(candles);
    }
    Ok(candles
        .into_iter()
        .filter(|c| !stored.contains(&c.timestamp))
        .collect())
}
