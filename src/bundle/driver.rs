//! Ingestion driver for one exchange

use super::dates::{adjust_dates, last_session_date};
use super::planner::plan_chunks;
use super::{
    BarStoreHandle, BundleError, CandleIngestor, ChunkOutcome, CommitOutcome, IngestLock,
    IngestOptions, IngestProgress, IngestSource, IngestSummary,
};
use crate::asset::{Asset, SymbolCache};
use crate::candle::Granularity;
use crate::config::{BundleConfig, IngestConfig};
use crate::exchange::Exchange;
use crate::store::BarStore;
use crate::telemetry::{increment_counter, CounterMetric};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Ingests an exchange's candles into its bar bundles
pub struct ExchangeBundle {
    exchange: Arc<dyn Exchange>,
    symbols: SymbolCache,
    handle: BarStoreHandle,
    ingestor: CandleIngestor,
}

impl ExchangeBundle {
    pub fn new(
        exchange: Arc<dyn Exchange>,
        store: Arc<dyn BarStore>,
        bundle: &BundleConfig,
        ingest: &IngestConfig,
    ) -> Result<Self, BundleError> {
        let handle = BarStoreHandle::new(store, exchange.name(), bundle)?;
        let ingestor = CandleIngestor::new(
            exchange.clone(),
            handle.calendar(),
            ingest.fetch_timeout(),
        );

        Ok(Self {
            symbols: SymbolCache::new(exchange.clone()),
            exchange,
            handle,
            ingestor,
        })
    }

    pub fn handle(&self) -> &BarStoreHandle {
        &self.handle
    }

    pub fn handle_mut(&mut self) -> &mut BarStoreHandle {
        &mut self.handle
    }

    pub fn symbols(&self) -> &SymbolCache {
        &self.symbols
    }

    /// Assets to ingest
    ///
    /// `include` symbols are resolved through the symbol cache; otherwise the
    /// exchange's full listing is used. `exclude` matches case-insensitively.
    pub async fn get_assets(
        &self,
        include: Option<&[String]>,
        exclude: &[String],
    ) -> Result<Vec<Asset>, BundleError> {
        let mut assets = match include {
            Some(symbols) => {
                let mut assets = Vec::with_capacity(symbols.len());
                for symbol in symbols {
                    assets.push(self.symbols.resolve(symbol, None, false).await?);
                }
                assets
            }
            None => self.exchange.get_assets(None).await?,
        };

        if !exclude.is_empty() {
            assets.retain(|asset| {
                !exclude
                    .iter()
                    .any(|symbol| symbol.eq_ignore_ascii_case(&asset.symbol))
            });
        }
        Ok(assets)
    }

    /// Bring the bundle for `options.granularity` up to date
    ///
    /// Plans the missing monthly chunks and ingests them in `period_end`
    /// order. `cancel` is checked between chunks; committed chunks stay
    /// committed and a re-run resumes with the rest.
    pub async fn ingest(
        &mut self,
        options: &IngestOptions,
        progress: &dyn IngestProgress,
        cancel: &AtomicBool,
    ) -> Result<IngestSummary, BundleError> {
        let granularity = options.granularity;
        let assets = self
            .get_assets(options.include_symbols.as_deref(), &options.exclude_symbols)
            .await?;

        let mut summary = IngestSummary {
            assets: assets.len(),
            ..IngestSummary::default()
        };
        if assets.is_empty() {
            tracing::warn!(exchange = %self.exchange.name(), "No assets to ingest");
            progress.on_finish(&summary);
            return Ok(summary);
        }

        // Bars opening at or after `now` are still forming
        let now = granularity.truncate(Utc::now());
        let (start, end) = adjust_dates(options.start, options.end, &assets, now)?;
        tracing::info!(
            exchange = %self.exchange.name(),
            granularity = %granularity,
            assets = assets.len(),
            start = %start,
            end = %end,
            "Planning ingestion"
        );

        let _lock = IngestLock::acquire(&self.handle.bundle_dir(granularity))?;

        let calendar = self.handle.calendar();
        let reader = self.handle.get_reader(granularity)?;
        let chunks = plan_chunks(
            &assets,
            options.start,
            options.end,
            granularity,
            calendar.as_ref(),
            reader,
            now,
        );
        summary.chunks_planned = chunks.len();
        increment_counter(CounterMetric::ChunksPlanned, chunks.len() as u64);

        if chunks.is_empty() {
            tracing::info!(granularity = %granularity, "Bundle already up to date");
            progress.on_finish(&summary);
            return Ok(summary);
        }

        self.handle
            .get_writer(start.date_naive(), last_session_date(end), granularity)?;
        progress.on_start(chunks.len());

        let mut previous = HashMap::new();
        for (index, chunk) in chunks.iter().enumerate() {
            if cancel.load(Ordering::SeqCst) {
                tracing::warn!(
                    remaining = chunks.len() - index,
                    "Ingestion cancelled, stopping before next chunk"
                );
                summary.cancelled = true;
                break;
            }

            let outcome = match options.source {
                IngestSource::Exchange => {
                    let bar_count = chunk.periods(calendar.as_ref()).len();
                    self.ingestor
                        .ingest_chunk(chunk, bar_count, &mut self.handle, &mut previous)
                        .await?
                }
                IngestSource::ChunkCache => {
                    match self.ingestor.import_chunk(
                        &chunk.asset,
                        granularity,
                        &chunk.period,
                        &mut self.handle,
                    ) {
                        Ok(outcome) => outcome,
                        Err(BundleError::ChunkNotCached(path)) => {
                            tracing::warn!(path = ?path, "Chunk not cached, skipping");
                            ChunkOutcome::NoData
                        }
                        Err(e) => return Err(e),
                    }
                }
            };

            match outcome {
                ChunkOutcome::Committed(CommitOutcome::Written(rows)) => {
                    summary.chunks_written += 1;
                    summary.rows_written += rows;
                    increment_counter(CounterMetric::ChunksWritten, 1);
                    increment_counter(CounterMetric::RowsWritten, rows as u64);
                }
                _ => {
                    summary.chunks_skipped += 1;
                    increment_counter(CounterMetric::ChunksSkipped, 1);
                }
            }
            progress.on_chunk(index, chunks.len(), chunk, &outcome);
        }

        progress.on_finish(&summary);
        Ok(summary)
    }

    /// Import one cached chunk bundle for `asset`
    pub fn ingest_ctable(
        &mut self,
        asset: &Asset,
        granularity: Granularity,
        period: &str,
    ) -> Result<ChunkOutcome, BundleError> {
        let _lock = IngestLock::acquire(&self.handle.bundle_dir(granularity))?;
        self.ingestor
            .import_chunk(asset, granularity, period, &mut self.handle)
    }
}
