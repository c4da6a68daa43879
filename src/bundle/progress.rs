//! Ingestion progress reporting

use super::{Chunk, ChunkOutcome, IngestSummary};

/// Observer of an ingestion run
pub trait IngestProgress: Send + Sync {
    fn on_start(&self, _total: usize) {}

    /// Called after each chunk; `index` is zero-based
    fn on_chunk(&self, _index: usize, _total: usize, _chunk: &Chunk, _outcome: &ChunkOutcome) {}

    fn on_finish(&self, _summary: &IngestSummary) {}
}

/// Reports progress through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl IngestProgress for LogProgress {
    fn on_start(&self, total: usize) {
        tracing::info!(chunks = total, "Ingesting");
    }

    fn on_chunk(&self, index: usize, total: usize, chunk: &Chunk, outcome: &ChunkOutcome) {
        tracing::info!(
            chunk = index + 1,
            total,
            symbol = %chunk.asset.symbol,
            period = %chunk.period,
            rows = outcome.rows_written(),
            outcome = ?outcome,
            "Chunk done"
        );
    }

    fn on_finish(&self, summary: &IngestSummary) {
        tracing::info!(
            assets = summary.assets,
            written = summary.chunks_written,
            skipped = summary.chunks_skipped,
            rows = summary.rows_written,
            cancelled = summary.cancelled,
            "Ingestion finished"
        );
    }
}

/// Silent reporter
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl IngestProgress for NoProgress {}
