//! Ingest command implementation

use super::{open_bundle, parse_datetime};
use crate::bundle::{IngestOptions, IngestProgress, IngestSource, LogProgress, NoProgress};
use crate::candle::Granularity;
use crate::config::Config;
use chrono::{DateTime, Utc};
use clap::Args;
use std::sync::atomic::AtomicBool;

#[derive(Args, Debug)]
pub struct IngestArgs {
    /// Bar granularity: daily or minute
    #[arg(short, long, default_value = "daily")]
    pub granularity: Granularity,

    /// Only these symbols (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub include: Vec<String>,

    /// Skip these symbols (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub exclude: Vec<String>,

    /// Start date (YYYY-MM-DD or RFC 3339)
    #[arg(long, value_parser = parse_datetime)]
    pub start: Option<DateTime<Utc>>,

    /// Exclusive end date, defaults to now
    #[arg(long, value_parser = parse_datetime)]
    pub end: Option<DateTime<Utc>>,

    /// Import cached chunk bundles instead of downloading
    #[arg(long)]
    pub from_chunks: bool,

    /// Disable per-chunk progress logging
    #[arg(long)]
    pub no_progress: bool,
}

impl IngestArgs {
    pub fn options(&self) -> IngestOptions {
        IngestOptions {
            include_symbols: (!self.include.is_empty()).then(|| self.include.clone()),
            exclude_symbols: self.exclude.clone(),
            start: self.start,
            end: self.end,
            source: if self.from_chunks {
                IngestSource::ChunkCache
            } else {
                IngestSource::Exchange
            },
            ..IngestOptions::new(self.granularity)
        }
    }

    pub async fn execute(&self, config: &Config, cancel: &AtomicBool) -> anyhow::Result<()> {
        let mut bundle = open_bundle(config)?;
        let progress: &dyn IngestProgress = if self.no_progress || !config.ingest.show_progress {
            &NoProgress
        } else {
            &LogProgress
        };

        let summary = bundle.ingest(&self.options(), progress, cancel).await?;

        println!(
            "{} bundle: {} chunks planned, {} written, {} skipped, {} rows",
            self.granularity,
            summary.chunks_planned,
            summary.chunks_written,
            summary.chunks_skipped,
            summary.rows_written
        );
        if summary.cancelled {
            println!("Cancelled; re-run to resume");
        }
        Ok(())
    }
}
