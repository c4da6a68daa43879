//! Import command implementation

use super::open_bundle;
use crate::candle::Granularity;
use crate::config::Config;
use clap::Args;

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Symbol of the cached chunk
    #[arg(short, long)]
    pub symbol: String,

    /// Bar granularity: daily or minute
    #[arg(short, long, default_value = "daily")]
    pub granularity: Granularity,

    /// Chunk period, e.g. 2024-1
    #[arg(short, long)]
    pub period: String,
}

impl ImportArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let mut bundle = open_bundle(config)?;
        let asset = bundle.symbols().resolve(&self.symbol, None, false).await?;

        let outcome = bundle.ingest_ctable(&asset, self.granularity, &self.period)?;
        tracing::info!(
            symbol = %asset.symbol,
            period = %self.period,
            outcome = ?outcome,
            "Imported cached chunk"
        );
        println!(
            "{} {}: {} rows written",
            asset.symbol,
            self.period,
            outcome.rows_written()
        );
        Ok(())
    }
}
