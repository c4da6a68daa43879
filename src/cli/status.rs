//! Status command implementation

use crate::bundle::BarStoreHandle;
use crate::candle::Granularity;
use crate::config::Config;
use crate::store::ParquetBarStore;
use clap::Args;
use std::sync::Arc;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Bar granularity: daily or minute
    #[arg(short, long, default_value = "daily")]
    pub granularity: Granularity,
}

impl StatusArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let mut handle = BarStoreHandle::new(
            Arc::new(ParquetBarStore::new()),
            config.exchange.name.clone(),
            &config.bundle,
        )?;
        let dir = handle.bundle_dir(self.granularity);

        println!("candle-bundle status");
        println!("  Bundle: {}", dir.display());

        let Some(reader) = handle.get_reader(self.granularity)? else {
            println!("  Status: Not ingested");
            return Ok(());
        };

        let metadata = reader.metadata();
        println!("  Calendar: {}", metadata.calendar_name);
        println!(
            "  Sessions: {} to {}",
            metadata.start_session, metadata.end_session
        );
        match reader.last_available_dt()? {
            Some(last) => println!("  Last bar: {}", last),
            None => println!("  Last bar: none"),
        }
        Ok(())
    }
}
