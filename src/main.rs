use candle_bundle::cli::{Cli, Commands};
use candle_bundle::config::Config;
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: Could not load config from {}: {}", cli.config, e);
            eprintln!("Using default configuration");
            toml::from_str(include_str!("../config.toml.example"))?
        }
    };

    // Initialize telemetry
    let _telemetry = candle_bundle::telemetry::init_telemetry(&config.telemetry)?;

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, finishing current chunk");
                cancel.store(true, Ordering::SeqCst);
            }
        });
    }

    match cli.command {
        Commands::Ingest(args) => {
            tracing::info!(granularity = %args.granularity, "Starting ingestion");
            args.execute(&config, &cancel).await?;
        }
        Commands::Import(args) => {
            args.execute(&config).await?;
        }
        Commands::Status(args) => {
            args.execute(&config).await?;
        }
        Commands::Config => {
            println!("Current configuration:");
            println!(
                "  Exchange: {} ({})",
                config.exchange.name, config.exchange.base_url
            );
            println!(
                "  Bundle: {} calendar={}",
                config.bundle.root.display(),
                config.bundle.calendar
            );
            println!(
                "  Ingest: fetch_timeout={}s progress={}",
                config.ingest.fetch_timeout_secs, config.ingest.show_progress
            );
            println!(
                "  Telemetry: level={} format={:?}",
                config.telemetry.log_level, config.telemetry.log_format
            );
        }
    }

    Ok(())
}
