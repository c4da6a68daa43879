//! Exchange module
//!
//! Remote instrument resolution and historical candle download

mod http;
mod types;

pub use http::HttpExchange;
pub use types::ExchangeError;

use crate::asset::{Asset, AssetError, Sid};
use crate::candle::{Candle, Granularity};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Trait for exchange implementations
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Exchange name, used in bundle paths
    fn name(&self) -> &str;

    /// Resolve a symbol to an asset
    ///
    /// Fails with `SymbolNotFound` when never listed and with
    /// `MultipleSymbolsFound` when the lookup is ambiguous.
    async fn get_asset(
        &self,
        symbol: &str,
        as_of: Option<DateTime<Utc>>,
        fuzzy: bool,
    ) -> Result<Asset, AssetError>;

    /// Resolve a sid to an asset, failing with `SidsNotFound`
    async fn get_asset_by_sid(&self, sid: Sid) -> Result<Asset, AssetError>;

    /// List assets, optionally restricted to `symbols`
    async fn get_assets(&self, symbols: Option<&[String]>) -> Result<Vec<Asset>, AssetError>;

    /// Fetch candles per asset opening in the `bar_count` consecutive bar
    /// slots that end at `end_dt` inclusive
    ///
    /// Slots are counted in bar durations, not trading sessions, so a gap in
    /// trading never widens the window. Candles come back ascending. With `fallback` unset the exchange must
    /// not substitute data from another source.
    async fn get_history(
        &self,
        assets: &[Asset],
        end_dt: DateTime<Utc>,
        bar_count: usize,
        granularity: Granularity,
        fallback: bool,
    ) -> Result<HashMap<Sid, Vec<Candle>>, ExchangeError>;
}
