//! Memoizing asset lookups
//!
//! Symbol lookups are keyed by `(symbol, as_of, fuzzy)` so that a lookup
//! pinned to one date never answers for another. Each key owns a
//! `OnceCell`, which makes resolution single-flight: concurrent callers for
//! the same key share one remote call, and a failed call leaves the cell
//! empty for the next caller to retry.

use super::{Asset, AssetError, Sid};
use crate::exchange::Exchange;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};

type SymbolKey = (String, Option<DateTime<Utc>>, bool);

/// Caches resolved assets by symbol lookup and by sid
pub struct SymbolCache {
    exchange: Arc<dyn Exchange>,
    by_symbol: Mutex<HashMap<SymbolKey, Arc<OnceCell<Asset>>>>,
    by_sid: Mutex<HashMap<Sid, Arc<OnceCell<Asset>>>>,
}

impl SymbolCache {
    /// Create an empty cache in front of `exchange`
    pub fn new(exchange: Arc<dyn Exchange>) -> Self {
        Self {
            exchange,
            by_symbol: Mutex::new(HashMap::new()),
            by_sid: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a symbol, hitting the exchange only on a cache miss
    pub async fn resolve(
        &self,
        symbol: &str,
        as_of: Option<DateTime<Utc>>,
        fuzzy: bool,
    ) -> Result<Asset, AssetError> {
        let cell = {
            let mut cells = self.by_symbol.lock().await;
            cells
                .entry((symbol.to_string(), as_of, fuzzy))
                .or_default()
                .clone()
        };

        let asset = cell
            .get_or_try_init(|| async {
                tracing::debug!(symbol, as_of = ?as_of, fuzzy, "Resolving symbol");
                self.exchange.get_asset(symbol, as_of, fuzzy).await
            })
            .await?
            .clone();

        self.remember_sid(&asset).await;
        Ok(asset)
    }

    /// Resolve many sids at once
    ///
    /// Cached assets are returned as-is; the rest are fetched concurrently.
    /// With `default_none` unset, any unresolved sid fails the whole call
    /// with [`AssetError::SidsNotFound`] listing every missing sid. With it
    /// set, unresolved positions come back as `None`.
    pub async fn resolve_all(
        &self,
        sids: &[Sid],
        default_none: bool,
    ) -> Result<Vec<Option<Asset>>, AssetError> {
        let results = join_all(sids.iter().map(|&sid| self.resolve_sid(sid))).await;

        let mut assets = Vec::with_capacity(sids.len());
        let mut missing = Vec::new();
        for (sid, result) in sids.iter().zip(results) {
            match result {
                Ok(asset) => assets.push(Some(asset)),
                Err(AssetError::SidsNotFound(_)) | Err(AssetError::SymbolNotFound(_)) => {
                    missing.push(*sid);
                    assets.push(None);
                }
                Err(e) => return Err(e),
            }
        }

        if !missing.is_empty() && !default_none {
            return Err(AssetError::SidsNotFound(missing));
        }
        Ok(assets)
    }

    /// Sids with a resolved asset in the cache, ascending
    pub async fn cached_sids(&self) -> Vec<Sid> {
        let cells = self.by_sid.lock().await;
        let mut sids: Vec<Sid> = cells
            .iter()
            .filter(|(_, cell)| cell.initialized())
            .map(|(sid, _)| *sid)
            .collect();
        sids.sort_unstable();
        sids
    }

    async fn resolve_sid(&self, sid: Sid) -> Result<Asset, AssetError> {
        let cell = {
            let mut cells = self.by_sid.lock().await;
            cells.entry(sid).or_default().clone()
        };

        cell.get_or_try_init(|| self.exchange.get_asset_by_sid(sid))
            .await
            .cloned()
    }

    async fn remember_sid(&self, asset: &Asset) {
        let mut cells = self.by_sid.lock().await;
        let cell = cells.entry(asset.sid).or_default();
        // Already set or mid-flight; either way the sid is covered
        let _ = cell.set(asset.clone());
    }
}
