//! Binance-style REST client
//!
//! Lists instruments from `/api/v3/exchangeInfo` and downloads candles from
//! `/api/v3/klines`, paging backwards from the requested end. Sids are
//! derived from the exchange name and symbol so they are stable across runs.

use super::{Exchange, ExchangeError};
use crate::asset::{Asset, AssetError, Sid};
use crate::candle::{Candle, Granularity};
use crate::config::ExchangeConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};
use uuid::Uuid;

/// Binance REST base URL
pub const BINANCE_API_URL: &str = "https://api.binance.com";

/// Hard page limit of the klines endpoint
const MAX_KLINES_LIMIT: usize = 1000;

/// Configuration for the HTTP exchange client
#[derive(Debug, Clone)]
pub struct HttpExchangeConfig {
    /// Exchange name
    pub name: String,
    /// Base URL for the REST API
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
    /// Klines per request
    pub max_bars_per_request: usize,
}

impl Default for HttpExchangeConfig {
    fn default() -> Self {
        Self {
            name: "binance".to_string(),
            base_url: BINANCE_API_URL.to_string(),
            timeout: Duration::from_secs(10),
            max_bars_per_request: MAX_KLINES_LIMIT,
        }
    }
}

impl From<&ExchangeConfig> for HttpExchangeConfig {
    fn from(config: &ExchangeConfig) -> Self {
        Self {
            name: config.name.clone(),
            base_url: config.base_url.clone(),
            timeout: config.request_timeout(),
            max_bars_per_request: config.max_bars_per_request,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    status: String,
    #[serde(default)]
    base_asset: String,
    #[serde(default)]
    quote_asset: String,
}

/// Client for a Binance-compatible REST API
pub struct HttpExchange {
    config: HttpExchangeConfig,
    client: Client,
    listing: OnceCell<Vec<SymbolInfo>>,
    start_dates: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl HttpExchange {
    /// Create a client with the given configuration
    pub fn new(config: HttpExchangeConfig) -> Result<Self, ExchangeError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            config,
            client,
            listing: OnceCell::new(),
            start_dates: Mutex::new(HashMap::new()),
        })
    }

    /// Deterministic sid for a symbol on an exchange
    pub fn sid_for(exchange: &str, symbol: &str) -> Sid {
        let name = format!("{}:{}", exchange, symbol);
        Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
            .as_u64_pair()
            .0
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        let url = format!("{}{}", self.config.base_url, path);
        let response = self.client.get(&url).query(query).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ExchangeError::Api { status, body });
        }

        Ok(response.json().await?)
    }

    async fn listing(&self) -> Result<&[SymbolInfo], ExchangeError> {
        let symbols = self
            .listing
            .get_or_try_init(|| async {
                let info: ExchangeInfo = self.get_json("/api/v3/exchangeInfo", &[]).await?;
                tracing::debug!(count = info.symbols.len(), "Fetched exchange listing");
                Ok::<_, ExchangeError>(info.symbols)
            })
            .await?;
        Ok(symbols.as_slice())
    }

    async fn fetch_klines(
        &self,
        symbol: &str,
        granularity: Granularity,
        start_ms: Option<i64>,
        end_ms: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let mut query = vec![
            ("symbol", symbol.to_string()),
            ("interval", interval(granularity).to_string()),
            ("limit", limit.min(MAX_KLINES_LIMIT).to_string()),
        ];
        if let Some(start) = start_ms {
            query.push(("startTime", start.to_string()));
        }
        if let Some(end) = end_ms {
            query.push(("endTime", end.to_string()));
        }

        let rows: Vec<Vec<Value>> = self.get_json("/api/v3/klines", &query).await?;
        rows.iter().map(|row| parse_kline(row)).collect()
    }

    /// Open time of the first daily kline ever published for `symbol`
    async fn start_date(&self, symbol: &str) -> Result<DateTime<Utc>, AssetError> {
        if let Some(start) = self.start_dates.lock().await.get(symbol) {
            return Ok(*start);
        }

        let first = self
            .fetch_klines(symbol, Granularity::Daily, Some(0), None, 1)
            .await?;
        let start = first
            .first()
            .map(|c| c.timestamp)
            .ok_or_else(|| AssetError::SymbolNotFound(symbol.to_string()))?;

        self.start_dates
            .lock()
            .await
            .insert(symbol.to_string(), start);
        Ok(start)
    }

    async fn to_asset(&self, info: &SymbolInfo) -> Result<Asset, AssetError> {
        Ok(Asset {
            sid: Self::sid_for(&self.config.name, &info.symbol),
            symbol: info.symbol.clone(),
            exchange: self.config.name.clone(),
            start_date: self.start_date(&info.symbol).await?,
            end_date: None,
        })
    }

    async fn history_for(
        &self,
        asset: &Asset,
        end_dt: DateTime<Utc>,
        bar_count: usize,
        granularity: Granularity,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let page_size = self.config.max_bars_per_request.clamp(1, MAX_KLINES_LIMIT);
        page_klines(self, &asset.symbol, granularity, end_dt, bar_count, page_size).await
    }
}

/// One page of klines closing at or before `end_ms`, ascending
#[async_trait]
trait KlinePages: Send + Sync {
    async fn klines_before(
        &self,
        symbol: &str,
        granularity: Granularity,
        end_ms: i64,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError>;
}

#[async_trait]
impl KlinePages for HttpExchange {
    async fn klines_before(
        &self,
        symbol: &str,
        granularity: Granularity,
        end_ms: i64,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        self.fetch_klines(symbol, granularity, None, Some(end_ms), limit)
            .await
    }
}

/// Candles opening in the `bar_count` bar slots ending at `end_dt`
///
/// Pages backwards from `end_dt` until a page reaches the first slot or the
/// exchange runs out of history. Gaps make pages reach further back, so the
/// result is trimmed to the window.
async fn page_klines(
    source: &dyn KlinePages,
    symbol: &str,
    granularity: Granularity,
    end_dt: DateTime<Utc>,
    bar_count: usize,
    page_size: usize,
) -> Result<Vec<Candle>, ExchangeError> {
    let bar = granularity.bar_duration();
    let earliest = end_dt - bar * (bar_count.saturating_sub(1) as i32);

    let mut candles: Vec<Candle> = Vec::with_capacity(bar_count);
    let mut end_ms = (end_dt + bar).timestamp_millis() - 1;
    let mut remaining = bar_count;

    while remaining > 0 {
        let limit = remaining.min(page_size);
        let mut page = source
            .klines_before(symbol, granularity, end_ms, limit)
            .await?;
        let Some(first) = page.first().map(|c| c.timestamp) else {
            break;
        };

        let short_page = page.len() < limit;
        remaining = remaining.saturating_sub(page.len());
        page.append(&mut candles);
        candles = page;

        if short_page || first <= earliest {
            break;
        }
        end_ms = first.timestamp_millis() - 1;
    }

    candles.retain(|c| c.timestamp >= earliest && c.timestamp <= end_dt);
    Ok(candles)
}

#[async_trait]
impl Exchange for HttpExchange {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn get_asset(
        &self,
        symbol: &str,
        as_of: Option<DateTime<Utc>>,
        fuzzy: bool,
    ) -> Result<Asset, AssetError> {
        let listing = self.listing().await?;
        let candidates = matching_symbols(listing, symbol, fuzzy);

        let info = match candidates.as_slice() {
            [] => return Err(AssetError::SymbolNotFound(symbol.to_string())),
            [info] => *info,
            many => {
                return Err(AssetError::MultipleSymbolsFound {
                    symbol: symbol.to_string(),
                    candidates: many.iter().map(|s| s.symbol.clone()).collect(),
                })
            }
        };

        let asset = self.to_asset(info).await?;
        if let Some(as_of) = as_of {
            if asset.start_date > as_of {
                return Err(AssetError::SymbolNotFound(symbol.to_string()));
            }
        }
        Ok(asset)
    }

    async fn get_asset_by_sid(&self, sid: Sid) -> Result<Asset, AssetError> {
        let listing = self.listing().await?;
        let info = listing
            .iter()
            .find(|info| Self::sid_for(&self.config.name, &info.symbol) == sid)
            .ok_or(AssetError::SidsNotFound(vec![sid]))?;
        self.to_asset(info).await
    }

    async fn get_assets(&self, symbols: Option<&[String]>) -> Result<Vec<Asset>, AssetError> {
        let mut assets = Vec::new();
        match symbols {
            Some(symbols) => {
                for symbol in symbols {
                    assets.push(self.get_asset(symbol, None, false).await?);
                }
            }
            None => {
                let listing = self.listing().await?;
                for info in listing.iter().filter(|info| info.status == "TRADING") {
                    assets.push(self.to_asset(info).await?);
                }
            }
        }
        Ok(assets)
    }

    async fn get_history(
        &self,
        assets: &[Asset],
        end_dt: DateTime<Utc>,
        bar_count: usize,
        granularity: Granularity,
        _fallback: bool,
    ) -> Result<HashMap<Sid, Vec<Candle>>, ExchangeError> {
        let mut history = HashMap::with_capacity(assets.len());
        for asset in assets {
            let candles = self
                .history_for(asset, end_dt, bar_count, granularity)
                .await?;
            tracing::debug!(
                symbol = %asset.symbol,
                granularity = %granularity,
                end = %end_dt,
                requested = bar_count,
                received = candles.len(),
                "Fetched candles"
            );
            history.insert(asset.sid, candles);
        }
        Ok(history)
    }
}

fn interval(granularity: Granularity) -> &'static str {
    match granularity {
        Granularity::Minute => "1m",
        Granularity::Daily => "1d",
    }
}

/// Uppercase with separators removed, so "btc/usdt" matches "BTCUSDT"
fn normalize_symbol(symbol: &str) -> String {
    symbol
        .chars()
        .filter(|c| !matches!(c, '.' | '_' | '-' | '/'))
        .flat_map(char::to_uppercase)
        .collect()
}

fn matching_symbols<'a>(listing: &'a [SymbolInfo], symbol: &str, fuzzy: bool) -> Vec<&'a SymbolInfo> {
    if fuzzy {
        let wanted = normalize_symbol(symbol);
        listing
            .iter()
            .filter(|info| {
                normalize_symbol(&info.symbol) == wanted
                    || normalize_symbol(&format!("{}{}", info.base_asset, info.quote_asset))
                        == wanted
            })
            .collect()
    } else {
        listing.iter().filter(|info| info.symbol == symbol).collect()
    }
}

fn parse_kline(row: &[Value]) -> Result<Candle, ExchangeError> {
    let open_ms = row
        .first()
        .and_then(Value::as_i64)
        .ok_or_else(|| ExchangeError::Parse("missing kline open time".to_string()))?;
    let timestamp = DateTime::from_timestamp_millis(open_ms)
        .ok_or_else(|| ExchangeError::Parse(format!("invalid kline open time {}", open_ms)))?;

    let field = |index: usize, name: &str| -> Result<Decimal, ExchangeError> {
        let raw = row
            .get(index)
            .and_then(Value::as_str)
            .ok_or_else(|| ExchangeError::Parse(format!("missing kline {}", name)))?;
        Decimal::from_str(raw).map_err(|e| ExchangeError::Parse(format!("kline {}: {}", name, e)))
    };

    Ok(Candle {
        timestamp,
        open: field(1, "open")?,
        high: field(2, "high")?,
        low: field(3, "low")?,
        close: field(4, "close")?,
        volume: field(5, "volume")?,
    })
}
