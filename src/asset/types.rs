//! Asset types

use crate::exchange::ExchangeError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable numeric instrument identifier
pub type Sid = u64;

/// A tradable instrument listed on an exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub sid: Sid,
    /// Exchange symbol (e.g., "BTCUSDT")
    pub symbol: String,
    /// Exchange the instrument is listed on
    pub exchange: String,
    /// Earliest known trade
    pub start_date: DateTime<Utc>,
    /// Delisting time, if any
    pub end_date: Option<DateTime<Utc>>,
}

/// Asset resolution errors
#[derive(Debug, Error)]
pub enum AssetError {
    /// The exchange never listed the symbol
    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),
    /// The lookup is ambiguous
    #[error("Multiple symbols found for {symbol}: {candidates:?}")]
    MultipleSymbolsFound {
        symbol: String,
        candidates: Vec<String>,
    },
    /// One or more sids could not be resolved
    #[error("Sids not found: {0:?}")]
    SidsNotFound(Vec<Sid>),
    /// Remote lookup failed
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}
