//! Candle module
//!
//! OHLCV observations and the sampling granularities they are stored at

mod granularity;
mod types;

pub use granularity::{Granularity, ParseGranularityError};
pub use types::Candle;
