//! Forward-filling raw candles onto a dense calendar grid

use crate::candle::{Candle, Granularity};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Fill `raw` onto the bar opens in `dense`
///
/// Raw candles are matched by their truncated open time. A missing bar
/// becomes a flat, zero-volume candle at the previous close, seeded by
/// `previous` until the first real bar. Leading bars with nothing to carry
/// forward are dropped rather than left empty.
pub fn ffill_candles(
    raw: &[Candle],
    dense: &[DateTime<Utc>],
    granularity: Granularity,
    previous: Option<&Candle>,
) -> Vec<Candle> {
    let observed: HashMap<DateTime<Utc>, &Candle> = raw
        .iter()
        .map(|c| (granularity.truncate(c.timestamp), c))
        .collect();

    let mut last_close = previous.map(|c| c.close);
    let mut filled = Vec::with_capacity(dense.len());
    for ts in dense {
        if let Some(candle) = observed.get(ts) {
            last_close = Some(candle.close);
            filled.push(Candle {
                timestamp: *ts,
                ..(*candle).clone()
            });
        } else if let Some(close) = last_close {
            filled.push(Candle::flat(*ts, close));
        }
    }
    filled
}
