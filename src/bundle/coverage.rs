//! Store coverage queries

use crate::asset::Asset;
use crate::store::BarReader;
use chrono::{DateTime, Utc};

/// Whether the store already holds every bar for `asset` in `[start, end]`
///
/// An absent reader covers nothing. Read failures are logged and treated
/// as "not covered" so planning falls back to re-ingesting.
pub fn range_in_bundle(
    asset: &Asset,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    reader: Option<&dyn BarReader>,
) -> bool {
    let Some(reader) = reader else {
        return false;
    };

    match reader.covers(asset.sid, start, end) {
        Ok(covered) => covered,
        Err(e) => {
            tracing::warn!(
                symbol = %asset.symbol,
                start = %start,
                end = %end,
                error = %e,
                "Coverage check failed, treating range as missing"
            );
            false
        }
    }
}
