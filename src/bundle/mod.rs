//! Bundle module
//!
//! Incremental ingestion of exchange candles into bar stores:
//! - Window adjustment and monthly chunk planning
//! - Coverage checks against the existing store
//! - Forward-filling onto the trading calendar
//! - Reader/writer handles with conflict-tolerant commits

mod coverage;
mod dates;
mod driver;
mod ffill;
mod handle;
mod ingestor;
mod lock;
mod planner;
mod progress;
mod types;

pub use coverage::range_in_bundle;
pub use dates::{adjust_dates, last_session_date};
pub use driver::ExchangeBundle;
pub use ffill::ffill_candles;
pub use handle::BarStoreHandle;
pub use ingestor::CandleIngestor;
pub use lock::{IngestLock, LOCK_FILE};
pub use planner::plan_chunks;
pub use progress::{IngestProgress, LogProgress, NoProgress};
pub use types::{
    BundleError, Chunk, ChunkOutcome, CommitOutcome, IngestOptions, IngestSource, IngestSummary,
};
