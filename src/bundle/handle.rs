//! Owned reader/writer cache for one exchange's bundles
//!
//! At most one reader and one writer are live per granularity. A missing
//! store is cached as an absent reader ("nothing ingested yet") until the
//! first successful write.

use super::{BundleError, CommitOutcome};
use crate::asset::Sid;
use crate::calendar::{get_calendar, TradingCalendar};
use crate::candle::Granularity;
use crate::config::BundleConfig;
use crate::store::{BarReader, BarStore, BarTable, BarWriter, StoreError, StoreMetadata};
use crate::telemetry::{increment_counter, CounterMetric};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Settings applied when a store is first created
#[derive(Debug, Clone)]
struct StoreDefaults {
    calendar: Arc<dyn TradingCalendar>,
    minutes_per_day: u32,
    default_ohlc_ratio: u64,
}

/// Reader/writer handles for `{root}/{exchange}/{frequency}_bundle`
pub struct BarStoreHandle {
    store: Arc<dyn BarStore>,
    root: PathBuf,
    exchange: String,
    defaults: StoreDefaults,
    readers: HashMap<Granularity, Option<Box<dyn BarReader>>>,
    writers: HashMap<Granularity, Box<dyn BarWriter>>,
}

impl BarStoreHandle {
    /// Create a handle; nothing is opened until first use
    pub fn new(
        store: Arc<dyn BarStore>,
        exchange: impl Into<String>,
        config: &BundleConfig,
    ) -> Result<Self, BundleError> {
        let calendar = get_calendar(&config.calendar)
            .ok_or_else(|| BundleError::UnknownCalendar(config.calendar.clone()))?;

        Ok(Self {
            store,
            root: config.root.clone(),
            exchange: exchange.into(),
            defaults: StoreDefaults {
                calendar,
                minutes_per_day: config.minutes_per_day,
                default_ohlc_ratio: config.default_ohlc_ratio,
            },
            readers: HashMap::new(),
            writers: HashMap::new(),
        })
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Calendar used for new stores and chunk planning
    pub fn calendar(&self) -> Arc<dyn TradingCalendar> {
        self.defaults.calendar.clone()
    }

    pub fn store(&self) -> &dyn BarStore {
        self.store.as_ref()
    }

    /// Canonical store directory for a granularity
    pub fn bundle_dir(&self, granularity: Granularity) -> PathBuf {
        self.root
            .join(&self.exchange)
            .join(format!("{}_bundle", granularity))
    }

    /// Directory of an out-of-band cached chunk bundle
    pub fn chunk_cache_dir(&self, symbol: &str, granularity: Granularity, period: &str) -> PathBuf {
        self.root
            .join(&self.exchange)
            .join("chunks")
            .join(format!("{}-{}-{}", symbol, granularity, period))
    }

    /// Cached reader, opening it on first use
    ///
    /// `None` means the store does not exist yet.
    pub fn get_reader(
        &mut self,
        granularity: Granularity,
    ) -> Result<Option<&dyn BarReader>, StoreError> {
        let dir = self.bundle_dir(granularity);
        let reader = match self.readers.entry(granularity) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let reader = match self.store.open_reader(&dir) {
                    Ok(reader) => Some(reader),
                    Err(StoreError::NotFound(_)) => {
                        tracing::debug!(path = ?dir, "No bundle on disk yet");
                        None
                    }
                    Err(e) => return Err(e),
                };
                entry.insert(reader)
            }
        };
        Ok(reader.as_deref())
    }

    /// Cached writer, opening it over `[start_session, end_session]`
    ///
    /// An existing store is opened over the union of its persisted sessions
    /// and the requested ones; metadata is rewritten only when that union
    /// extends it.
    pub fn get_writer(
        &mut self,
        start_session: NaiveDate,
        end_session: NaiveDate,
        granularity: Granularity,
    ) -> Result<&mut dyn BarWriter, StoreError> {
        let dir = self.bundle_dir(granularity);
        let writer = match self.writers.entry(granularity) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let writer = open_writer(
                    self.store.as_ref(),
                    &dir,
                    &self.defaults,
                    start_session,
                    end_session,
                    granularity,
                )?;
                entry.insert(writer)
            }
        };
        Ok(writer.as_mut())
    }

    /// Make sure the cached writer accepts `[start_session, end_session]`
    pub fn ensure_writer_covers(
        &mut self,
        start_session: NaiveDate,
        end_session: NaiveDate,
        granularity: Granularity,
    ) -> Result<(), StoreError> {
        let (start, end) = match self.writers.get(&granularity) {
            Some(writer)
                if writer.start_session() <= start_session
                    && writer.end_session() >= end_session =>
            {
                return Ok(())
            }
            Some(writer) => (
                writer.start_session().min(start_session),
                writer.end_session().max(end_session),
            ),
            None => (start_session, end_session),
        };
        self.evict_writer(granularity);
        self.get_writer(start, end, granularity)?;
        Ok(())
    }

    /// Persist `sid`'s first traded bar and reopen the reader to see it
    pub fn mark_first_bar(
        &mut self,
        granularity: Granularity,
        sid: Sid,
        first_bar: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let session = first_bar.date_naive();
        self.get_writer(session, session, granularity)?
            .mark_first_bar(sid, first_bar)?;
        self.invalidate_reader(granularity);
        tracing::debug!(sid, first_bar = %first_bar, granularity = %granularity, "Marked first bar");
        Ok(())
    }

    /// Drop the cached writer, returning whether one was cached
    pub fn evict_writer(&mut self, granularity: Granularity) -> bool {
        self.writers.remove(&granularity).is_some()
    }

    /// Drop the cached reader so the next query reopens it
    pub fn invalidate_reader(&mut self, granularity: Granularity) {
        self.readers.remove(&granularity);
    }

    /// Strictly write `tables`, recovering from conflicts
    ///
    /// Overlap with stored rows is a benign skip. Any other failure drops the
    /// cached writer, reopens one over the failed writer's own sessions and
    /// retries once; a second failure is [`BundleError::WriteFailed`].
    pub fn commit(
        &mut self,
        tables: &[BarTable],
        granularity: Granularity,
        start_session: NaiveDate,
        end_session: NaiveDate,
    ) -> Result<CommitOutcome, BundleError> {
        let writer = self.get_writer(start_session, end_session, granularity)?;
        let sessions = (writer.start_session(), writer.end_session());

        let error = match writer.write(tables) {
            Ok(rows) => return Ok(self.written(granularity, rows)),
            Err(StoreError::OverlappingData { sid, first, last }) => {
                tracing::warn!(
                    sid,
                    first = %first,
                    last = %last,
                    granularity = %granularity,
                    "Bars already stored, skipping"
                );
                return Ok(CommitOutcome::Skipped);
            }
            Err(error) => error,
        };

        tracing::warn!(
            error = %error,
            granularity = %granularity,
            start_session = %sessions.0,
            end_session = %sessions.1,
            "Write failed, recreating writer"
        );
        increment_counter(CounterMetric::WriteRetries, 1);
        self.evict_writer(granularity);

        let retried = self
            .get_writer(sessions.0, sessions.1, granularity)
            .and_then(|writer| writer.write(tables));
        match retried {
            Ok(rows) => Ok(self.written(granularity, rows)),
            Err(StoreError::OverlappingData { .. }) => Ok(CommitOutcome::Skipped),
            Err(source) => {
                self.evict_writer(granularity);
                Err(BundleError::WriteFailed {
                    granularity,
                    source,
                })
            }
        }
    }

    /// Open a reader over a cached chunk bundle
    pub fn open_chunk_cache(
        &self,
        symbol: &str,
        granularity: Granularity,
        period: &str,
    ) -> Result<Box<dyn BarReader>, BundleError> {
        let dir = self.chunk_cache_dir(symbol, granularity, period);
        match self.store.open_reader(&dir) {
            Ok(reader) => Ok(reader),
            Err(StoreError::NotFound(path)) => Err(BundleError::ChunkNotCached(path)),
            Err(e) => Err(e.into()),
        }
    }

    fn written(&mut self, granularity: Granularity, rows: usize) -> CommitOutcome {
        // The store exists now; stop reporting it absent
        if matches!(self.readers.get(&granularity), Some(None)) {
            self.invalidate_reader(granularity);
        }
        CommitOutcome::Written(rows)
    }
}

fn open_writer(
    store: &dyn BarStore,
    dir: &Path,
    defaults: &StoreDefaults,
    start_session: NaiveDate,
    end_session: NaiveDate,
    granularity: Granularity,
) -> Result<Box<dyn BarWriter>, StoreError> {
    if start_session > end_session {
        return Err(StoreError::InvalidMetadata(format!(
            "requested sessions [{}, {}] are inverted",
            start_session, end_session
        )));
    }

    match store.read_metadata(dir)? {
        None => {
            let metadata = StoreMetadata::new(
                granularity,
                defaults.calendar.name(),
                start_session,
                end_session,
                defaults.minutes_per_day,
                defaults.default_ohlc_ratio,
            )?;
            store.create_writer(dir, metadata)
        }
        Some(mut metadata) => {
            let extended = metadata.extend_to(start_session, end_session);
            tracing::debug!(
                path = ?dir,
                start_session = %metadata.start_session,
                end_session = %metadata.end_session,
                extended,
                "Opening bar writer"
            );
            store.open_writer(dir, metadata, extended)
        }
    }
}
