//! Incremental price-series synchronizer.
//!
//! Every load runs through the same cycle: decide whether the cached
//! series is stale against the trading calendar, fetch the compact tail
//! if so, merge new rows after the cached end date, re-derive the full
//! feature frame, and serve the requested slice. A fresh cache serves
//! straight from the stored feature blob with no network traffic.
//!
//! Concurrency: one mutex per ticker, held across the whole
//! check-fetch-merge-write cycle, so two concurrent loads of the same
//! ticker serialize and the second sees the first's writes as fresh.

use super::provider::{DataError, MarketDataSource, OutputSize};
use super::store::SeriesStore;
use crate::calendar::TradingCalendar;
use crate::clock::Clock;
use crate::domain::{is_strictly_ascending, FeatureRow, PriceRow, SeriesKind};
use crate::features::derive_features;
use chrono::{Duration, NaiveDate};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Grace past the 16:00 close before the close session's row is expected
/// from the provider.
const PUBLICATION_GRACE_MINUTES: i64 = 30;

pub struct SeriesSynchronizer {
    store: SeriesStore,
    source: Arc<dyn MarketDataSource>,
    calendar: Arc<dyn TradingCalendar>,
    clock: Arc<dyn Clock>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SeriesSynchronizer {
    pub fn new(
        store: SeriesStore,
        source: Arc<dyn MarketDataSource>,
        calendar: Arc<dyn TradingCalendar>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            source,
            calendar,
            clock,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &SeriesStore {
        &self.store
    }

    /// Feature rows for `ticker` between `begin` and `end` inclusive,
    /// newest first. Synchronizes the cache beforehand if stale.
    pub fn load(
        &self,
        ticker: &str,
        begin: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<FeatureRow>, DataError> {
        if begin > end {
            return Err(DataError::InvalidRequest(format!(
                "begin {begin} is after end {end}"
            )));
        }
        let rows = self.synchronized_features(ticker)?;
        let mut slice: Vec<FeatureRow> = rows
            .into_iter()
            .filter(|r| r.price.date >= begin && r.price.date <= end)
            .collect();
        slice.reverse();
        Ok(slice)
    }

    /// Convenience window: the trailing `years` calendar years up to today.
    pub fn load_recent(&self, ticker: &str, years: u32) -> Result<Vec<FeatureRow>, DataError> {
        let end = self.clock.now().date();
        let begin = end - Duration::days(365 * years as i64);
        self.load(ticker, begin, end)
    }

    fn ticker_lock(&self, ticker: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(ticker.to_string()).or_default().clone()
    }

    /// Run the synchronize cycle and return the full ascending feature
    /// series for the ticker.
    fn synchronized_features(&self, ticker: &str) -> Result<Vec<FeatureRow>, DataError> {
        let lock = self.ticker_lock(ticker);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if !self.store.exists(ticker, SeriesKind::DailyAdjusted) {
            return self.initialize(ticker);
        }

        let cached = self.store.read_prices(ticker)?;
        let last = match cached.last() {
            Some(row) => row.date,
            None => return self.initialize(ticker),
        };

        if !self.is_stale(last) {
            return self.cached_features(ticker, &cached);
        }

        let mut fetched = self
            .source
            .fetch_daily_adjusted(ticker, OutputSize::Compact)?;
        fetched.sort_by_key(|r| r.date);
        warn_on_insane_rows(ticker, &fetched);

        let merged = merge_after(&cached, &fetched, last);
        let appended = merged.len() - cached.len();
        self.warn_on_gap(ticker, last, appended, fetched.last().map(|r| r.date));

        if appended == 0 {
            // Provider has nothing past our end (pre-publication window,
            // halted listing). Serve the cache untouched so a repeat load
            // leaves the store byte-identical.
            return self.cached_features(ticker, &cached);
        }

        let features = derive_features(&merged);
        self.store.write_prices(ticker, &merged)?;
        self.store.write_features(ticker, &features)?;
        Ok(features)
    }

    /// Cold start: no cache for the ticker, fetch the entire history.
    fn initialize(&self, ticker: &str) -> Result<Vec<FeatureRow>, DataError> {
        let mut fetched = self.source.fetch_daily_adjusted(ticker, OutputSize::Full)?;
        if fetched.is_empty() {
            return Err(DataError::InvalidResponse(format!(
                "provider returned no rows for '{ticker}'"
            )));
        }
        fetched.sort_by_key(|r| r.date);
        fetched.dedup_by_key(|r| r.date);
        warn_on_insane_rows(ticker, &fetched);

        let features = derive_features(&fetched);
        self.store.write_prices(ticker, &fetched)?;
        self.store.write_features(ticker, &features)?;
        Ok(features)
    }

    /// Serve from the stored feature blob; rebuild it from the price
    /// frame if it is missing (first run after a column change, or a
    /// partially populated store).
    fn cached_features(
        &self,
        ticker: &str,
        prices: &[PriceRow],
    ) -> Result<Vec<FeatureRow>, DataError> {
        match self.store.read_features(ticker) {
            Ok(rows) if rows.len() == prices.len() => Ok(rows),
            Ok(_) | Err(DataError::NotFound { .. }) => {
                let features = derive_features(prices);
                self.store.write_features(ticker, &features)?;
                Ok(features)
            }
            Err(e) => Err(e),
        }
    }

    /// A cached series ending at `last` is stale once a completed trading
    /// session exists past it.
    ///
    /// Counting sessions in `[last, today]` inclusive: fewer than two
    /// means no session after the cached end, so fresh. Exactly two means
    /// today is the only newer session; its row only exists once the
    /// session has closed and the provider has published, so fresh until
    /// 30 minutes past the close. Anything more is stale outright.
    fn is_stale(&self, last: NaiveDate) -> bool {
        let now = self.clock.now();
        let sessions = self.calendar.sessions_between(last, now.date());
        match sessions.len() {
            0 | 1 => false,
            2 => {
                let close = sessions[1].close_time;
                let publication = close + Duration::minutes(PUBLICATION_GRACE_MINUTES);
                now.time() >= publication
            }
            _ => true,
        }
    }

    /// Compare appended row count against the calendar's expectation.
    /// A shortfall is a data-quality signal, not a failure: the merge
    /// result is still consistent, so we keep it and flag it.
    fn warn_on_gap(
        &self,
        ticker: &str,
        last: NaiveDate,
        appended: usize,
        fetch_end: Option<NaiveDate>,
    ) {
        let Some(fetch_end) = fetch_end else { return };
        if fetch_end <= last {
            return;
        }
        let expected = self
            .calendar
            .sessions_between(last, fetch_end)
            .iter()
            .filter(|s| s.date > last)
            .count();
        if appended < expected {
            eprintln!(
                "warning: {ticker}: appended {appended} rows but calendar \
                 expected {expected} sessions after {last}; provider may \
                 have gaps"
            );
        }
    }
}

/// Rows with inverted high/low or non-positive prices are kept (history is
/// never rewritten) but flagged.
fn warn_on_insane_rows(ticker: &str, rows: &[PriceRow]) {
    let bad = rows.iter().filter(|r| !r.is_sane()).count();
    if bad > 0 {
        eprintln!("warning: {ticker}: {bad} fetched rows fail price sanity checks");
    }
}

/// Append to `cached` every fetched row strictly after `cutoff`, keeping
/// cached rows authoritative for any overlapping dates. Output stays
/// strictly ascending with no duplicate dates.
fn merge_after(cached: &[PriceRow], fetched: &[PriceRow], cutoff: NaiveDate) -> Vec<PriceRow> {
    let mut merged = cached.to_vec();
    let mut last = cutoff;
    for row in fetched {
        if row.date > last {
            merged.push(row.clone());
            last = row.date;
        }
    }
    debug_assert!(is_strictly_ascending(&merged));
    merged
}
