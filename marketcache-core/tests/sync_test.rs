//! End-to-end synchronizer behavior against a scripted provider, calendar
//! and clock: cold start, freshness, staleness boundaries, suffix merge,
//! failure handling, and idempotence of the stored blobs.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use marketcache_core::calendar::{Session, TradingCalendar};
use marketcache_core::clock::FixedClock;
use marketcache_core::data::provider::{DataError, EarningsFeed, MarketDataSource, OutputSize};
use marketcache_core::data::store::SeriesStore;
use marketcache_core::data::sync::SeriesSynchronizer;
use marketcache_core::domain::{PriceRow, ReportPeriod, ReportRow, ReportType, SeriesKind};
use proptest::prelude::*;
use std::path::Path;
use std::sync::{Arc, Mutex};

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn at(date: NaiveDate, h: u32, min: u32) -> NaiveDateTime {
    date.and_time(NaiveTime::from_hms_opt(h, min, 0).unwrap())
}

fn row(date: NaiveDate, close: f64) -> PriceRow {
    PriceRow {
        date,
        open: close - 0.5,
        high: close + 1.0,
        low: close - 1.0,
        close,
        adjusted_close: close,
        volume: 1_000_000.0,
        dividend: 0.0,
        split_coefficient: 1.0,
    }
}

/// Consecutive daily rows starting at `start`, one per close value.
fn rows_from(start: NaiveDate, closes: &[f64]) -> Vec<PriceRow> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| row(start + Duration::days(i as i64), c))
        .collect()
}

/// Every calendar day is a session with a 16:00 close, so test dates map
/// one-to-one onto sessions.
struct EveryDayCalendar;

impl TradingCalendar for EveryDayCalendar {
    fn sessions_between(&self, start: NaiveDate, end: NaiveDate) -> Vec<Session> {
        let mut out = Vec::new();
        let mut date = start;
        while date <= end {
            out.push(Session {
                date,
                close_time: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
            });
            date += Duration::days(1);
        }
        out
    }
}

#[derive(Default)]
struct ScriptedSource {
    full: Vec<PriceRow>,
    compact: Vec<PriceRow>,
    fail: bool,
    calls: Mutex<Vec<OutputSize>>,
}

impl ScriptedSource {
    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn calls(&self) -> Vec<OutputSize> {
        self.calls.lock().unwrap().clone()
    }
}

impl MarketDataSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    fn fetch_daily_adjusted(
        &self,
        _ticker: &str,
        size: OutputSize,
    ) -> Result<Vec<PriceRow>, DataError> {
        self.calls.lock().unwrap().push(size);
        if self.fail {
            return Err(DataError::SourceUnavailable("scripted outage".into()));
        }
        Ok(match size {
            OutputSize::Full => self.full.clone(),
            OutputSize::Compact => self.compact.clone(),
        })
    }

    fn fetch_report(
        &self,
        _ticker: &str,
        _report: ReportType,
        _period: ReportPeriod,
    ) -> Result<Vec<ReportRow>, DataError> {
        unimplemented!("price tests never fetch reports")
    }

    fn fetch_earnings(&self, _ticker: &str) -> Result<EarningsFeed, DataError> {
        unimplemented!("price tests never fetch earnings")
    }
}

fn synchronizer(
    root: &Path,
    source: Arc<ScriptedSource>,
    now: NaiveDateTime,
) -> SeriesSynchronizer {
    SeriesSynchronizer::new(
        SeriesStore::new(root),
        source,
        Arc::new(EveryDayCalendar),
        Arc::new(FixedClock(now)),
    )
}

#[test]
fn cold_start_fetches_full_history() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(ScriptedSource {
        full: rows_from(d(2024, 1, 1), &[10.0, 11.0, 12.0, 13.0, 14.0]),
        ..Default::default()
    });
    let sync = synchronizer(dir.path(), source.clone(), at(d(2024, 1, 5), 17, 0));

    let loaded = sync.load("AAPL", d(2024, 1, 1), d(2024, 1, 5)).unwrap();
    assert_eq!(source.calls(), vec![OutputSize::Full]);
    assert_eq!(loaded.len(), 5);
    // Newest first.
    assert_eq!(loaded[0].price.date, d(2024, 1, 5));
    assert_eq!(loaded[4].price.date, d(2024, 1, 1));

    let store = SeriesStore::new(dir.path());
    assert!(store.exists("AAPL", SeriesKind::DailyAdjusted));
    assert!(store.exists("AAPL", SeriesKind::Features));
}

#[test]
fn fresh_cache_serves_without_fetching() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(ScriptedSource {
        full: rows_from(d(2024, 1, 1), &[10.0, 11.0, 12.0]),
        ..Default::default()
    });
    // Cache ends at the 3rd; clock sits on the 3rd before the close.
    let now = at(d(2024, 1, 3), 12, 0);
    let sync = synchronizer(dir.path(), source.clone(), now);
    sync.load("AAPL", d(2024, 1, 1), d(2024, 1, 3)).unwrap();
    assert_eq!(source.call_count(), 1);

    let again = sync.load("AAPL", d(2024, 1, 1), d(2024, 1, 3)).unwrap();
    assert_eq!(source.call_count(), 1, "fresh cache must not refetch");
    assert_eq!(again.len(), 3);
}

#[test]
fn staleness_respects_publication_window() {
    let dir = tempfile::tempdir().unwrap();
    let full = rows_from(d(2024, 1, 1), &[10.0, 11.0]);
    let source = Arc::new(ScriptedSource {
        full: full.clone(),
        compact: rows_from(d(2024, 1, 2), &[11.0, 12.0]),
        ..Default::default()
    });

    // Seed the cache (ends 2024-01-02).
    synchronizer(dir.path(), source.clone(), at(d(2024, 1, 2), 17, 0))
        .load("AAPL", d(2024, 1, 1), d(2024, 1, 2))
        .unwrap();
    assert_eq!(source.calls(), vec![OutputSize::Full]);

    // Next session's close is 16:00; before 16:30 the row is not yet
    // expected, so the cache still counts as fresh.
    synchronizer(dir.path(), source.clone(), at(d(2024, 1, 3), 16, 15))
        .load("AAPL", d(2024, 1, 1), d(2024, 1, 3))
        .unwrap();
    assert_eq!(source.calls(), vec![OutputSize::Full]);

    // Past the grace window the cache is stale and a compact fetch runs.
    synchronizer(dir.path(), source.clone(), at(d(2024, 1, 3), 16, 45))
        .load("AAPL", d(2024, 1, 1), d(2024, 1, 3))
        .unwrap();
    assert_eq!(source.calls(), vec![OutputSize::Full, OutputSize::Compact]);
}

#[test]
fn merge_appends_only_rows_after_cached_end() {
    let dir = tempfile::tempdir().unwrap();
    // Cached 01-01..01-05; compact window overlaps 01-04/01-05 with
    // different values, then extends to 01-08.
    let source = Arc::new(ScriptedSource {
        full: rows_from(d(2024, 1, 1), &[10.0, 11.0, 12.0, 13.0, 14.0]),
        compact: rows_from(d(2024, 1, 4), &[99.0, 99.0, 15.0, 16.0, 17.0]),
        ..Default::default()
    });
    synchronizer(dir.path(), source.clone(), at(d(2024, 1, 5), 17, 0))
        .load("AAPL", d(2024, 1, 1), d(2024, 1, 5))
        .unwrap();

    let loaded = synchronizer(dir.path(), source.clone(), at(d(2024, 1, 8), 17, 0))
        .load("AAPL", d(2024, 1, 1), d(2024, 1, 8))
        .unwrap();

    assert_eq!(loaded.len(), 8);
    // Overlap dates keep the cached values, not the refetched ones.
    let by_date =
        |date: NaiveDate| loaded.iter().find(|r| r.price.date == date).unwrap().price.close;
    assert!((by_date(d(2024, 1, 4)) - 13.0).abs() < 1e-9);
    assert!((by_date(d(2024, 1, 5)) - 14.0).abs() < 1e-9);
    assert!((by_date(d(2024, 1, 8)) - 17.0).abs() < 1e-9);
}

#[test]
fn provider_failure_surfaces_and_preserves_cache() {
    let dir = tempfile::tempdir().unwrap();
    let full = rows_from(d(2024, 1, 1), &[10.0, 11.0, 12.0]);
    let source = Arc::new(ScriptedSource {
        full: full.clone(),
        ..Default::default()
    });
    synchronizer(dir.path(), source, at(d(2024, 1, 3), 17, 0))
        .load("AAPL", d(2024, 1, 1), d(2024, 1, 3))
        .unwrap();

    let failing = Arc::new(ScriptedSource {
        fail: true,
        ..Default::default()
    });
    let result = synchronizer(dir.path(), failing, at(d(2024, 1, 10), 17, 0))
        .load("AAPL", d(2024, 1, 1), d(2024, 1, 10));
    assert!(matches!(result, Err(DataError::SourceUnavailable(_))));

    // The cached series is intact and still serves once the clock says fresh.
    let prices = SeriesStore::new(dir.path()).read_prices("AAPL").unwrap();
    assert_eq!(prices, full);
}

#[test]
fn no_new_rows_leaves_store_bytes_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let same = rows_from(d(2024, 1, 1), &[10.0, 11.0, 12.0]);
    let source = Arc::new(ScriptedSource {
        full: same.clone(),
        compact: same,
        ..Default::default()
    });
    synchronizer(dir.path(), source.clone(), at(d(2024, 1, 3), 17, 0))
        .load("AAPL", d(2024, 1, 1), d(2024, 1, 3))
        .unwrap();

    let blob = dir.path().join("ticker=AAPL/daily_adjusted.parquet");
    let features = dir.path().join("ticker=AAPL/features.parquet");
    let before = (std::fs::read(&blob).unwrap(), std::fs::read(&features).unwrap());

    // Stale by the calendar, but the provider has nothing past our end.
    synchronizer(dir.path(), source.clone(), at(d(2024, 1, 5), 17, 0))
        .load("AAPL", d(2024, 1, 1), d(2024, 1, 5))
        .unwrap();
    assert_eq!(source.calls(), vec![OutputSize::Full, OutputSize::Compact]);

    let after = (std::fs::read(&blob).unwrap(), std::fs::read(&features).unwrap());
    assert_eq!(before, after, "repeat load must not rewrite blobs");
}

#[test]
fn load_slices_inclusively_and_descending() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(ScriptedSource {
        full: rows_from(d(2024, 1, 1), &[10.0, 11.0, 12.0, 13.0, 14.0, 15.0]),
        ..Default::default()
    });
    let sync = synchronizer(dir.path(), source, at(d(2024, 1, 6), 17, 0));

    let loaded = sync.load("AAPL", d(2024, 1, 2), d(2024, 1, 4)).unwrap();
    let dates: Vec<NaiveDate> = loaded.iter().map(|r| r.price.date).collect();
    assert_eq!(dates, vec![d(2024, 1, 4), d(2024, 1, 3), d(2024, 1, 2)]);
}

#[test]
fn inverted_range_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let sync = synchronizer(
        dir.path(),
        Arc::new(ScriptedSource::default()),
        at(d(2024, 1, 6), 17, 0),
    );
    assert!(matches!(
        sync.load("AAPL", d(2024, 1, 4), d(2024, 1, 2)),
        Err(DataError::InvalidRequest(_))
    ));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// After any cold load plus one stale merge, the stored price series
    /// is strictly ascending with no duplicate dates and never loses a
    /// cached row.
    #[test]
    fn merged_series_stays_ordered_and_duplicate_free(
        initial in prop::collection::vec(1.0f64..1000.0, 1..30),
        extra in prop::collection::vec(1.0f64..1000.0, 0..10),
        overlap in 0usize..5,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let start = d(2024, 1, 1);
        let full = rows_from(start, &initial);
        let cached_end = full.last().unwrap().date;

        let overlap = overlap.min(initial.len());
        let compact_start = cached_end - Duration::days(overlap as i64) + Duration::days(1);
        let compact_closes: Vec<f64> =
            initial[initial.len() - overlap..].iter().chain(extra.iter()).copied().collect();
        let compact = rows_from(compact_start, &compact_closes);

        let source = Arc::new(ScriptedSource { full, compact, ..Default::default() });
        synchronizer(dir.path(), source.clone(), cached_end.and_hms_opt(17, 0, 0).unwrap())
            .load("T", start, cached_end)
            .unwrap();
        let far = cached_end + Duration::days(30);
        synchronizer(dir.path(), source, far.and_hms_opt(17, 0, 0).unwrap())
            .load("T", start, far)
            .unwrap();

        let stored = SeriesStore::new(dir.path()).read_prices("T").unwrap();
        prop_assert_eq!(stored.len(), initial.len() + extra.len());
        for pair in stored.windows(2) {
            prop_assert!(pair[0].date < pair[1].date);
        }
    }
}
