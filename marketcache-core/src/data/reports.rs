//! Fundamental report synchronizer.
//!
//! Same cycle as the price synchronizer, at fiscal-period granularity:
//! staleness is measured in days since the newest cached fiscal period
//! end (365 for annual, 91 for quarterly), new periods merge strictly
//! after the cached end, and every update re-fetches the earnings feed
//! and realigns EPS figures onto all rows, not just the appended ones —
//! earnings restatements touch old periods.

use super::provider::{DataError, MarketDataSource};
use super::store::SeriesStore;
use crate::clock::Clock;
use crate::domain::{EarningsRow, ReportPeriod, ReportRow, ReportType};
use chrono::{Datelike, Duration, NaiveDate};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub struct ReportSynchronizer {
    store: SeriesStore,
    source: Arc<dyn MarketDataSource>,
    clock: Arc<dyn Clock>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ReportSynchronizer {
    pub fn new(store: SeriesStore, source: Arc<dyn MarketDataSource>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            source,
            clock,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &SeriesStore {
        &self.store
    }

    /// Report rows for `ticker` with fiscal period ends between `begin`
    /// and `end` inclusive, newest first. Synchronizes the cache
    /// beforehand if stale.
    pub fn load(
        &self,
        ticker: &str,
        report: ReportType,
        period: ReportPeriod,
        begin: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<ReportRow>, DataError> {
        if begin > end {
            return Err(DataError::InvalidRequest(format!(
                "begin {begin} is after end {end}"
            )));
        }
        let rows = self.synchronized_reports(ticker, report, period)?;
        let mut slice: Vec<ReportRow> = rows
            .into_iter()
            .filter(|r| r.fiscal_date_ending >= begin && r.fiscal_date_ending <= end)
            .collect();
        slice.reverse();
        Ok(slice)
    }

    fn lock_key(ticker: &str, report: ReportType, period: ReportPeriod) -> String {
        format!("{ticker}/{}_{}", period.as_str(), report.as_str())
    }

    fn series_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(key.to_string()).or_default().clone()
    }

    fn synchronized_reports(
        &self,
        ticker: &str,
        report: ReportType,
        period: ReportPeriod,
    ) -> Result<Vec<ReportRow>, DataError> {
        let key = Self::lock_key(ticker, report, period);
        let lock = self.series_lock(&key);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let cached = match self.store.read_reports(ticker, report, period) {
            Ok(rows) => rows,
            Err(DataError::NotFound { .. }) => Vec::new(),
            Err(e) => return Err(e),
        };

        let last = cached.last().map(|r| r.fiscal_date_ending);
        if let Some(last) = last {
            if !self.is_stale(last, period) {
                return Ok(cached);
            }
        }

        let mut fetched = self.source.fetch_report(ticker, report, period)?;
        fetched.sort_by_key(|r| r.fiscal_date_ending);
        fetched.dedup_by_key(|r| r.fiscal_date_ending);

        let mut merged = cached.clone();
        for row in fetched {
            if last.map_or(true, |cutoff| row.fiscal_date_ending > cutoff) {
                merged.push(row);
            }
        }
        if merged.is_empty() {
            return Err(DataError::InvalidResponse(format!(
                "provider returned no {period:?} {report:?} rows for '{ticker}'",
            )));
        }

        // Earnings realignment covers the whole series on every update:
        // restated EPS figures land on periods that merged long ago.
        let feed = self.source.fetch_earnings(ticker)?;
        let earnings = match period {
            ReportPeriod::Annual => &feed.annual,
            ReportPeriod::Quarterly => &feed.quarterly,
        };
        align_earnings(&mut merged, earnings);

        if merged.len() == cached.len() && merged == cached {
            // Nothing changed; leave the store byte-identical.
            return Ok(cached);
        }
        self.store.write_reports(ticker, report, period, &merged)?;
        Ok(merged)
    }

    /// A report series is stale once a full fiscal period could have
    /// elapsed since its newest period end.
    fn is_stale(&self, last: NaiveDate, period: ReportPeriod) -> bool {
        let today = self.clock.now().date();
        (today - last).num_days() > period.staleness_days()
    }
}

/// Attach EPS figures from the earnings feed to each report row.
///
/// Fiscal period ends rarely disagree between the statement and earnings
/// feeds, but some issuers report earnings against the month-end one
/// month after the statement's period end. Exact match wins; the
/// month-end-of-following-month fallback covers the rest; no match
/// leaves the EPS fields empty.
pub fn align_earnings(rows: &mut [ReportRow], earnings: &[EarningsRow]) {
    let by_date: HashMap<NaiveDate, &EarningsRow> =
        earnings.iter().map(|e| (e.fiscal_date_ending, e)).collect();

    for row in rows.iter_mut() {
        let date = row.fiscal_date_ending;
        let hit = by_date
            .get(&date)
            .or_else(|| by_date.get(&month_end_of_following_month(date)));
        match hit {
            Some(e) => {
                row.reported_eps = e.reported_eps;
                row.estimated_eps = e.estimated_eps;
                row.surprise = e.surprise;
                row.surprise_percentage = e.surprise_percentage;
                if row.reported_date.is_none() {
                    row.reported_date = e.reported_date;
                }
            }
            None => {
                row.reported_eps = None;
                row.estimated_eps = None;
                row.surprise = None;
                row.surprise_percentage = None;
            }
        }
    }
}

/// Last day of the month after the given date's month.
fn month_end_of_following_month(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() >= 11 {
        (date.year() + 1, date.month() - 10)
    } else {
        (date.year(), date.month() + 2)
    };
    // First of the month after next, minus one day.
    NaiveDate::from_ymd_opt(year, month, 1)
        .map(|d| d - Duration::days(1))
        .unwrap_or(date)
}

/// Resolve CLI-facing statement and period names.
pub fn parse_report_kind(statement: &str, period: &str) -> Result<(ReportType, ReportPeriod), DataError> {
    let report = ReportType::parse(statement).ok_or_else(|| {
        DataError::InvalidRequest(format!(
            "unknown statement '{statement}' (expected income, balance, or cashflow)"
        ))
    })?;
    let period = match period.to_ascii_lowercase().as_str() {
        "annual" | "yearly" => ReportPeriod::Annual,
        "quarterly" => ReportPeriod::Quarterly,
        other => {
            return Err(DataError::InvalidRequest(format!(
                "unknown period '{other}' (expected annual or quarterly)"
            )))
        }
    };
    Ok((report, period))
}
