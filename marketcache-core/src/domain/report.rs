//! Fundamental report rows, earnings rows, and series-kind addressing.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One fundamental report row, keyed by fiscal period end.
///
/// Provider-defined line items pass through opaquely as strings. The EPS
/// fields are not part of the statement payload; they are merged in from the
/// earnings feed by fiscal-date alignment and stay `None` when no earnings
/// row matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    pub fiscal_date_ending: NaiveDate,
    /// Date the report was publicly released; may trail the fiscal period
    /// end by weeks. Not all statement payloads carry it.
    pub reported_date: Option<NaiveDate>,
    pub items: BTreeMap<String, String>,
    pub reported_eps: Option<f64>,
    pub estimated_eps: Option<f64>,
    pub surprise: Option<f64>,
    pub surprise_percentage: Option<f64>,
}

/// One row of the earnings feed, keyed by fiscal quarter (or year) end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarningsRow {
    pub fiscal_date_ending: NaiveDate,
    pub reported_date: Option<NaiveDate>,
    pub reported_eps: Option<f64>,
    pub estimated_eps: Option<f64>,
    pub surprise: Option<f64>,
    pub surprise_percentage: Option<f64>,
}

/// Statement kind. A tagged variant instead of the provider's free-form
/// strings; unknown strings fail at the parse boundary, never silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportType {
    IncomeStatement,
    BalanceSheet,
    CashFlow,
}

impl ReportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportType::IncomeStatement => "income_statement",
            ReportType::BalanceSheet => "balance_sheet",
            ReportType::CashFlow => "cash_flow",
        }
    }

    /// Parse a user-facing statement name. `None` for anything unknown.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "income_statement" | "income" => Some(ReportType::IncomeStatement),
            "balance_sheet" | "balance" => Some(ReportType::BalanceSheet),
            "cash_flow" | "cashflow" => Some(ReportType::CashFlow),
            _ => None,
        }
    }
}

/// Reporting period of a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportPeriod {
    Annual,
    Quarterly,
}

impl ReportPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportPeriod::Annual => "annual",
            ReportPeriod::Quarterly => "quarterly",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "annual" => Some(ReportPeriod::Annual),
            "quarterly" => Some(ReportPeriod::Quarterly),
            _ => None,
        }
    }

    /// Days past the newest fiscal date before the cache counts as stale.
    pub fn staleness_days(&self) -> i64 {
        match self {
            ReportPeriod::Annual => 365,
            ReportPeriod::Quarterly => 91,
        }
    }
}

/// Second component of a store key: which series a blob holds for a ticker.
///
/// `file_stem` gives the stable on-disk name, e.g. `daily_adjusted` or
/// `quarterly_income_statement`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesKind {
    DailyAdjusted,
    Features,
    Report(ReportType, ReportPeriod),
}

impl SeriesKind {
    pub fn file_stem(&self) -> String {
        match self {
            SeriesKind::DailyAdjusted => "daily_adjusted".to_string(),
            SeriesKind::Features => "features".to_string(),
            SeriesKind::Report(report, period) => {
                format!("{}_{}", period.as_str(), report.as_str())
            }
        }
    }
}

impl fmt::Display for SeriesKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_stem())
    }
}
