//! Market-data source trait and structured error types.
//!
//! `MarketDataSource` abstracts over remote providers so the synchronizers
//! can be exercised against scripted fakes; the HTTP implementation lives in
//! `alpha_vantage.rs`.

use crate::domain::{EarningsRow, PriceRow, ReportPeriod, ReportRow, ReportType};
use thiserror::Error;

/// How much history to request: the full series or the recent window.
///
/// Compact is the suffix-fetch optimization — once a cache exists, only the
/// missing tail is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSize {
    Compact,
    Full,
}

impl OutputSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputSize::Compact => "compact",
            OutputSize::Full => "full",
        }
    }
}

/// Earnings feed for one ticker, split by period.
#[derive(Debug, Clone, Default)]
pub struct EarningsFeed {
    pub annual: Vec<EarningsRow>,
    pub quarterly: Vec<EarningsRow>,
}

/// Error kinds across the fetch/store/synchronize pipeline.
///
/// A fetch either fully succeeds or fails with one of these; partial row
/// sets are never surfaced. `SourceUnavailable` and `RateLimited` are
/// retryable at the caller's discretion — the core retries nothing on its
/// own once a fetch has failed.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("no cached series for key '{key}'")]
    NotFound { key: String },

    #[error("provider unavailable: {0}")]
    SourceUnavailable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("provider response format changed: {0}")]
    InvalidResponse(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("store error: {0}")]
    StoreError(String),

    #[error("config error: {0}")]
    ConfigError(String),
}

/// Remote market-data provider capability.
///
/// Implementations own transport concerns (timeouts, backoff); callers own
/// retry policy after a surfaced failure.
pub trait MarketDataSource: Send + Sync {
    /// Human-readable provider name.
    fn name(&self) -> &str;

    /// Daily adjusted OHLCV rows for a ticker. Row order is unspecified;
    /// callers sort ascending before use.
    fn fetch_daily_adjusted(
        &self,
        ticker: &str,
        size: OutputSize,
    ) -> Result<Vec<PriceRow>, DataError>;

    /// Fundamental statement rows for a ticker. EPS fields are absent at
    /// this stage; the report synchronizer merges them in from the
    /// earnings feed.
    fn fetch_report(
        &self,
        ticker: &str,
        report: ReportType,
        period: ReportPeriod,
    ) -> Result<Vec<ReportRow>, DataError>;

    /// Earnings rows (annual and quarterly) for a ticker.
    fn fetch_earnings(&self, ticker: &str) -> Result<EarningsFeed, DataError>;
}
