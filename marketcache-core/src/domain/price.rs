//! Daily price rows and the feature rows derived from them.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Daily adjusted OHLCV row for a single ticker, as delivered by the provider.
///
/// `adjusted_close` is the canonical field every derived indicator keys off.
/// Volume is integer-valued but carried as f64: the provider formats it as a
/// float and `log_volume` consumes it as one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRow {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub adjusted_close: f64,
    pub volume: f64,
    pub dividend: f64,
    pub split_coefficient: f64,
}

impl PriceRow {
    /// Basic sanity check: high >= low, high/low bracket open and close,
    /// prices positive. Rows failing this are kept (the store never rewrites
    /// history) but flag provider trouble upstream.
    pub fn is_sane(&self) -> bool {
        self.high >= self.low
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
            && self.open > 0.0
            && self.close > 0.0
            && self.adjusted_close > 0.0
    }
}

/// A `PriceRow` extended with the derived indicator columns.
///
/// Every indicator is a pure function of a window of prior
/// adjusted_close/high/low/volume values ending at this row's date. `None`
/// marks a window that has not filled yet — never a fabricated value.
/// Readers of older blobs that predate a column see `None` for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    #[serde(flatten)]
    pub price: PriceRow,

    pub log_return: Option<f64>,
    pub volatility: Option<f64>,
    pub volatility_change: Option<f64>,
    pub log_volume: Option<f64>,
    pub daily_returns: Option<f64>,
    pub ma_5: Option<f64>,
    pub ma_30: Option<f64>,
    pub sma_10: Option<f64>,
    pub rsi_14: Option<f64>,
    pub var_5: Option<f64>,
    pub williams_r: Option<f64>,
    pub z_score: Option<f64>,
    pub ema_12: Option<f64>,
    pub macd: Option<f64>,
    pub roc_1: Option<f64>,
    pub k_15: Option<f64>,
    pub bollinger_mid: Option<f64>,
    pub bollinger_upper: Option<f64>,
    pub bollinger_lower: Option<f64>,
    pub mom_12: Option<f64>,
}

/// True when every consecutive pair of dates is strictly increasing.
///
/// Invariant for every stored series; checked after each merge.
pub fn is_strictly_ascending(rows: &[PriceRow]) -> bool {
    rows.windows(2).all(|w| w[0].date < w[1].date)
}
