//! Data pipeline: provider abstraction, HTTP source, on-disk store, and
//! the price/report synchronizers that tie them together.

pub mod alpha_vantage;
pub mod provider;
pub mod reports;
pub mod store;
pub mod sync;

pub use alpha_vantage::AlphaVantageSource;
pub use provider::{DataError, EarningsFeed, MarketDataSource, OutputSize};
pub use reports::{parse_report_kind, ReportSynchronizer};
pub use store::{SeriesMeta, SeriesStore};
pub use sync::SeriesSynchronizer;
