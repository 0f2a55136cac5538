//! marketcache-core: incremental market-data caching.
//!
//! A local store of daily adjusted price series and fundamental reports
//! that stays current with minimal provider traffic. Loads check the
//! cached series against a trading calendar, fetch only the missing
//! suffix when stale, merge without duplicates, and re-derive a full
//! frame of technical indicator columns so consumers always read one
//! consistent, deterministic series.

pub mod calendar;
pub mod clock;
pub mod config;
pub mod data;
pub mod domain;
pub mod features;

pub use calendar::{Session, TradingCalendar, UsEquityCalendar};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::Config;
pub use data::{
    AlphaVantageSource, DataError, MarketDataSource, ReportSynchronizer, SeriesStore,
    SeriesSynchronizer,
};
pub use domain::{FeatureRow, PriceRow, ReportPeriod, ReportRow, ReportType, SeriesKind};
pub use features::derive_features;
