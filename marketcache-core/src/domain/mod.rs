//! Domain types: price rows, derived feature rows, fundamental report rows.

pub mod price;
pub mod report;

pub use price::{is_strictly_ascending, FeatureRow, PriceRow};
pub use report::{EarningsRow, ReportPeriod, ReportRow, ReportType, SeriesKind};
