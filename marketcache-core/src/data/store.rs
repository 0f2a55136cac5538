//! Persistent series store, keyed by (ticker, series kind).
//!
//! Layout: `{root}/ticker={TICKER}/{kind}.parquet` for price and feature
//! frames (columnar, compressed at rest), `{kind}.json` for report frames
//! (line items are ragged and provider-defined, so a self-describing row
//! encoding is used). Each key carries a `{kind}.meta.json` sidecar with
//! the date range, row count and a content hash.
//!
//! All writes are atomic: write to `.tmp`, rename into place. A crash
//! mid-write leaves the previous blob readable; no partial state is ever
//! observable to a subsequent reader.
//!
//! Feature columns are additive: a blob written before a column existed
//! reads as `None` for it.

use super::provider::DataError;
use crate::domain::{FeatureRow, PriceRow, ReportPeriod, ReportRow, ReportType, SeriesKind};
use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Metadata sidecar for one stored series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesMeta {
    pub ticker: String,
    pub kind: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub row_count: usize,
    pub data_hash: String,
    pub cached_at: chrono::NaiveDateTime,
}

/// The on-disk series store.
pub struct SeriesStore {
    root: PathBuf,
}

impl SeriesStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ticker_dir(&self, ticker: &str) -> PathBuf {
        self.root.join(format!("ticker={ticker}"))
    }

    fn blob_path(&self, ticker: &str, kind: SeriesKind) -> PathBuf {
        let ext = match kind {
            SeriesKind::Report(..) => "json",
            _ => "parquet",
        };
        self.ticker_dir(ticker)
            .join(format!("{}.{ext}", kind.file_stem()))
    }

    fn meta_path(&self, ticker: &str, kind: SeriesKind) -> PathBuf {
        self.ticker_dir(ticker)
            .join(format!("{}.meta.json", kind.file_stem()))
    }

    fn key(ticker: &str, kind: SeriesKind) -> String {
        format!("{ticker}/{}", kind.file_stem())
    }

    /// Whether a blob exists for this key.
    pub fn exists(&self, ticker: &str, kind: SeriesKind) -> bool {
        self.blob_path(ticker, kind).exists()
    }

    // ── price frames ────────────────────────────────────────────────

    pub fn write_prices(&self, ticker: &str, rows: &[PriceRow]) -> Result<(), DataError> {
        if rows.is_empty() {
            return Err(DataError::StoreError("refusing to write empty series".into()));
        }
        let df = prices_to_dataframe(rows)?;
        self.write_parquet_blob(ticker, SeriesKind::DailyAdjusted, &df)?;
        self.write_meta(
            ticker,
            SeriesKind::DailyAdjusted,
            rows.first().map(|r| r.date).unwrap_or_default(),
            rows.last().map(|r| r.date).unwrap_or_default(),
            rows.len(),
            content_hash(rows)?,
        )
    }

    /// All cached price rows for a ticker, ascending by date as stored.
    pub fn read_prices(&self, ticker: &str) -> Result<Vec<PriceRow>, DataError> {
        let df = self.read_parquet_blob(ticker, SeriesKind::DailyAdjusted)?;
        dataframe_to_prices(&df)
    }

    // ── feature frames ──────────────────────────────────────────────

    pub fn write_features(&self, ticker: &str, rows: &[FeatureRow]) -> Result<(), DataError> {
        if rows.is_empty() {
            return Err(DataError::StoreError("refusing to write empty series".into()));
        }
        let df = features_to_dataframe(rows)?;
        self.write_parquet_blob(ticker, SeriesKind::Features, &df)?;
        self.write_meta(
            ticker,
            SeriesKind::Features,
            rows.first().map(|r| r.price.date).unwrap_or_default(),
            rows.last().map(|r| r.price.date).unwrap_or_default(),
            rows.len(),
            content_hash(rows)?,
        )
    }

    /// All cached feature rows for a ticker, ascending by date as stored.
    /// Indicator columns absent from older blobs read as `None`.
    pub fn read_features(&self, ticker: &str) -> Result<Vec<FeatureRow>, DataError> {
        let df = self.read_parquet_blob(ticker, SeriesKind::Features)?;
        dataframe_to_features(&df)
    }

    // ── report frames ───────────────────────────────────────────────

    pub fn write_reports(
        &self,
        ticker: &str,
        report: ReportType,
        period: ReportPeriod,
        rows: &[ReportRow],
    ) -> Result<(), DataError> {
        if rows.is_empty() {
            return Err(DataError::StoreError("refusing to write empty series".into()));
        }
        let kind = SeriesKind::Report(report, period);
        let path = self.blob_path(ticker, kind);
        self.ensure_ticker_dir(ticker)?;

        let bytes = serde_json::to_vec_pretty(rows)
            .map_err(|e| DataError::StoreError(format!("report serialization: {e}")))?;
        atomic_write(&path, &bytes)?;

        self.write_meta(
            ticker,
            kind,
            rows.first().map(|r| r.fiscal_date_ending).unwrap_or_default(),
            rows.last().map(|r| r.fiscal_date_ending).unwrap_or_default(),
            rows.len(),
            blake3::hash(&bytes).to_hex().to_string(),
        )
    }

    /// All cached report rows for a key, ascending by fiscal date as stored.
    pub fn read_reports(
        &self,
        ticker: &str,
        report: ReportType,
        period: ReportPeriod,
    ) -> Result<Vec<ReportRow>, DataError> {
        let kind = SeriesKind::Report(report, period);
        let path = self.blob_path(ticker, kind);
        if !path.exists() {
            return Err(DataError::NotFound {
                key: Self::key(ticker, kind),
            });
        }
        let content = fs::read_to_string(&path)
            .map_err(|e| DataError::StoreError(format!("report read: {e}")))?;
        serde_json::from_str(&content)
            .map_err(|e| DataError::StoreError(format!("report decode: {e}")))
    }

    // ── metadata ────────────────────────────────────────────────────

    /// Metadata sidecar for a key, if present and parseable.
    pub fn meta(&self, ticker: &str, kind: SeriesKind) -> Option<SeriesMeta> {
        let content = fs::read_to_string(self.meta_path(ticker, kind)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Every metadata sidecar under the store root, sorted by ticker then kind.
    pub fn statuses(&self) -> Vec<SeriesMeta> {
        let mut metas = Vec::new();
        let Ok(entries) = fs::read_dir(&self.root) else {
            return metas;
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with("ticker=") {
                continue;
            }
            let Ok(files) = fs::read_dir(entry.path()) else {
                continue;
            };
            for file in files.flatten() {
                let fname = file.file_name().to_string_lossy().to_string();
                if !fname.ends_with(".meta.json") {
                    continue;
                }
                if let Ok(content) = fs::read_to_string(file.path()) {
                    if let Ok(meta) = serde_json::from_str::<SeriesMeta>(&content) {
                        metas.push(meta);
                    }
                }
            }
        }
        metas.sort_by(|a, b| a.ticker.cmp(&b.ticker).then(a.kind.cmp(&b.kind)));
        metas
    }

    // ── internals ───────────────────────────────────────────────────

    fn ensure_ticker_dir(&self, ticker: &str) -> Result<(), DataError> {
        fs::create_dir_all(self.ticker_dir(ticker))
            .map_err(|e| DataError::StoreError(format!("failed to create dir: {e}")))
    }

    fn write_parquet_blob(
        &self,
        ticker: &str,
        kind: SeriesKind,
        df: &DataFrame,
    ) -> Result<(), DataError> {
        self.ensure_ticker_dir(ticker)?;
        let path = self.blob_path(ticker, kind);
        let tmp_path = path.with_extension("parquet.tmp");

        let file = fs::File::create(&tmp_path)
            .map_err(|e| DataError::StoreError(format!("create file: {e}")))?;
        ParquetWriter::new(file)
            .finish(&mut df.clone())
            .map_err(|e| DataError::StoreError(format!("write parquet: {e}")))?;

        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            DataError::StoreError(format!("atomic rename failed: {e}"))
        })
    }

    fn read_parquet_blob(&self, ticker: &str, kind: SeriesKind) -> Result<DataFrame, DataError> {
        let path = self.blob_path(ticker, kind);
        if !path.exists() {
            return Err(DataError::NotFound {
                key: Self::key(ticker, kind),
            });
        }
        let file =
            fs::File::open(&path).map_err(|e| DataError::StoreError(format!("open: {e}")))?;
        ParquetReader::new(file)
            .finish()
            .map_err(|e| DataError::StoreError(format!("read parquet: {e}")))
    }

    fn write_meta(
        &self,
        ticker: &str,
        kind: SeriesKind,
        start_date: NaiveDate,
        end_date: NaiveDate,
        row_count: usize,
        data_hash: String,
    ) -> Result<(), DataError> {
        let meta = SeriesMeta {
            ticker: ticker.to_string(),
            kind: kind.file_stem(),
            start_date,
            end_date,
            row_count,
            data_hash,
            cached_at: chrono::Local::now().naive_local(),
        };
        let json = serde_json::to_string_pretty(&meta)
            .map_err(|e| DataError::StoreError(format!("meta serialization: {e}")))?;
        atomic_write(&self.meta_path(ticker, kind), json.as_bytes())
    }
}

fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), DataError> {
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, bytes).map_err(|e| DataError::StoreError(format!("write: {e}")))?;
    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        DataError::StoreError(format!("atomic rename failed: {e}"))
    })
}

fn content_hash<T: Serialize>(rows: &[T]) -> Result<String, DataError> {
    let bytes = serde_json::to_vec(rows)
        .map_err(|e| DataError::StoreError(format!("hash serialization: {e}")))?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

// ── Parquet column mapping ──────────────────────────────────────────

/// Indicator columns in fixed on-disk order. New columns append here;
/// readers of older blobs see `None` for columns they predate.
const INDICATOR_COLUMNS: [&str; 20] = [
    "log_return",
    "volatility",
    "volatility_change",
    "log_volume",
    "daily_returns",
    "ma_5",
    "ma_30",
    "sma_10",
    "rsi_14",
    "var_5",
    "williams_r",
    "z_score",
    "ema_12",
    "macd",
    "roc_1",
    "k_15",
    "bollinger_mid",
    "bollinger_upper",
    "bollinger_lower",
    "mom_12",
];

fn indicator_value(row: &FeatureRow, column: &str) -> Option<f64> {
    match column {
        "log_return" => row.log_return,
        "volatility" => row.volatility,
        "volatility_change" => row.volatility_change,
        "log_volume" => row.log_volume,
        "daily_returns" => row.daily_returns,
        "ma_5" => row.ma_5,
        "ma_30" => row.ma_30,
        "sma_10" => row.sma_10,
        "rsi_14" => row.rsi_14,
        "var_5" => row.var_5,
        "williams_r" => row.williams_r,
        "z_score" => row.z_score,
        "ema_12" => row.ema_12,
        "macd" => row.macd,
        "roc_1" => row.roc_1,
        "k_15" => row.k_15,
        "bollinger_mid" => row.bollinger_mid,
        "bollinger_upper" => row.bollinger_upper,
        "bollinger_lower" => row.bollinger_lower,
        "mom_12" => row.mom_12,
        _ => unreachable!("unknown indicator column '{column}'"),
    }
}

fn set_indicator(row: &mut FeatureRow, column: &str, value: Option<f64>) {
    match column {
        "log_return" => row.log_return = value,
        "volatility" => row.volatility = value,
        "volatility_change" => row.volatility_change = value,
        "log_volume" => row.log_volume = value,
        "daily_returns" => row.daily_returns = value,
        "ma_5" => row.ma_5 = value,
        "ma_30" => row.ma_30 = value,
        "sma_10" => row.sma_10 = value,
        "rsi_14" => row.rsi_14 = value,
        "var_5" => row.var_5 = value,
        "williams_r" => row.williams_r = value,
        "z_score" => row.z_score = value,
        "ema_12" => row.ema_12 = value,
        "macd" => row.macd = value,
        "roc_1" => row.roc_1 = value,
        "k_15" => row.k_15 = value,
        "bollinger_mid" => row.bollinger_mid = value,
        "bollinger_upper" => row.bollinger_upper = value,
        "bollinger_lower" => row.bollinger_lower = value,
        "mom_12" => row.mom_12 = value,
        _ => unreachable!("unknown indicator column '{column}'"),
    }
}

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap()
}

fn date_column(rows: &[NaiveDate]) -> Result<Column, DataError> {
    let days: Vec<i32> = rows.iter().map(|d| (*d - epoch()).num_days() as i32).collect();
    Column::new("date".into(), days)
        .cast(&DataType::Date)
        .map_err(|e| DataError::StoreError(format!("date cast: {e}")))
}

fn prices_to_dataframe(rows: &[PriceRow]) -> Result<DataFrame, DataError> {
    let dates: Vec<NaiveDate> = rows.iter().map(|r| r.date).collect();
    DataFrame::new(vec![
        date_column(&dates)?,
        Column::new("open".into(), rows.iter().map(|r| r.open).collect::<Vec<f64>>()),
        Column::new("high".into(), rows.iter().map(|r| r.high).collect::<Vec<f64>>()),
        Column::new("low".into(), rows.iter().map(|r| r.low).collect::<Vec<f64>>()),
        Column::new("close".into(), rows.iter().map(|r| r.close).collect::<Vec<f64>>()),
        Column::new(
            "adjusted_close".into(),
            rows.iter().map(|r| r.adjusted_close).collect::<Vec<f64>>(),
        ),
        Column::new("volume".into(), rows.iter().map(|r| r.volume).collect::<Vec<f64>>()),
        Column::new(
            "dividend".into(),
            rows.iter().map(|r| r.dividend).collect::<Vec<f64>>(),
        ),
        Column::new(
            "split_coefficient".into(),
            rows.iter().map(|r| r.split_coefficient).collect::<Vec<f64>>(),
        ),
    ])
    .map_err(|e| DataError::StoreError(format!("dataframe creation: {e}")))
}

fn features_to_dataframe(rows: &[FeatureRow]) -> Result<DataFrame, DataError> {
    let prices: Vec<PriceRow> = rows.iter().map(|r| r.price.clone()).collect();
    let mut df = prices_to_dataframe(&prices)?;
    for column in INDICATOR_COLUMNS {
        let values: Vec<Option<f64>> = rows.iter().map(|r| indicator_value(r, column)).collect();
        df.with_column(Column::new(column.into(), values))
            .map_err(|e| DataError::StoreError(format!("column '{column}': {e}")))?;
    }
    Ok(df)
}

fn read_f64_column(df: &DataFrame, name: &str) -> Result<Vec<f64>, DataError> {
    let col = df
        .column(name)
        .map_err(|e| DataError::StoreError(format!("missing column '{name}': {e}")))?;
    let ca = col
        .f64()
        .map_err(|e| DataError::StoreError(format!("column '{name}' type: {e}")))?;
    Ok((0..df.height())
        .map(|i| ca.get(i).unwrap_or(f64::NAN))
        .collect())
}

fn read_dates(df: &DataFrame) -> Result<Vec<NaiveDate>, DataError> {
    let col = df
        .column("date")
        .map_err(|e| DataError::StoreError(format!("missing column 'date': {e}")))?;
    let ca = col
        .date()
        .map_err(|e| DataError::StoreError(format!("date column type: {e}")))?;
    (0..df.height())
        .map(|i| {
            let days = ca
                .get(i)
                .ok_or_else(|| DataError::StoreError(format!("null date at row {i}")))?;
            Ok(epoch() + chrono::Duration::days(days as i64))
        })
        .collect()
}

fn dataframe_to_prices(df: &DataFrame) -> Result<Vec<PriceRow>, DataError> {
    let dates = read_dates(df)?;
    let open = read_f64_column(df, "open")?;
    let high = read_f64_column(df, "high")?;
    let low = read_f64_column(df, "low")?;
    let close = read_f64_column(df, "close")?;
    let adjusted_close = read_f64_column(df, "adjusted_close")?;
    let volume = read_f64_column(df, "volume")?;
    let dividend = read_f64_column(df, "dividend")?;
    let split_coefficient = read_f64_column(df, "split_coefficient")?;

    Ok((0..df.height())
        .map(|i| PriceRow {
            date: dates[i],
            open: open[i],
            high: high[i],
            low: low[i],
            close: close[i],
            adjusted_close: adjusted_close[i],
            volume: volume[i],
            dividend: dividend[i],
            split_coefficient: split_coefficient[i],
        })
        .collect())
}

fn dataframe_to_features(df: &DataFrame) -> Result<Vec<FeatureRow>, DataError> {
    let prices = dataframe_to_prices(df)?;
    let mut rows: Vec<FeatureRow> = prices
        .into_iter()
        .map(|price| FeatureRow {
            price,
            log_return: None,
            volatility: None,
            volatility_change: None,
            log_volume: None,
            daily_returns: None,
            ma_5: None,
            ma_30: None,
            sma_10: None,
            rsi_14: None,
            var_5: None,
            williams_r: None,
            z_score: None,
            ema_12: None,
            macd: None,
            roc_1: None,
            k_15: None,
            bollinger_mid: None,
            bollinger_upper: None,
            bollinger_lower: None,
            mom_12: None,
        })
        .collect();

    for column in INDICATOR_COLUMNS {
        // Absent column: blob predates it, every row reads None.
        let Ok(col) = df.column(column) else {
            continue;
        };
        let ca = col
            .f64()
            .map_err(|e| DataError::StoreError(format!("column '{column}' type: {e}")))?;
        for (i, row) in rows.iter_mut().enumerate() {
            set_indicator(row, column, ca.get(i));
        }
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{derive_features, make_prices};

    fn sample_prices() -> Vec<PriceRow> {
        make_prices(&[100.0, 101.0, 102.0, 103.0, 104.0, 105.0])
    }

    #[test]
    fn price_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SeriesStore::new(dir.path());

        let rows = sample_prices();
        store.write_prices("AAPL", &rows).unwrap();
        let loaded = store.read_prices("AAPL").unwrap();
        assert_eq!(rows, loaded);
    }

    #[test]
    fn feature_roundtrip_preserves_nulls() {
        let dir = tempfile::tempdir().unwrap();
        let store = SeriesStore::new(dir.path());

        let rows = derive_features(&sample_prices());
        store.write_features("AAPL", &rows).unwrap();
        let loaded = store.read_features("AAPL").unwrap();
        assert_eq!(rows, loaded);
        // Warm-up nulls survived the roundtrip.
        assert!(loaded[0].log_return.is_none());
        assert!(loaded[4].ma_5.is_some());
    }

    #[test]
    fn read_missing_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = SeriesStore::new(dir.path());
        assert!(matches!(
            store.read_prices("NONE"),
            Err(DataError::NotFound { .. })
        ));
        assert!(!store.exists("NONE", SeriesKind::DailyAdjusted));
    }

    #[test]
    fn older_blob_without_indicator_columns_reads_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SeriesStore::new(dir.path());

        // Simulate a blob written before any indicator column existed:
        // a bare price frame at the features path.
        let df = prices_to_dataframe(&sample_prices()).unwrap();
        store
            .write_parquet_blob("AAPL", SeriesKind::Features, &df)
            .unwrap();

        let loaded = store.read_features("AAPL").unwrap();
        assert_eq!(loaded.len(), 6);
        assert!(loaded.iter().all(|r| r.log_return.is_none()));
        assert!(loaded.iter().all(|r| r.macd.is_none()));
        assert!((loaded[0].price.open - 100.0).abs() < 1e-9);
    }

    #[test]
    fn report_roundtrip_and_meta() {
        let dir = tempfile::tempdir().unwrap();
        let store = SeriesStore::new(dir.path());

        let rows = vec![ReportRow {
            fiscal_date_ending: NaiveDate::from_ymd_opt(2023, 12, 31).unwrap(),
            reported_date: None,
            items: [("totalRevenue".to_string(), "1000".to_string())].into(),
            reported_eps: Some(2.18),
            estimated_eps: None,
            surprise: None,
            surprise_percentage: None,
        }];

        let (report, period) = (ReportType::IncomeStatement, ReportPeriod::Quarterly);
        store.write_reports("AAPL", report, period, &rows).unwrap();
        let loaded = store.read_reports("AAPL", report, period).unwrap();
        assert_eq!(rows, loaded);

        let meta = store
            .meta("AAPL", SeriesKind::Report(report, period))
            .unwrap();
        assert_eq!(meta.kind, "quarterly_income_statement");
        assert_eq!(meta.row_count, 1);
    }

    #[test]
    fn writes_leave_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = SeriesStore::new(dir.path());
        store.write_prices("AAPL", &sample_prices()).unwrap();

        let entries: Vec<String> = fs::read_dir(dir.path().join("ticker=AAPL"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert!(entries.iter().all(|name| !name.ends_with(".tmp")), "{entries:?}");
    }

    #[test]
    fn empty_write_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = SeriesStore::new(dir.path());
        assert!(matches!(
            store.write_prices("AAPL", &[]),
            Err(DataError::StoreError(_))
        ));
    }

    #[test]
    fn statuses_lists_all_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        let store = SeriesStore::new(dir.path());
        store.write_prices("AAPL", &sample_prices()).unwrap();
        store.write_prices("MSFT", &sample_prices()).unwrap();

        let metas = store.statuses();
        assert_eq!(metas.len(), 2);
        assert_eq!(metas[0].ticker, "AAPL");
        assert_eq!(metas[1].ticker, "MSFT");
    }
}
