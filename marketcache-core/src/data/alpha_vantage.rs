//! Alpha Vantage data source.
//!
//! Implements `MarketDataSource` over the provider's JSON API: the
//! numbered-column `TIME_SERIES_DAILY_ADJUSTED` payload, the statement
//! payloads (`INCOME_STATEMENT`, `BALANCE_SHEET`, `CASH_FLOW`) and the
//! `EARNINGS` feed. Throttling is reported in-band via "Note"/"Information"
//! envelopes on an HTTP 200, so every response is checked before parsing.
//!
//! Transport errors are retried with exponential backoff; once a fetch has
//! failed for good it surfaces a retryable error and the caller decides.

use super::provider::{DataError, EarningsFeed, MarketDataSource, OutputSize};
use crate::domain::{EarningsRow, PriceRow, ReportPeriod, ReportRow, ReportType};
use chrono::NaiveDate;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Alpha Vantage HTTP client.
pub struct AlphaVantageSource {
    client: reqwest::blocking::Client,
    api_key: String,
    base_url: String,
    max_retries: u32,
    base_delay: Duration,
}

impl AlphaVantageSource {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into(),
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        }
    }

    fn query_url(&self, function: &str, ticker: &str, extra: &[(&str, &str)]) -> String {
        let mut url = format!(
            "{}/query?function={function}&symbol={ticker}&apikey={}",
            self.base_url, self.api_key
        );
        for (k, v) in extra {
            url.push_str(&format!("&{k}={v}"));
        }
        url
    }

    /// One GET with bounded retry on transport errors and HTTP 429.
    ///
    /// In-band throttle envelopes are not retried here — the provider's
    /// per-minute window is far longer than any sane backoff.
    fn get_json(&self, url: &str) -> Result<Value, DataError> {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                std::thread::sleep(self.base_delay * 2u32.pow(attempt - 1));
            }

            match self.client.get(url).send() {
                Ok(resp) => {
                    let status = resp.status();

                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        let retry_after = resp
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .unwrap_or(60);
                        last_error = Some(DataError::RateLimited {
                            retry_after_secs: retry_after,
                        });
                        continue;
                    }

                    if !status.is_success() {
                        last_error = Some(DataError::SourceUnavailable(format!("HTTP {status}")));
                        continue;
                    }

                    let body: Value = resp
                        .json()
                        .map_err(|e| DataError::InvalidResponse(format!("bad JSON: {e}")))?;

                    if let Some(err) = throttle_envelope(&body) {
                        return Err(err);
                    }
                    return Ok(body);
                }
                Err(e) => {
                    if e.is_connect() || e.is_timeout() {
                        last_error = Some(DataError::SourceUnavailable(e.to_string()));
                        continue;
                    }
                    return Err(DataError::SourceUnavailable(e.to_string()));
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| DataError::SourceUnavailable("max retries exceeded".into())))
    }
}

impl MarketDataSource for AlphaVantageSource {
    fn name(&self) -> &str {
        "alpha_vantage"
    }

    fn fetch_daily_adjusted(
        &self,
        ticker: &str,
        size: OutputSize,
    ) -> Result<Vec<PriceRow>, DataError> {
        let url = self.query_url(
            "TIME_SERIES_DAILY_ADJUSTED",
            ticker,
            &[("outputsize", size.as_str())],
        );
        let body = self.get_json(&url)?;
        parse_daily(ticker, &body)
    }

    fn fetch_report(
        &self,
        ticker: &str,
        report: ReportType,
        period: ReportPeriod,
    ) -> Result<Vec<ReportRow>, DataError> {
        let function = match report {
            ReportType::IncomeStatement => "INCOME_STATEMENT",
            ReportType::BalanceSheet => "BALANCE_SHEET",
            ReportType::CashFlow => "CASH_FLOW",
        };
        let url = self.query_url(function, ticker, &[]);
        let body = self.get_json(&url)?;
        parse_reports(&body, period)
    }

    fn fetch_earnings(&self, ticker: &str) -> Result<EarningsFeed, DataError> {
        let url = self.query_url("EARNINGS", ticker, &[]);
        let body = self.get_json(&url)?;
        parse_earnings(&body)
    }
}

// ── Response parsing ────────────────────────────────────────────────

/// Detect the provider's in-band failure envelopes on an HTTP 200.
fn throttle_envelope(body: &Value) -> Option<DataError> {
    // The note text is not machine-stable; 60s matches the provider's
    // documented per-minute window.
    for key in ["Note", "Information"] {
        if body.get(key).and_then(Value::as_str).is_some() {
            return Some(DataError::RateLimited {
                retry_after_secs: 60,
            });
        }
    }
    body.get("Error Message")
        .and_then(Value::as_str)
        .map(|msg| DataError::InvalidResponse(msg.to_string()))
}

fn parse_daily(ticker: &str, body: &Value) -> Result<Vec<PriceRow>, DataError> {
    let series = body
        .get("Time Series (Daily)")
        .and_then(Value::as_object)
        .ok_or_else(|| {
            DataError::InvalidResponse(format!("no daily series object for {ticker}"))
        })?;

    let mut rows = Vec::with_capacity(series.len());
    for (date_str, fields) in series {
        let date = parse_date(date_str)?;
        rows.push(PriceRow {
            date,
            open: field_f64(fields, "1. open", date_str)?,
            high: field_f64(fields, "2. high", date_str)?,
            low: field_f64(fields, "3. low", date_str)?,
            close: field_f64(fields, "4. close", date_str)?,
            adjusted_close: field_f64(fields, "5. adjusted close", date_str)?,
            volume: field_f64(fields, "6. volume", date_str)?,
            dividend: field_f64(fields, "7. dividend amount", date_str)?,
            split_coefficient: field_f64(fields, "8. split coefficient", date_str)?,
        });
    }

    if rows.is_empty() {
        return Err(DataError::InvalidResponse(format!(
            "empty daily series for {ticker}"
        )));
    }
    Ok(rows)
}

fn parse_reports(body: &Value, period: ReportPeriod) -> Result<Vec<ReportRow>, DataError> {
    let key = match period {
        ReportPeriod::Annual => "annualReports",
        ReportPeriod::Quarterly => "quarterlyReports",
    };
    let reports = body
        .get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| DataError::InvalidResponse(format!("no '{key}' array")))?;

    let mut rows = Vec::with_capacity(reports.len());
    for report in reports {
        let obj = report
            .as_object()
            .ok_or_else(|| DataError::InvalidResponse("report row is not an object".into()))?;

        let fiscal = obj
            .get("fiscalDateEnding")
            .and_then(Value::as_str)
            .ok_or_else(|| DataError::InvalidResponse("report row lacks fiscalDateEnding".into()))?;

        let mut items = BTreeMap::new();
        for (k, v) in obj {
            if k == "fiscalDateEnding" || k == "reportedDate" {
                continue;
            }
            items.insert(k.clone(), value_to_string(v));
        }

        rows.push(ReportRow {
            fiscal_date_ending: parse_date(fiscal)?,
            reported_date: obj
                .get("reportedDate")
                .and_then(Value::as_str)
                .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()),
            items,
            reported_eps: None,
            estimated_eps: None,
            surprise: None,
            surprise_percentage: None,
        });
    }
    Ok(rows)
}

fn parse_earnings(body: &Value) -> Result<EarningsFeed, DataError> {
    Ok(EarningsFeed {
        annual: parse_earnings_rows(body, "annualEarnings")?,
        quarterly: parse_earnings_rows(body, "quarterlyEarnings")?,
    })
}

fn parse_earnings_rows(body: &Value, key: &str) -> Result<Vec<EarningsRow>, DataError> {
    let rows = body
        .get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| DataError::InvalidResponse(format!("no '{key}' array")))?;

    rows.iter()
        .map(|row| {
            let fiscal = row
                .get("fiscalDateEnding")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    DataError::InvalidResponse("earnings row lacks fiscalDateEnding".into())
                })?;
            Ok(EarningsRow {
                fiscal_date_ending: parse_date(fiscal)?,
                reported_date: row
                    .get("reportedDate")
                    .and_then(Value::as_str)
                    .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()),
                reported_eps: opt_f64(row.get("reportedEPS")),
                estimated_eps: opt_f64(row.get("estimatedEPS")),
                surprise: opt_f64(row.get("surprise")),
                surprise_percentage: opt_f64(row.get("surprisePercentage")),
            })
        })
        .collect()
}

fn parse_date(s: &str) -> Result<NaiveDate, DataError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| DataError::InvalidResponse(format!("bad date '{s}': {e}")))
}

fn field_f64(fields: &Value, key: &str, date: &str) -> Result<f64, DataError> {
    fields
        .get(key)
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| DataError::InvalidResponse(format!("bad '{key}' at {date}")))
}

/// The provider reports missing numerics as the literal string "None".
fn opt_f64(v: Option<&Value>) -> Option<f64> {
    v.and_then(Value::as_str).and_then(|s| s.parse::<f64>().ok())
}

fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
