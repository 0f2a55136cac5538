//! Command-line front end for the market-data cache.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use marketcache_core::calendar::UsEquityCalendar;
use marketcache_core::clock::{Clock, SystemClock};
use marketcache_core::config::Config;
use marketcache_core::data::reports::parse_report_kind;
use marketcache_core::data::{AlphaVantageSource, ReportSynchronizer, SeriesStore, SeriesSynchronizer};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "marketcache", version, about = "Incremental market-data cache")]
struct Cli {
    /// Config file (TOML); falls back to MARKETCACHE_* environment variables.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Cache directory, overriding the configured one.
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Synchronize and print a daily price/feature series.
    Sync {
        ticker: String,
        /// Start of the window (YYYY-MM-DD).
        #[arg(long, conflicts_with = "years")]
        begin: Option<NaiveDate>,
        /// End of the window (YYYY-MM-DD); defaults to today.
        #[arg(long)]
        end: Option<NaiveDate>,
        /// Trailing window in calendar years instead of explicit dates.
        #[arg(long, default_value_t = 5)]
        years: u32,
        /// Print every row instead of a summary.
        #[arg(long)]
        full: bool,
    },
    /// Synchronize and print a fundamental report series.
    Report {
        ticker: String,
        /// income, balance, or cashflow.
        #[arg(long)]
        statement: String,
        /// annual or quarterly.
        #[arg(long, default_value = "quarterly")]
        period: String,
        #[arg(long)]
        begin: Option<NaiveDate>,
        #[arg(long)]
        end: Option<NaiveDate>,
    },
    /// Inspect the local cache.
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },
}

#[derive(Subcommand)]
enum CacheCommand {
    /// List cached series with their date ranges and row counts.
    Status {
        /// Restrict to one ticker.
        ticker: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(dir) = cli.cache_dir {
        config.cache_dir = dir;
    }

    match cli.command {
        Command::Sync {
            ticker,
            begin,
            end,
            years,
            full,
        } => sync(&config, &ticker, begin, end, years, full),
        Command::Report {
            ticker,
            statement,
            period,
            begin,
            end,
        } => report(&config, &ticker, &statement, &period, begin, end),
        Command::Cache {
            command: CacheCommand::Status { ticker },
        } => status(&config, ticker.as_deref()),
    }
}

fn synchronizer(config: &Config) -> SeriesSynchronizer {
    SeriesSynchronizer::new(
        SeriesStore::new(&config.cache_dir),
        Arc::new(AlphaVantageSource::new(&config.api_key, &config.base_url)),
        Arc::new(UsEquityCalendar),
        Arc::new(SystemClock),
    )
}

fn sync(
    config: &Config,
    ticker: &str,
    begin: Option<NaiveDate>,
    end: Option<NaiveDate>,
    years: u32,
    full: bool,
) -> Result<()> {
    let sync = synchronizer(config);
    let today = SystemClock.now().date();
    let window_end = end.unwrap_or(today);
    let window_begin =
        begin.unwrap_or(window_end - chrono::Duration::days(365 * years as i64));
    if window_begin > window_end {
        bail!("--begin {window_begin} is after --end {window_end}");
    }

    let rows = if begin.is_none() && end.is_none() {
        sync.load_recent(ticker, years)
    } else {
        sync.load(ticker, window_begin, window_end)
    }
    .with_context(|| format!("synchronizing {ticker}"))?;
    if rows.is_empty() {
        println!("{ticker}: no rows in {window_begin}..{window_end}");
        return Ok(());
    }

    println!(
        "{ticker}: {} rows, {} .. {}",
        rows.len(),
        rows.last().map(|r| r.price.date).unwrap_or(window_begin),
        rows[0].price.date,
    );
    let shown: Box<dyn Iterator<Item = _>> = if full {
        Box::new(rows.iter())
    } else {
        Box::new(rows.iter().take(10))
    };
    println!(
        "{:<12} {:>10} {:>10} {:>12} {:>8} {:>8}",
        "date", "close", "adj close", "volume", "rsi_14", "macd"
    );
    for row in shown {
        println!(
            "{:<12} {:>10.2} {:>10.2} {:>12.0} {:>8} {:>8}",
            row.price.date,
            row.price.close,
            row.price.adjusted_close,
            row.price.volume,
            fmt_opt(row.rsi_14, 2),
            fmt_opt(row.macd, 3),
        );
    }
    if !full && rows.len() > 10 {
        println!("... {} more (use --full)", rows.len() - 10);
    }
    Ok(())
}

fn report(
    config: &Config,
    ticker: &str,
    statement: &str,
    period: &str,
    begin: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<()> {
    let (report, period) = parse_report_kind(statement, period)?;
    let sync = ReportSynchronizer::new(
        SeriesStore::new(&config.cache_dir),
        Arc::new(AlphaVantageSource::new(&config.api_key, &config.base_url)),
        Arc::new(SystemClock),
    );
    let end = end.unwrap_or_else(|| SystemClock.now().date());
    let begin = begin.unwrap_or(end - chrono::Duration::days(10 * 365));
    if begin > end {
        bail!("--begin {begin} is after --end {end}");
    }

    let rows = sync
        .load(ticker, report, period, begin, end)
        .with_context(|| format!("synchronizing {ticker} {statement}"))?;
    if rows.is_empty() {
        println!("{ticker}: no report rows in {begin}..{end}");
        return Ok(());
    }

    println!(
        "{ticker} {} {}: {} periods",
        period.as_str(),
        report.as_str(),
        rows.len()
    );
    for row in &rows {
        println!(
            "{}  reported {}  eps {}  estimate {}  {} line items",
            row.fiscal_date_ending,
            row.reported_date.map_or("-".to_string(), |d| d.to_string()),
            fmt_opt(row.reported_eps, 2),
            fmt_opt(row.estimated_eps, 2),
            row.items.len(),
        );
    }
    Ok(())
}

fn status(config: &Config, ticker: Option<&str>) -> Result<()> {
    let store = SeriesStore::new(&config.cache_dir);
    let mut metas = store.statuses();
    if let Some(ticker) = ticker {
        metas.retain(|m| m.ticker == ticker);
    }
    if metas.is_empty() {
        println!("cache at {} is empty", config.cache_dir.display());
        return Ok(());
    }
    println!(
        "{:<8} {:<32} {:>7} {:<12} {:<12}",
        "ticker", "series", "rows", "from", "to"
    );
    for meta in metas {
        println!(
            "{:<8} {:<32} {:>7} {:<12} {:<12}",
            meta.ticker, meta.kind, meta.row_count, meta.start_date, meta.end_date
        );
    }
    Ok(())
}

fn fmt_opt(v: Option<f64>, decimals: usize) -> String {
    match v {
        Some(x) => format!("{x:.decimals$}"),
        None => "-".to_string(),
    }
}
