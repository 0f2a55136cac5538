//! Feature derivation: maps a clean ascending price series to the same
//! series extended with the contractual indicator columns.
//!
//! `derive_features` is pure and deterministic, and is recomputed over the
//! entire series on every cache update: rolling and EWM windows need full
//! historical context, and the EWM-based columns (EMA, MACD, RSI) are not
//! restartable from a truncated suffix without losing numerical continuity.
//!
//! Window sizes are contractual, not tunable defaults — changing one breaks
//! compatibility with previously stored feature blobs.

pub mod rolling;
pub mod rsi;

use crate::domain::{FeatureRow, PriceRow};
use rolling::{diff, ema, rolling_max, rolling_min, rolling_std, rolling_var, sma};

/// Derive all indicator columns from an ascending-by-date price series.
///
/// Rows before an indicator's window has filled hold `None` for that column.
/// The input must already be strictly ascending; the synchronizer guarantees
/// this for every stored series.
pub fn derive_features(prices: &[PriceRow]) -> Vec<FeatureRow> {
    let n = prices.len();
    let ac: Vec<f64> = prices.iter().map(|p| p.adjusted_close).collect();
    let high: Vec<f64> = prices.iter().map(|p| p.high).collect();
    let low: Vec<f64> = prices.iter().map(|p| p.low).collect();

    let mut log_return = vec![f64::NAN; n];
    for i in 1..n {
        log_return[i] = (ac[i] / ac[i - 1]).ln();
    }

    let volatility: Vec<f64> = rolling_std(&log_return, 252)
        .iter()
        .map(|v| v * (252.0_f64).sqrt())
        .collect();
    let volatility_change = diff(&volatility, 1);

    let log_volume: Vec<f64> = prices
        .iter()
        .map(|p| if p.volume > 0.0 { p.volume.ln() } else { f64::NAN })
        .collect();

    let daily_returns = diff(&ac, 1);
    let ma_5 = sma(&ac, 5);
    let ma_30 = sma(&ac, 30);
    let sma_10 = sma(&ac, 10);
    let rsi_14 = rsi::rsi(&ac, 14);
    let var_5 = rolling_var(&ac, 5);

    // Williams %R: position of the close inside the 14-sample high/low
    // envelope, scaled to [-100, 0].
    let hh_14 = rolling_max(&high, 14);
    let ll_14 = rolling_min(&low, 14);
    let mut williams_r = vec![f64::NAN; n];
    for i in 0..n {
        williams_r[i] = (hh_14[i] - ac[i]) / (hh_14[i] - ll_14[i]) * -100.0;
    }

    let std_10 = rolling_std(&ac, 10);
    let mut z_score = vec![f64::NAN; n];
    for i in 0..n {
        z_score[i] = (ac[i] - sma_10[i]) / std_10[i];
    }

    let ema_12 = ema(&ac, 12);

    // MACD: fast minus slow EMA, masked until the slow window has seen 26
    // samples (the recursion itself still starts at the first value).
    let ema_26 = ema(&ac, 26);
    let mut macd = vec![f64::NAN; n];
    for i in 25..n {
        macd[i] = ema_12[i] - ema_26[i];
    }

    let mut roc_1 = vec![f64::NAN; n];
    for i in 1..n {
        roc_1[i] = (ac[i] / ac[i - 1] - 1.0) * 100.0;
    }

    // Stochastic %K over a 15-sample high/low window, scaled x100.
    let hh_15 = rolling_max(&high, 15);
    let ll_15 = rolling_min(&low, 15);
    let mut k_15 = vec![f64::NAN; n];
    for i in 0..n {
        k_15[i] = (ac[i] - ll_15[i]) / (hh_15[i] - ll_15[i]) * 100.0;
    }

    let bollinger_mid = sma(&ac, 20);
    let std_20 = rolling_std(&ac, 20);
    let mut bollinger_upper = vec![f64::NAN; n];
    let mut bollinger_lower = vec![f64::NAN; n];
    for i in 0..n {
        bollinger_upper[i] = bollinger_mid[i] + 2.0 * std_20[i];
        bollinger_lower[i] = bollinger_mid[i] - 2.0 * std_20[i];
    }

    let mom_12 = diff(&ac, 12);

    (0..n)
        .map(|i| FeatureRow {
            price: prices[i].clone(),
            log_return: opt(log_return[i]),
            volatility: opt(volatility[i]),
            volatility_change: opt(volatility_change[i]),
            log_volume: opt(log_volume[i]),
            daily_returns: opt(daily_returns[i]),
            ma_5: opt(ma_5[i]),
            ma_30: opt(ma_30[i]),
            sma_10: opt(sma_10[i]),
            rsi_14: opt(rsi_14[i]),
            var_5: opt(var_5[i]),
            williams_r: opt(williams_r[i]),
            z_score: opt(z_score[i]),
            ema_12: opt(ema_12[i]),
            macd: opt(macd[i]),
            roc_1: opt(roc_1[i]),
            k_15: opt(k_15[i]),
            bollinger_mid: opt(bollinger_mid[i]),
            bollinger_upper: opt(bollinger_upper[i]),
            bollinger_lower: opt(bollinger_lower[i]),
            mom_12: opt(mom_12[i]),
        })
        .collect()
}

/// Non-finite intermediate values (unfilled windows, division by a zero
/// envelope, log of zero volume) become the null marker.
fn opt(v: f64) -> Option<f64> {
    if v.is_finite() {
        Some(v)
    } else {
        None
    }
}

/// Create synthetic ascending price rows from close values, for tests.
#[cfg(test)]
pub fn make_prices(closes: &[f64]) -> Vec<PriceRow> {
    let base_date = chrono::NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            PriceRow {
                date: base_date + chrono::Duration::days(i as i64),
                open,
                high: open.max(close) + 1.0,
                low: open.min(close) - 1.0,
                close,
                adjusted_close: close,
                volume: 1000.0 + i as f64,
                dividend: 0.0,
                split_coefficient: 1.0,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_closes(n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| 100.0 + 10.0 * (i as f64 * 0.1).sin() + i as f64 * 0.01)
            .collect()
    }

    fn assert_opt_approx(a: Option<f64>, b: Option<f64>, tol: f64, label: &str, idx: usize) {
        match (a, b) {
            (Some(x), Some(y)) => assert!(
                (x - y).abs() < tol,
                "{label} at index {idx}: {x} vs {y}"
            ),
            (None, None) => {}
            _ => panic!("{label} at index {idx}: {a:?} vs {b:?}"),
        }
    }

    #[test]
    fn derivation_is_deterministic() {
        let prices = make_prices(&synthetic_closes(60));
        let a = derive_features(&prices);
        let b = derive_features(&prices);
        assert_eq!(a, b);
    }

    #[test]
    fn warmup_rows_hold_none() {
        let prices = make_prices(&synthetic_closes(40));
        let rows = derive_features(&prices);

        assert!(rows[0].log_return.is_none());
        assert!(rows[1].log_return.is_some());
        assert!(rows[3].ma_5.is_none());
        assert!(rows[4].ma_5.is_some());
        assert!(rows[28].ma_30.is_none());
        assert!(rows[29].ma_30.is_some());
        assert!(rows[13].rsi_14.is_none());
        assert!(rows[14].rsi_14.is_some());
        assert!(rows[24].macd.is_none());
        assert!(rows[25].macd.is_some());
        assert!(rows[18].bollinger_mid.is_none());
        assert!(rows[19].bollinger_mid.is_some());
        assert!(rows[11].mom_12.is_none());
        assert!(rows[12].mom_12.is_some());
        assert!(rows[13].k_15.is_none());
        assert!(rows[14].k_15.is_some());
        // EMA12 is seeded at the first value — defined from index 0.
        assert!(rows[0].ema_12.is_some());
        // 252-sample volatility never fills in 40 rows.
        assert!(rows.iter().all(|r| r.volatility.is_none()));
    }

    #[test]
    fn simple_columns_match_hand_computation() {
        let closes = [10.0, 11.0, 12.0, 13.0, 14.0, 15.0];
        let prices = make_prices(&closes);
        let rows = derive_features(&prices);

        // ma_5 at index 4 = mean(10..14) = 12
        assert!((rows[4].ma_5.unwrap() - 12.0).abs() < 1e-10);
        // daily_returns at index 1 = 1.0
        assert!((rows[1].daily_returns.unwrap() - 1.0).abs() < 1e-10);
        // roc_1 at index 1 = 10%
        assert!((rows[1].roc_1.unwrap() - 10.0).abs() < 1e-10);
        // log_return at index 1 = ln(11/10)
        assert!((rows[1].log_return.unwrap() - (11.0f64 / 10.0).ln()).abs() < 1e-10);
        // log_volume at index 0 = ln(1000)
        assert!((rows[0].log_volume.unwrap() - 1000.0f64.ln()).abs() < 1e-10);
    }

    #[test]
    fn zero_volume_yields_null_log_volume() {
        let mut prices = make_prices(&[10.0, 11.0]);
        prices[1].volume = 0.0;
        let rows = derive_features(&prices);
        assert!(rows[0].log_volume.is_some());
        assert!(rows[1].log_volume.is_none());
    }

    #[test]
    fn bollinger_bands_bracket_the_mid() {
        let prices = make_prices(&synthetic_closes(30));
        let rows = derive_features(&prices);
        let row = &rows[25];
        let (mid, upper, lower) = (
            row.bollinger_mid.unwrap(),
            row.bollinger_upper.unwrap(),
            row.bollinger_lower.unwrap(),
        );
        assert!(upper > mid && mid > lower);
        assert!((upper - mid - (mid - lower)).abs() < 1e-10);
    }

    #[test]
    fn williams_r_stays_in_range() {
        let prices = make_prices(&synthetic_closes(50));
        let rows = derive_features(&prices);
        for row in &rows {
            if let Some(wr) = row.williams_r {
                assert!((-100.0..=0.0).contains(&wr), "Williams %R out of range: {wr}");
            }
        }
    }

    #[test]
    fn deep_values_survive_front_truncation() {
        // Dropping a few leading rows changes early warm-up values but not
        // values deep enough that every window (including the 252-sample
        // volatility) refilled and the EWM recursions re-converged.
        let closes = synthetic_closes(300);
        let full = derive_features(&make_prices(&closes));
        let truncated = derive_features(&make_prices(&closes[10..]));

        for i in 272..300 {
            let f = &full[i];
            let t = &truncated[i - 10];
            let tol = 1e-5;
            assert_opt_approx(f.volatility, t.volatility, tol, "volatility", i);
            assert_opt_approx(f.ma_30, t.ma_30, tol, "ma_30", i);
            assert_opt_approx(f.rsi_14, t.rsi_14, tol, "rsi_14", i);
            assert_opt_approx(f.ema_12, t.ema_12, tol, "ema_12", i);
            assert_opt_approx(f.macd, t.macd, tol, "macd", i);
            assert_opt_approx(f.z_score, t.z_score, tol, "z_score", i);
            assert_opt_approx(f.k_15, t.k_15, tol, "k_15", i);
            assert_opt_approx(f.mom_12, t.mom_12, tol, "mom_12", i);
        }
    }
}
