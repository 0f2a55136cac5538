//! Rolling-window primitives over f64 slices.
//!
//! All functions return a vector the same length as the input with
//! `f64::NAN` where the window has not filled. A NaN inside a window makes
//! the output NaN for that position. Rolling std/var use sample (n-1)
//! normalization.

/// Simple moving average over `window` samples.
pub fn sma(values: &[f64], window: usize) -> Vec<f64> {
    assert!(window >= 1, "window must be >= 1");
    let n = values.len();
    let mut result = vec![f64::NAN; n];
    for i in (window - 1)..n {
        let slice = &values[(i + 1 - window)..=i];
        result[i] = slice.iter().sum::<f64>() / window as f64;
    }
    result
}

/// Rolling sample variance over `window` samples.
pub fn rolling_var(values: &[f64], window: usize) -> Vec<f64> {
    assert!(window >= 2, "variance needs a window of >= 2");
    let n = values.len();
    let mut result = vec![f64::NAN; n];
    for i in (window - 1)..n {
        let slice = &values[(i + 1 - window)..=i];
        let mean = slice.iter().sum::<f64>() / window as f64;
        let sq_dev: f64 = slice.iter().map(|v| (v - mean) * (v - mean)).sum();
        result[i] = sq_dev / (window - 1) as f64;
    }
    result
}

/// Rolling sample standard deviation over `window` samples.
pub fn rolling_std(values: &[f64], window: usize) -> Vec<f64> {
    let mut result = rolling_var(values, window);
    for v in &mut result {
        *v = v.sqrt();
    }
    result
}

/// Rolling minimum over `window` samples.
pub fn rolling_min(values: &[f64], window: usize) -> Vec<f64> {
    rolling_fold(values, window, f64::min)
}

/// Rolling maximum over `window` samples.
pub fn rolling_max(values: &[f64], window: usize) -> Vec<f64> {
    rolling_fold(values, window, f64::max)
}

fn rolling_fold(values: &[f64], window: usize, fold: fn(f64, f64) -> f64) -> Vec<f64> {
    assert!(window >= 1, "window must be >= 1");
    let n = values.len();
    let mut result = vec![f64::NAN; n];
    for i in (window - 1)..n {
        let slice = &values[(i + 1 - window)..=i];
        if slice.iter().any(|v| v.is_nan()) {
            continue;
        }
        let mut acc = slice[0];
        for &v in &slice[1..] {
            acc = fold(acc, v);
        }
        result[i] = acc;
    }
    result
}

/// Exponential moving average with `alpha = 2 / (span + 1)`, seeded at the
/// first value (no warm-up bias adjustment). Defined from index 0.
pub fn ema(values: &[f64], span: usize) -> Vec<f64> {
    assert!(span >= 1, "span must be >= 1");
    let n = values.len();
    let mut result = vec![f64::NAN; n];
    if n == 0 {
        return result;
    }

    let alpha = 2.0 / (span as f64 + 1.0);
    let mut prev = values[0];
    result[0] = prev;
    for i in 1..n {
        if values[i].is_nan() {
            // NaN taints everything downstream of the recursion.
            for v in result.iter_mut().skip(i) {
                *v = f64::NAN;
            }
            return result;
        }
        prev = alpha * values[i] + (1.0 - alpha) * prev;
        result[i] = prev;
    }
    result
}

/// Lagged difference: `values[t] - values[t - lag]`, NaN for `t < lag`.
pub fn diff(values: &[f64], lag: usize) -> Vec<f64> {
    assert!(lag >= 1, "lag must be >= 1");
    let n = values.len();
    let mut result = vec![f64::NAN; n];
    for i in lag..n {
        result[i] = values[i] - values[i - lag];
    }
    result
}
