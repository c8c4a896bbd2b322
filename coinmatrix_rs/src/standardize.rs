use anyhow::Result;

use crate::series::TimeSeries;

/// Suffix of the z-score column derived from a matrix column.
pub const STD_SUFFIX: &str = "_std";

pub fn std_column(column: &str) -> String {
    format!("{column}{STD_SUFFIX}")
}

/// Trailing z-score with the current observation excluded from its own
/// statistics.
///
/// Row `i` is scored against `values[i - window .. i]` using the population
/// standard deviation. The first `window` rows are missing, as is any row
/// whose window or current value holds a missing entry, or whose trailing
/// values are all equal.
pub fn rolling_standardize(values: &[f64], window: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if window == 0 {
        return out;
    }
    for i in window..values.len() {
        let current = values[i];
        let trailing = &values[i - window..i];
        if current.is_nan() || trailing.iter().any(|v| v.is_nan()) {
            continue;
        }
        let (mean, std) = mean_and_population_std(trailing);
        if std == 0.0 {
            continue;
        }
        out[i] = (current - mean) / std;
    }
    out
}

/// Add `<column>_std` holding the trailing z-score of `column` and return
/// the new column's name.
pub fn standardize(matrix: &mut TimeSeries, column: &str, window: usize) -> Result<String> {
    let scored = rolling_standardize(matrix.float_column(column)?, window);
    let name = std_column(column);
    matrix.insert_float(name.clone(), scored)?;
    Ok(name)
}

/// Whole-sample standardization. Missing entries are ignored by the
/// statistics and stay missing. A zero standard deviation leaves the
/// (centered) values unscaled.
pub fn global_standardize(values: &[f64], center: bool, scale: bool) -> Vec<f64> {
    let present: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if present.is_empty() {
        return values.to_vec();
    }
    let (mean, std) = mean_and_population_std(&present);
    let offset = if center { mean } else { 0.0 };
    let divisor = if scale && std != 0.0 { std } else { 1.0 };
    values.iter().map(|v| (v - offset) / divisor).collect()
}

fn mean_and_population_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}
