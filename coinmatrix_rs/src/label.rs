use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::PipelineError;
use crate::series::TimeSeries;

/// Name of the label column in rendered output.
pub const LABEL_COLUMN: &str = "Y";

pub const DEFAULT_CATEGORY_THRESHOLD: f64 = 0.01;

/// Which target column the label is shifted from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelSource {
    /// The raw next-period return `<target>`.
    #[default]
    Raw,
    /// The next-period z-score `<target>_std`.
    Standardized,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LabelSpec {
    pub source: LabelSource,
    /// Recode the label into `{-1, 0, +1}`.
    pub categorical: bool,
    pub threshold: f64,
}

impl LabelSpec {
    /// The neutral band must be a finite, non-negative half-width.
    pub fn validate(&self) -> Result<()> {
        if !self.threshold.is_finite() || self.threshold < 0.0 {
            return Err(PipelineError::configuration(format!(
                "label category threshold must be finite and non-negative (got {})",
                self.threshold
            ))
            .into());
        }
        Ok(())
    }
}

impl Default for LabelSpec {
    fn default() -> Self {
        Self {
            source: LabelSource::Raw,
            categorical: false,
            threshold: DEFAULT_CATEGORY_THRESHOLD,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Label {
    Continuous(Vec<f64>),
    Categorical(Vec<i8>),
}

impl Label {
    pub fn len(&self) -> usize {
        match self {
            Label::Continuous(values) => values.len(),
            Label::Categorical(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_categorical(&self) -> bool {
        matches!(self, Label::Categorical(_))
    }

    /// Label values as floats, whichever encoding is held.
    pub fn to_f64(&self) -> Vec<f64> {
        match self {
            Label::Continuous(values) => values.clone(),
            Label::Categorical(values) => values.iter().map(|&v| f64::from(v)).collect(),
        }
    }
}

/// `+1` above `threshold`, `-1` below `-threshold`, `0` otherwise
/// (boundaries included).
pub fn categorize(value: f64, threshold: f64) -> i8 {
    if value > threshold {
        1
    } else if value < -threshold {
        -1
    } else {
        0
    }
}

/// `out[i] = values[i + 1]`; the final entry is missing.
pub fn shift_forward(values: &[f64]) -> Vec<f64> {
    let mut out: Vec<f64> = values.iter().skip(1).copied().collect();
    if !values.is_empty() {
        out.push(f64::NAN);
    }
    out
}

/// Matrix rows that survived labeling, with the row-aligned label.
#[derive(Clone, Debug)]
pub struct LabeledMatrix {
    pub matrix: TimeSeries,
    pub label: Label,
}

/// Shift `source_column` forward one period into the label and drop the
/// final row plus every row holding a missing float (label included).
pub fn build_label(
    matrix: &TimeSeries,
    source_column: &str,
    categorical: bool,
    threshold: f64,
) -> Result<LabeledMatrix> {
    let shifted = shift_forward(matrix.float_column(source_column)?);
    let keep: Vec<bool> = matrix
        .missing_row_mask()
        .iter()
        .zip(&shifted)
        .map(|(missing, y)| !missing && !y.is_nan())
        .collect();

    let kept = matrix.filter_rows(&keep);
    let y: Vec<f64> = shifted
        .iter()
        .zip(&keep)
        .filter_map(|(y, k)| k.then_some(*y))
        .collect();

    let dropped = matrix.len() - kept.len();
    debug!(
        source = %source_column,
        categorical,
        rows = kept.len(),
        dropped,
        "Built label"
    );

    let label = if categorical {
        Label::Categorical(y.iter().map(|&v| categorize(v, threshold)).collect())
    } else {
        Label::Continuous(y)
    };
    Ok(LabeledMatrix {
        matrix: kept,
        label,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2018, 5, d).unwrap()
    }

    #[test]
    fn categorize_boundaries_are_neutral() {
        assert_eq!(categorize(0.01, 0.01), 0);
        assert_eq!(categorize(-0.01, 0.01), 0);
        assert_eq!(categorize(0.0100001, 0.01), 1);
        assert_eq!(categorize(-0.02, 0.01), -1);
    }

    #[test]
    fn label_is_next_period_value() -> Result<()> {
        let matrix = TimeSeries::from_float_columns(
            vec![day(1), day(2), day(3), day(4)],
            vec![("btc", vec![0.1, 0.2, -0.3, 0.4])],
        )?;
        let labeled = build_label(&matrix, "btc", false, 0.01)?;
        assert_eq!(labeled.matrix.dates(), &[day(1), day(2), day(3)]);
        assert_eq!(labeled.label, Label::Continuous(vec![0.2, -0.3, 0.4]));
        Ok(())
    }

    #[test]
    fn rows_with_missing_values_or_label_are_dropped() -> Result<()> {
        let matrix = TimeSeries::from_float_columns(
            vec![day(1), day(2), day(3), day(4), day(5)],
            vec![
                ("btc", vec![0.1, 0.2, f64::NAN, 0.4, 0.5]),
                ("btc_std", vec![f64::NAN, 1.0, 1.0, 1.0, 1.0]),
            ],
        )?;
        let labeled = build_label(&matrix, "btc", true, 0.3)?;
        // Day 1 has a missing z-score, day 2 a missing label, day 3 a missing
        // return and day 5 has no next period.
        assert_eq!(labeled.matrix.dates(), &[day(4)]);
        assert_eq!(labeled.label, Label::Categorical(vec![1]));
        Ok(())
    }

    #[test]
    fn negative_or_nan_threshold_is_rejected() {
        for threshold in [-0.01, f64::NAN, f64::INFINITY] {
            let spec = LabelSpec {
                categorical: true,
                threshold,
                ..LabelSpec::default()
            };
            let err = spec.validate().unwrap_err();
            assert!(
                err.downcast_ref::<PipelineError>().is_some_and(|e| e.is_configuration()),
                "threshold {threshold} should be a configuration error"
            );
        }
        let zero = LabelSpec {
            threshold: 0.0,
            ..LabelSpec::default()
        };
        assert!(zero.validate().is_ok());
        assert!(LabelSpec::default().validate().is_ok());
    }

    #[test]
    fn shift_forward_handles_empty_input() {
        assert!(shift_forward(&[]).is_empty());
    }
}
