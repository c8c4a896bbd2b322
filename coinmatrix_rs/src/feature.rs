use anyhow::Result;

use crate::error::PipelineError;
use crate::series::TimeSeries;
use crate::standardize::std_column;

/// Boolean feature: the target's standardized return is below every
/// predictor's on that day.
pub const LAGGED_OTHERS: &str = "lagged_others";

/// Ordered, duplicate-free list of model input columns.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FeatureSet {
    names: Vec<String>,
}

impl FeatureSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a name; returns `false` if it was already present.
    pub fn push(&mut self, name: impl Into<String>) -> bool {
        let name = name.into();
        if self.contains(&name) {
            return false;
        }
        self.names.push(name);
        true
    }

    pub fn extend<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            self.push(name);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Row-wise `target_std < min(predictor_std)`.
///
/// Missing predictor values are skipped by the minimum. A missing target, or
/// a row where every predictor is missing, is `false`.
pub fn relative_lag_indicator<S: AsRef<str>>(
    matrix: &TimeSeries,
    target: &str,
    predictors: &[S],
) -> Result<Vec<bool>> {
    if predictors.is_empty() {
        return Err(PipelineError::configuration(
            "relative lag indicator needs at least one predictor crypto",
        )
        .into());
    }
    let target_values = standardized(matrix, target)?;

    let mut row_min = vec![f64::NAN; matrix.len()];
    for predictor in predictors {
        let values = standardized(matrix, predictor.as_ref())?;
        for (acc, &v) in row_min.iter_mut().zip(values) {
            // f64::min returns the non-NaN operand.
            *acc = acc.min(v);
        }
    }

    Ok(target_values
        .iter()
        .zip(&row_min)
        .map(|(&t, &m)| !t.is_nan() && !m.is_nan() && t < m)
        .collect())
}

fn standardized<'a>(matrix: &'a TimeSeries, asset_id: &str) -> Result<&'a [f64]> {
    let column = std_column(asset_id);
    if !matrix.has_column(&column) {
        return Err(PipelineError::Sequencing {
            step: "relative_lag_indicator",
            prerequisite: "standardize",
        }
        .into());
    }
    matrix.float_column(&column)
}
