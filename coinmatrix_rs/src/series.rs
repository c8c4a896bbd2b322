use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;
use polars::prelude::*;

use crate::error::PipelineError;

/// Name of the date index column when a series is rendered as a DataFrame.
pub const DATE_COLUMN: &str = "date";

/// Raw series column holding closing prices (or levels for non-crypto assets).
pub const PRICE_COLUMN: &str = "price";

/// Raw series column holding traded volume (crypto only).
pub const VOLUME_COLUMN: &str = "volume";

#[derive(Clone, Debug, PartialEq)]
pub enum ColumnData {
    /// Numeric values; `NaN` marks a missing observation.
    Float(Vec<f64>),
    /// Indicator values; never missing.
    Boolean(Vec<bool>),
}

impl ColumnData {
    fn len(&self) -> usize {
        match self {
            ColumnData::Float(values) => values.len(),
            ColumnData::Boolean(values) => values.len(),
        }
    }

    fn take(&self, indices: &[usize]) -> ColumnData {
        match self {
            ColumnData::Float(values) => {
                ColumnData::Float(indices.iter().map(|&i| values[i]).collect())
            }
            ColumnData::Boolean(values) => {
                ColumnData::Boolean(indices.iter().map(|&i| values[i]).collect())
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

/// Date-indexed table with ordered, named columns.
///
/// Used both for a single asset's raw series (`price`, `volume`) and for the
/// combined multi-asset matrix. Dates are kept ascending and unique by every
/// constructor in this crate; [`TimeSeries::sort_by_date`] restores the
/// ordering for externally assembled tables.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TimeSeries {
    dates: Vec<NaiveDate>,
    columns: Vec<Column>,
}

impl TimeSeries {
    pub fn new(dates: Vec<NaiveDate>) -> Self {
        Self {
            dates,
            columns: Vec::new(),
        }
    }

    /// Build a table of float columns in the given order.
    pub fn from_float_columns<S: Into<String>>(
        dates: Vec<NaiveDate>,
        columns: Vec<(S, Vec<f64>)>,
    ) -> Result<Self> {
        let mut series = Self::new(dates);
        for (name, values) in columns {
            series.insert_float(name, values)?;
        }
        Ok(series)
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.dates.first().copied()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.dates.last().copied()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn float_column(&self, name: &str) -> Result<&[f64]> {
        let column = self
            .columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| PipelineError::MissingColumn(name.to_string()))?;
        match &column.data {
            ColumnData::Float(values) => Ok(values),
            ColumnData::Boolean(_) => Err(anyhow!("Column {name} must be float")),
        }
    }

    pub fn bool_column(&self, name: &str) -> Result<&[bool]> {
        let column = self
            .columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| PipelineError::MissingColumn(name.to_string()))?;
        match &column.data {
            ColumnData::Boolean(values) => Ok(values),
            ColumnData::Float(_) => Err(anyhow!("Column {name} should be boolean")),
        }
    }

    /// Insert a float column, replacing an existing one of the same name in
    /// place so column order is stable.
    pub fn insert_float(&mut self, name: impl Into<String>, values: Vec<f64>) -> Result<()> {
        self.insert(name.into(), ColumnData::Float(values))
    }

    pub fn insert_bool(&mut self, name: impl Into<String>, values: Vec<bool>) -> Result<()> {
        self.insert(name.into(), ColumnData::Boolean(values))
    }

    fn insert(&mut self, name: String, data: ColumnData) -> Result<()> {
        if data.len() != self.len() {
            return Err(anyhow!(
                "Column {name} has {} values but the index has {} dates",
                data.len(),
                self.len()
            ));
        }
        match self.position(&name) {
            Some(idx) => self.columns[idx].data = data,
            None => self.columns.push(Column { name, data }),
        }
        Ok(())
    }

    pub fn rename_column(&mut self, from: &str, to: &str) -> Result<()> {
        if from == to {
            return Ok(());
        }
        if self.has_column(to) {
            return Err(anyhow!("Cannot rename {from} to {to}: column already exists"));
        }
        let idx = self
            .position(from)
            .ok_or_else(|| PipelineError::MissingColumn(from.to_string()))?;
        self.columns[idx].name = to.to_string();
        Ok(())
    }

    pub fn remove_column(&mut self, name: &str) -> Option<Column> {
        self.position(name).map(|idx| self.columns.remove(idx))
    }

    /// Keep only the named columns, in the requested order.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<TimeSeries> {
        let mut columns = Vec::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            let column = self
                .columns
                .iter()
                .find(|c| c.name == name)
                .ok_or_else(|| PipelineError::MissingColumn(name.to_string()))?;
            columns.push(column.clone());
        }
        Ok(TimeSeries {
            dates: self.dates.clone(),
            columns,
        })
    }

    /// Sort rows ascending by date (stable for equal dates).
    pub fn sort_by_date(&mut self) {
        if self.dates.windows(2).all(|w| w[0] <= w[1]) {
            return;
        }
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.sort_by_key(|&i| self.dates[i]);
        *self = self.take_rows(&order);
    }

    pub fn ensure_unique_dates(&self) -> Result<()> {
        if let Some(pair) = self.dates.windows(2).find(|w| w[0] == w[1]) {
            return Err(anyhow!("Duplicate date {} in time series index", pair[0]));
        }
        Ok(())
    }

    pub(crate) fn take_rows(&self, indices: &[usize]) -> TimeSeries {
        TimeSeries {
            dates: indices.iter().map(|&i| self.dates[i]).collect(),
            columns: self
                .columns
                .iter()
                .map(|c| Column {
                    name: c.name.clone(),
                    data: c.data.take(indices),
                })
                .collect(),
        }
    }

    pub fn filter_rows(&self, keep: &[bool]) -> TimeSeries {
        let indices: Vec<usize> = keep
            .iter()
            .enumerate()
            .filter_map(|(i, flag)| flag.then_some(i))
            .collect();
        self.take_rows(&indices)
    }

    /// `true` for every row holding at least one missing float value.
    pub fn missing_row_mask(&self) -> Vec<bool> {
        let mut mask = vec![false; self.len()];
        for column in &self.columns {
            if let ColumnData::Float(values) = &column.data {
                for (flag, value) in mask.iter_mut().zip(values) {
                    *flag |= value.is_nan();
                }
            }
        }
        mask
    }

    pub fn missing_row_count(&self) -> usize {
        self.missing_row_mask().iter().filter(|m| **m).count()
    }

    /// Remove rows with any missing float value; returns how many went.
    pub fn drop_missing_rows(&mut self) -> usize {
        let keep: Vec<bool> = self.missing_row_mask().iter().map(|m| !m).collect();
        let before = self.len();
        *self = self.filter_rows(&keep);
        before - self.len()
    }

    /// Keep rows whose date falls in the inclusive `[start, end]` range.
    pub fn retain_range(&mut self, start: NaiveDate, end: NaiveDate) {
        let keep: Vec<bool> = self
            .dates
            .iter()
            .map(|d| *d >= start && *d <= end)
            .collect();
        *self = self.filter_rows(&keep);
    }

    /// Render the table with a leading ISO-formatted date column.
    pub fn to_data_frame(&self) -> Result<DataFrame> {
        let mut series = Vec::with_capacity(self.columns.len() + 1);
        let dates: Vec<String> = self
            .dates
            .iter()
            .map(|d| d.format("%Y-%m-%d").to_string())
            .collect();
        series.push(Series::new(DATE_COLUMN, dates));
        for column in &self.columns {
            let rendered = match &column.data {
                ColumnData::Float(values) => Series::new(&column.name, values.clone()),
                ColumnData::Boolean(values) => Series::new(&column.name, values.clone()),
            };
            series.push(rendered);
        }
        DataFrame::new(series).context("Failed to assemble DataFrame from time series")
    }
}

/// Propagate the last known value through missing entries. Leading missing
/// values stay missing.
pub fn forward_fill(values: &[f64]) -> Vec<f64> {
    let mut last = f64::NAN;
    values
        .iter()
        .map(|&v| {
            if !v.is_nan() {
                last = v;
            }
            last
        })
        .collect()
}

/// Percentage change over `periods` rows. The first `periods` entries, and
/// any entry whose current or base value is missing or whose base is zero,
/// are missing.
pub fn pct_change(values: &[f64], periods: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if periods == 0 {
        return out;
    }
    for i in periods..values.len() {
        let base = values[i - periods];
        let current = values[i];
        if base.is_nan() || current.is_nan() || base == 0.0 {
            continue;
        }
        out[i] = current / base - 1.0;
    }
    out
}

/// [`pct_change`] over the forward-filled input, so a gap carries a zero
/// change instead of a missing one.
pub fn padded_pct_change(values: &[f64], periods: usize) -> Vec<f64> {
    pct_change(&forward_fill(values), periods)
}
