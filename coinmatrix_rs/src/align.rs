use std::collections::{BTreeSet, HashMap, HashSet};

use anyhow::Result;
use chrono::NaiveDate;
use tracing::info;

use crate::error::PipelineError;
use crate::quality::{Diagnostics, check_dropped_rows};
use crate::series::{Column, ColumnData, TimeSeries};

/// The joined multi-asset table every later stage works on.
pub type CombinedMatrix = TimeSeries;

/// Inner-join series on their date index.
///
/// Only dates present in every input survive. Columns keep the input order
/// (all of the first series, then the second, ...). Column names must be
/// unique across inputs.
pub fn inner_join(series_list: &[&TimeSeries]) -> Result<TimeSeries> {
    let Some((first, rest)) = series_list.split_first() else {
        return Ok(TimeSeries::default());
    };

    let mut seen = HashSet::new();
    for series in series_list {
        for name in series.column_names() {
            if !seen.insert(name) {
                return Err(PipelineError::configuration(format!(
                    "column '{name}' appears in more than one joined series"
                ))
                .into());
            }
        }
    }

    let mut common: BTreeSet<NaiveDate> = first.dates().iter().copied().collect();
    for series in rest {
        let dates: HashSet<NaiveDate> = series.dates().iter().copied().collect();
        common.retain(|d| dates.contains(d));
    }
    let dates: Vec<NaiveDate> = common.into_iter().collect();

    let mut out = TimeSeries::new(dates.clone());
    for series in series_list {
        let position: HashMap<NaiveDate, usize> = series
            .dates()
            .iter()
            .enumerate()
            .map(|(i, d)| (*d, i))
            .collect();
        let rows: Vec<usize> = dates.iter().map(|d| position[d]).collect();
        for Column { name, data } in series.take_rows(&rows).columns() {
            match data {
                ColumnData::Float(values) => out.insert_float(name.clone(), values.clone())?,
                ColumnData::Boolean(values) => out.insert_bool(name.clone(), values.clone())?,
            }
        }
    }
    Ok(out)
}

/// Join per-asset return tables into the combined matrix and drop every
/// row that still holds a missing value.
pub fn join(series_list: &[&TimeSeries], diagnostics: &mut Diagnostics) -> Result<CombinedMatrix> {
    let mut combined = inner_join(series_list)?;
    let rows_before = combined.len();
    let dropped = combined.drop_missing_rows();
    check_dropped_rows(diagnostics, "join", dropped);
    info!(
        inputs = series_list.len(),
        rows_before,
        rows = combined.len(),
        dropped,
        "Joined asset series"
    );
    Ok(combined)
}
