use std::collections::HashMap;

use anyhow::Result;
use chrono::{Days, NaiveDate};

use crate::series::{Column, ColumnData, TimeSeries, forward_fill};

/// How dates missing from the source are filled after reindexing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FillPolicy {
    /// Keep gaps missing (crypto trades daily, so gaps are anomalies).
    LeaveMissing,
    /// Carry the last observation forward (weekends and holidays).
    ForwardFill,
}

/// Every calendar day in the inclusive `[start, end]` range.
pub fn daily_range(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    if start > end {
        return Vec::new();
    }
    let mut out = Vec::with_capacity((end - start).num_days() as usize + 1);
    let mut current = start;
    while current <= end {
        out.push(current);
        match current.checked_add_days(Days::new(1)) {
            Some(next) => current = next,
            None => break,
        }
    }
    out
}

/// Clip a series to `[max(start, first), min(end, last)]` and reindex it
/// onto a continuous daily calendar, filling absent days per `policy`.
///
/// The series must be sorted and unique by date. An empty series, or one
/// whose range does not overlap the bounds, yields an empty table with the
/// same columns.
pub fn clip_and_reindex(
    series: &TimeSeries,
    start: NaiveDate,
    end: NaiveDate,
    policy: FillPolicy,
) -> Result<TimeSeries> {
    let (Some(first), Some(last)) = (series.first_date(), series.last_date()) else {
        return series.select(&series.column_names());
    };
    let calendar = daily_range(start.max(first), end.min(last));

    let position: HashMap<NaiveDate, usize> = series
        .dates()
        .iter()
        .enumerate()
        .map(|(i, d)| (*d, i))
        .collect();

    let mut out = TimeSeries::new(calendar.clone());
    for Column { name, data } in series.columns() {
        match data {
            ColumnData::Float(values) => {
                let reindexed: Vec<f64> = calendar
                    .iter()
                    .map(|d| position.get(d).map_or(f64::NAN, |&i| values[i]))
                    .collect();
                let filled = match policy {
                    FillPolicy::LeaveMissing => reindexed,
                    FillPolicy::ForwardFill => forward_fill(&reindexed),
                };
                out.insert_float(name.clone(), filled)?;
            }
            ColumnData::Boolean(values) => {
                // Indicators have no missing state; absent days are false.
                let reindexed: Vec<bool> = calendar
                    .iter()
                    .map(|d| position.get(d).is_some_and(|&i| values[i]))
                    .collect();
                out.insert_bool(name.clone(), reindexed)?;
            }
        }
    }
    Ok(out)
}
