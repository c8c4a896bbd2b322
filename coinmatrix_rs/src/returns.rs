use anyhow::Result;
use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::align::inner_join;
use crate::asset::AssetRegistry;
use crate::calendar::{FillPolicy, clip_and_reindex};
use crate::config::{default_end_date, default_start_date};
use crate::data::AssetSource;
use crate::error::PipelineError;
use crate::loader::price_returns;
use crate::quality::{Diagnostics, check_dropped_rows};
use crate::series::{ColumnData, TimeSeries};
use crate::standardize::global_standardize;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReturnsMatrixOptions {
    /// Return horizon in days.
    pub periods: usize,
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Subtract each column's whole-sample mean.
    pub center: bool,
    /// Divide each column by its whole-sample population std.
    pub scale: bool,
    /// Rename registered crypto full names to their short codes.
    pub use_shortnames: bool,
}

impl Default for ReturnsMatrixOptions {
    fn default() -> Self {
        Self {
            periods: 1,
            start: default_start_date(),
            end: default_end_date(),
            center: true,
            scale: true,
            use_shortnames: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ReturnsMatrix {
    pub matrix: TimeSeries,
    pub diagnostics: Diagnostics,
}

/// Daily price-return matrix over `assets`, globally standardized.
///
/// Every asset is forward-filled onto the daily calendar regardless of its
/// class, so weekends repeat the last trading day's return.
pub fn build_returns_matrix(
    source: &dyn AssetSource,
    registry: &AssetRegistry,
    assets: &[String],
    options: &ReturnsMatrixOptions,
) -> Result<ReturnsMatrix> {
    if options.periods == 0 {
        return Err(PipelineError::configuration("periods must be a positive integer (got 0)").into());
    }
    if options.start > options.end {
        return Err(PipelineError::configuration(format!(
            "start {} is after end {}",
            options.start, options.end
        ))
        .into());
    }
    if assets.is_empty() {
        return Err(PipelineError::configuration("returns matrix needs at least one asset").into());
    }

    let per_asset: Vec<TimeSeries> = assets
        .par_iter()
        .map(|asset| {
            load_returns(source, asset, options)
                .map_err(|err| anyhow::Error::from(PipelineError::upstream(asset.as_str(), err)))
        })
        .collect::<Result<_>>()?;

    let refs: Vec<&TimeSeries> = per_asset.iter().collect();
    let mut matrix = inner_join(&refs)?;
    matrix.retain_range(options.start, options.end);
    let rows_before = matrix.len();
    let dropped = matrix.drop_missing_rows();
    let mut diagnostics = Diagnostics::new();
    check_dropped_rows(&mut diagnostics, "returns matrix", dropped);

    if options.center || options.scale {
        for asset in assets {
            let scaled = global_standardize(matrix.float_column(asset)?, options.center, options.scale);
            matrix.insert_float(asset.as_str(), scaled)?;
        }
    }

    if options.use_shortnames {
        for asset in assets {
            matrix.rename_column(asset, registry.short_name(asset))?;
        }
    }

    info!(
        assets = assets.len(),
        rows_before,
        rows = matrix.len(),
        dropped,
        center = options.center,
        scale = options.scale,
        "Built returns matrix"
    );
    Ok(ReturnsMatrix {
        matrix,
        diagnostics,
    })
}

fn load_returns(
    source: &dyn AssetSource,
    asset: &str,
    options: &ReturnsMatrixOptions,
) -> Result<TimeSeries> {
    let mut raw = source.load_asset_series(asset)?;
    raw.sort_by_date();
    raw.ensure_unique_dates()?;
    let returns = price_returns(asset, &raw, options.periods, FillPolicy::ForwardFill)?;
    clip_and_reindex(&returns, options.start, options.end, FillPolicy::ForwardFill)
}

impl ReturnsMatrix {
    /// Column means, mainly useful to check centering.
    pub fn column_means(&self) -> Vec<(String, f64)> {
        self.matrix
            .columns()
            .iter()
            .filter_map(|c| match &c.data {
                ColumnData::Float(values) if !values.is_empty() => {
                    Some((c.name.clone(), values.iter().sum::<f64>() / values.len() as f64))
                }
                _ => None,
            })
            .collect()
    }
}
