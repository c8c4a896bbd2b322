use anyhow::Result;
use chrono::NaiveDate;
use tracing::debug;

use crate::asset::{AssetClass, AssetRegistry};
use crate::calendar::{FillPolicy, clip_and_reindex};
use crate::data::AssetSource;
use crate::error::PipelineError;
use crate::quality::{DataQualityWarning, Diagnostics, MISSING_ROW_SAMPLE, SampleRow};
use crate::series::{ColumnData, PRICE_COLUMN, TimeSeries, VOLUME_COLUMN, padded_pct_change, pct_change};

/// Column holding an asset's return in the combined matrix.
pub fn price_column(asset_id: &str) -> String {
    asset_id.to_string()
}

/// Column holding a crypto asset's volume change in the combined matrix.
pub fn volume_column(asset_id: &str) -> String {
    format!("{asset_id}_volume")
}

#[derive(Clone, Copy, Debug)]
pub struct LoaderSettings {
    pub window_price: usize,
    pub window_volume: usize,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// One asset's returns, reindexed to the daily calendar and renamed into
/// the combined-matrix namespace.
#[derive(Clone, Debug)]
pub struct LoadedSeries {
    pub asset_id: String,
    pub class: AssetClass,
    pub series: TimeSeries,
    pub diagnostics: Diagnostics,
}

pub struct TimeSeriesLoader<'a> {
    source: &'a dyn AssetSource,
    registry: &'a AssetRegistry,
}

impl<'a> TimeSeriesLoader<'a> {
    pub fn new(source: &'a dyn AssetSource, registry: &'a AssetRegistry) -> Self {
        Self { source, registry }
    }

    /// Load an asset and turn it into rolling returns.
    ///
    /// Any failure, including malformed source data, is raised as
    /// [`PipelineError::UpstreamLoad`] for that asset.
    pub fn load(&self, asset_id: &str, settings: &LoaderSettings) -> Result<LoadedSeries> {
        let class = self.registry.classify(asset_id);
        self.load_inner(asset_id, class, settings)
            .map_err(|err| PipelineError::upstream(asset_id, err).into())
    }

    fn load_inner(
        &self,
        asset_id: &str,
        class: AssetClass,
        settings: &LoaderSettings,
    ) -> Result<LoadedSeries> {
        let mut raw = self.source.load_asset_series(asset_id)?;
        raw.sort_by_date();
        raw.ensure_unique_dates()?;

        let mut diagnostics = Diagnostics::new();
        let series = match class {
            AssetClass::Crypto => {
                let returns = crypto_returns(asset_id, &raw, settings)?;
                let reindexed = clip_and_reindex(
                    &returns,
                    settings.start,
                    settings.end,
                    FillPolicy::LeaveMissing,
                )?;
                audit_missing_rows(asset_id, &reindexed, settings.window_price, &mut diagnostics);
                reindexed
            }
            AssetClass::Other => {
                let returns = price_returns(
                    asset_id,
                    &raw,
                    settings.window_price,
                    FillPolicy::ForwardFill,
                )?;
                clip_and_reindex(&returns, settings.start, settings.end, FillPolicy::ForwardFill)?
            }
        };

        debug!(
            asset = %asset_id,
            class = ?class,
            rows = series.len(),
            first = ?series.first_date(),
            last = ?series.last_date(),
            "Loaded asset returns"
        );

        Ok(LoadedSeries {
            asset_id: asset_id.to_string(),
            class,
            series,
            diagnostics,
        })
    }
}

/// Price return column only, named after the asset. With
/// [`FillPolicy::ForwardFill`] a missing price repeats the previous one, so
/// the gap carries a zero return; otherwise it leaves the return missing.
pub(crate) fn price_returns(
    asset_id: &str,
    raw: &TimeSeries,
    window_price: usize,
    policy: FillPolicy,
) -> Result<TimeSeries> {
    let price = raw.float_column(PRICE_COLUMN)?;
    let returns = match policy {
        FillPolicy::LeaveMissing => pct_change(price, window_price),
        FillPolicy::ForwardFill => padded_pct_change(price, window_price),
    };
    TimeSeries::from_float_columns(raw.dates().to_vec(), vec![(price_column(asset_id), returns)])
}

fn crypto_returns(asset_id: &str, raw: &TimeSeries, settings: &LoaderSettings) -> Result<TimeSeries> {
    let mut out = price_returns(asset_id, raw, settings.window_price, FillPolicy::LeaveMissing)?;
    let volume = raw.float_column(VOLUME_COLUMN)?;
    // An undefined volume change (warm-up, or a day after zero volume) is a
    // zero change, not a gap.
    let volume_change: Vec<f64> = pct_change(volume, settings.window_volume)
        .into_iter()
        .map(|v| if v.is_nan() { 0.0 } else { v })
        .collect();
    out.insert_float(volume_column(asset_id), volume_change)?;
    Ok(out)
}

fn audit_missing_rows(
    asset_id: &str,
    series: &TimeSeries,
    warmup_allowance: usize,
    diagnostics: &mut Diagnostics,
) {
    let mask = series.missing_row_mask();
    let missing = mask.iter().filter(|m| **m).count();
    let excess = missing.saturating_sub(warmup_allowance);
    if excess == 0 {
        return;
    }
    let sample = mask
        .iter()
        .enumerate()
        .filter_map(|(row, m)| m.then(|| sample_row(series, row)))
        .take(MISSING_ROW_SAMPLE)
        .collect();
    diagnostics.report(DataQualityWarning::ExcessMissingRows {
        asset: asset_id.to_string(),
        count: excess,
        sample,
    });
}

fn sample_row(series: &TimeSeries, row: usize) -> SampleRow {
    let values = series
        .columns()
        .iter()
        .filter_map(|column| match &column.data {
            ColumnData::Float(values) => Some((column.name.clone(), values[row])),
            ColumnData::Boolean(_) => None,
        })
        .collect();
    SampleRow {
        date: series.dates()[row],
        values,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MemorySource;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2018, 1, d).unwrap()
    }

    fn settings() -> LoaderSettings {
        LoaderSettings {
            window_price: 1,
            window_volume: 1,
            start: day(1),
            end: day(31),
        }
    }

    #[test]
    fn crypto_volume_warmup_and_zero_base_become_zero() -> Result<()> {
        let raw = TimeSeries::from_float_columns(
            vec![day(1), day(2), day(3), day(4)],
            vec![
                (PRICE_COLUMN, vec![10.0, 11.0, 12.1, 12.1]),
                (VOLUME_COLUMN, vec![0.0, 0.0, 50.0, 100.0]),
            ],
        )?;
        let source = MemorySource::new().with_series("btc", raw);
        let registry = AssetRegistry::default();
        let loaded = TimeSeriesLoader::new(&source, &registry).load("btc", &settings())?;

        assert_eq!(loaded.class, AssetClass::Crypto);
        assert_eq!(loaded.series.column_names(), vec!["btc", "btc_volume"]);
        let volume = loaded.series.float_column("btc_volume")?;
        assert_eq!(volume, &[0.0, 0.0, 0.0, 1.0]);
        let price = loaded.series.float_column("btc")?;
        assert!(price[0].is_nan());
        assert!((price[2] - 0.1).abs() < 1e-12);
        // Only the return warm-up row is missing, so nothing is reported.
        assert!(loaded.diagnostics.is_empty());
        Ok(())
    }

    #[test]
    fn crypto_gaps_stay_missing_and_are_reported() -> Result<()> {
        let raw = TimeSeries::from_float_columns(
            vec![day(1), day(2), day(5), day(6)],
            vec![
                (PRICE_COLUMN, vec![10.0, 11.0, 12.0, 13.0]),
                (VOLUME_COLUMN, vec![1.0, 2.0, 3.0, 4.0]),
            ],
        )?;
        let source = MemorySource::new().with_series("eth", raw);
        let registry = AssetRegistry::default();
        let loaded = TimeSeriesLoader::new(&source, &registry).load("eth", &settings())?;

        assert_eq!(loaded.series.len(), 6);
        let price = loaded.series.float_column("eth")?;
        assert!(price[2].is_nan() && price[3].is_nan());
        let [DataQualityWarning::ExcessMissingRows { asset, count, sample }] =
            loaded.diagnostics.warnings()
        else {
            panic!("expected one missing-row warning, got {:?}", loaded.diagnostics);
        };
        assert_eq!(asset, "eth");
        assert_eq!(*count, 2);
        let dates: Vec<NaiveDate> = sample.iter().map(|r| r.date).collect();
        assert_eq!(dates, vec![day(1), day(3), day(4)]);
        // Reindexed gap days carry every column as missing.
        let names: Vec<&str> = sample[1].values.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["eth", "eth_volume"]);
        assert!(sample[1].values.iter().all(|(_, v)| v.is_nan()));
        Ok(())
    }

    #[test]
    fn missing_crypto_close_gives_a_missing_return() -> Result<()> {
        let raw = TimeSeries::from_float_columns(
            vec![day(1), day(2), day(3), day(4)],
            vec![
                (PRICE_COLUMN, vec![10.0, f64::NAN, 11.0, 12.0]),
                (VOLUME_COLUMN, vec![1.0, 2.0, 3.0, 4.0]),
            ],
        )?;
        let source = MemorySource::new().with_series("btc", raw);
        let registry = AssetRegistry::default();
        let loaded = TimeSeriesLoader::new(&source, &registry).load("btc", &settings())?;

        let price = loaded.series.float_column("btc")?;
        assert!(price[1].is_nan(), "a missing close must not become a zero return");
        assert!(price[2].is_nan());
        assert!((price[3] - 1.0 / 11.0).abs() < 1e-12);
        assert_eq!(loaded.diagnostics.len(), 1);
        let [DataQualityWarning::ExcessMissingRows { count, sample, .. }] =
            loaded.diagnostics.warnings()
        else {
            panic!("expected a missing-row warning");
        };
        assert_eq!(*count, 2);
        assert_eq!(sample.len(), 3);
        assert_eq!(sample[1].date, day(2));
        Ok(())
    }

    #[test]
    fn non_crypto_weekends_are_forward_filled() -> Result<()> {
        let raw = TimeSeries::from_float_columns(
            vec![day(5), day(4), day(8)],
            vec![(PRICE_COLUMN, vec![110.0, 100.0, 121.0])],
        )?;
        let source = MemorySource::new().with_series("SP500", raw);
        let registry = AssetRegistry::default();
        let loaded = TimeSeriesLoader::new(&source, &registry).load("SP500", &settings())?;

        assert_eq!(loaded.class, AssetClass::Other);
        assert_eq!(loaded.series.dates(), &[day(4), day(5), day(6), day(7), day(8)]);
        let price = loaded.series.float_column("SP500")?;
        assert!(price[0].is_nan());
        assert!((price[1] - 0.1).abs() < 1e-12);
        assert!((price[2] - 0.1).abs() < 1e-12);
        assert!((price[3] - 0.1).abs() < 1e-12);
        assert!((price[4] - 0.1).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn missing_asset_is_an_upstream_failure() {
        let source = MemorySource::new();
        let registry = AssetRegistry::default();
        let err = TimeSeriesLoader::new(&source, &registry)
            .load("ltc", &settings())
            .unwrap_err();
        let typed = err.downcast_ref::<PipelineError>().expect("typed error");
        assert!(typed.is_upstream_load());
    }

    #[test]
    fn crypto_without_volume_is_an_upstream_failure() -> Result<()> {
        let raw = TimeSeries::from_float_columns(vec![day(1)], vec![(PRICE_COLUMN, vec![1.0])])?;
        let source = MemorySource::new().with_series("xrp", raw);
        let registry = AssetRegistry::default();
        let err = TimeSeriesLoader::new(&source, &registry)
            .load("xrp", &settings())
            .unwrap_err();
        assert!(err.downcast_ref::<PipelineError>().is_some_and(|e| e.is_upstream_load()));
        Ok(())
    }
}
