use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, NaiveDate};
use polars::prelude::*;
use tracing::info;

use crate::asset::AssetRegistry;
use crate::series::{DATE_COLUMN, PRICE_COLUMN, TimeSeries, VOLUME_COLUMN};

/// Persisted per-asset series, the input of every pipeline run.
///
/// Implementations return a table with a `price` column and, for crypto
/// assets, a `volume` column. Values must already be numeric; placeholder
/// strings are a concern of whatever populated the store.
pub trait AssetSource: Sync {
    fn load_asset_series(&self, asset_id: &str) -> Result<TimeSeries>;
}

/// Live source used only to populate an [`AssetSource`] store.
pub trait RemoteSource {
    fn fetch_remote_series(
        &self,
        asset_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<TimeSeries>;
}

/// Directory of `<asset_id>.csv` files.
///
/// Each file has a `date` column (`YYYY-MM-DD` or RFC3339) and a price
/// column named `close`, `price`, or after the asset itself. A `volume`
/// column is read when present.
#[derive(Clone, Debug)]
pub struct CsvAssetStore {
    root: PathBuf,
}

impl CsvAssetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, asset_id: &str) -> PathBuf {
        self.root.join(format!("{asset_id}.csv"))
    }

    /// Write a series in the store layout: `date,close[,volume]`.
    pub fn save_asset_series(&self, asset_id: &str, series: &TimeSeries) -> Result<PathBuf> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("Unable to create {}", self.root.display()))?;
        let mut table = series.select(&[PRICE_COLUMN])?;
        table.rename_column(PRICE_COLUMN, "close")?;
        if series.has_column(VOLUME_COLUMN) {
            table.insert_float(VOLUME_COLUMN, series.float_column(VOLUME_COLUMN)?.to_vec())?;
        }
        let path = self.path_for(asset_id);
        write_csv(&path, &mut table.to_data_frame()?)?;
        Ok(path)
    }
}

impl AssetSource for CsvAssetStore {
    fn load_asset_series(&self, asset_id: &str) -> Result<TimeSeries> {
        let path = self.path_for(asset_id);
        let frame = read_csv(&path)?;
        let price_column = ["close", PRICE_COLUMN, asset_id]
            .into_iter()
            .find(|name| frame.column(name).is_ok())
            .ok_or_else(|| {
                anyhow!(
                    "{} has no price column (expected 'close', 'price' or '{asset_id}')",
                    path.display()
                )
            })?;

        let dates = date_column(&frame, DATE_COLUMN)
            .with_context(|| format!("Invalid date index in {}", path.display()))?;
        let mut series = TimeSeries::new(dates);
        series.insert_float(PRICE_COLUMN, numeric_column(&frame, price_column)?)?;
        if frame.column(VOLUME_COLUMN).is_ok() {
            series.insert_float(VOLUME_COLUMN, numeric_column(&frame, VOLUME_COLUMN)?)?;
        }
        Ok(series)
    }
}

/// In-memory source, handy for tests and for callers that assemble series
/// themselves.
#[derive(Clone, Debug, Default)]
pub struct MemorySource {
    series: HashMap<String, TimeSeries>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, asset_id: impl Into<String>, series: TimeSeries) {
        self.series.insert(asset_id.into(), series);
    }

    pub fn with_series(mut self, asset_id: impl Into<String>, series: TimeSeries) -> Self {
        self.insert(asset_id, series);
        self
    }
}

impl AssetSource for MemorySource {
    fn load_asset_series(&self, asset_id: &str) -> Result<TimeSeries> {
        self.series
            .get(asset_id)
            .cloned()
            .ok_or_else(|| anyhow!("No series registered for asset '{asset_id}'"))
    }
}

impl RemoteSource for MemorySource {
    fn fetch_remote_series(
        &self,
        asset_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<TimeSeries> {
        let mut series = self.load_asset_series(asset_id)?;
        series.retain_range(start, end);
        Ok(series)
    }
}

/// Refresh the store from a remote source, one file per asset.
///
/// Crypto ids are fetched under their full registry name but stored under
/// the id that was requested.
pub fn sync_store(
    remote: &dyn RemoteSource,
    store: &CsvAssetStore,
    registry: &AssetRegistry,
    assets: &[String],
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(assets.len());
    for asset in assets {
        let remote_name = registry.full_name(asset);
        let mut series = remote
            .fetch_remote_series(remote_name, start, end)
            .with_context(|| format!("Failed to fetch remote series for {asset}"))?;
        series.sort_by_date();
        series.ensure_unique_dates()?;
        let path = store.save_asset_series(asset, &series)?;
        info!(
            asset = %asset,
            rows = series.len(),
            path = %path.display(),
            "Saved asset series"
        );
        written.push(path);
    }
    Ok(written)
}

pub fn read_csv(path: &Path) -> Result<DataFrame> {
    CsvReadOptions::default()
        .with_infer_schema_length(Some(1024))
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .with_context(|| format!("Failed to load {}", path.display()))?
        .finish()
        .with_context(|| format!("Unable to read {} into DataFrame", path.display()))
}

pub fn write_csv(path: &Path, frame: &mut DataFrame) -> Result<()> {
    let mut file =
        File::create(path).with_context(|| format!("Unable to create {}", path.display()))?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .finish(frame)
        .with_context(|| format!("Failed to persist {}", path.display()))
}

/// Read an arbitrary date-keyed table: every non-date column must be
/// numeric and becomes a float column.
pub fn read_table_csv(path: &Path) -> Result<TimeSeries> {
    let frame = read_csv(path)?;
    let dates = date_column(&frame, DATE_COLUMN)
        .with_context(|| format!("Invalid date index in {}", path.display()))?;
    let mut table = TimeSeries::new(dates);
    for series in frame.get_columns() {
        if series.name() == DATE_COLUMN {
            continue;
        }
        table.insert_float(series.name(), series_to_f64(series)?)?;
    }
    table.sort_by_date();
    table.ensure_unique_dates()?;
    Ok(table)
}

fn numeric_column(frame: &DataFrame, name: &str) -> Result<Vec<f64>> {
    let series = frame
        .column(name)
        .with_context(|| format!("Missing required column {name}"))?;
    series_to_f64(series)
}

fn series_to_f64(series: &Series) -> Result<Vec<f64>> {
    match series.dtype() {
        DataType::Float64 => Ok(series
            .f64()
            .context("Failed to interpret as f64")?
            .into_iter()
            .map(|v| v.unwrap_or(f64::NAN))
            .collect()),
        DataType::Float32 => Ok(series
            .f32()
            .context("Failed to interpret as f32")?
            .into_iter()
            .map(|v| v.map(|x| x as f64).unwrap_or(f64::NAN))
            .collect()),
        DataType::Int64 => Ok(series
            .i64()
            .context("Failed to interpret as i64")?
            .into_iter()
            .map(|v| v.map(|x| x as f64).unwrap_or(f64::NAN))
            .collect()),
        DataType::Int32 => Ok(series
            .i32()
            .context("Failed to interpret as i32")?
            .into_iter()
            .map(|v| v.map(|x| x as f64).unwrap_or(f64::NAN))
            .collect()),
        other => Err(anyhow!(
            "Unsupported numeric dtype for {}: {other:?}",
            series.name()
        )),
    }
}

fn date_column(frame: &DataFrame, name: &str) -> Result<Vec<NaiveDate>> {
    let series = frame
        .column(name)
        .with_context(|| format!("Missing required date column '{name}'"))?;

    let mut out = Vec::with_capacity(series.len());
    for value in series.iter() {
        let raw = match value {
            AnyValue::String(s) => s,
            AnyValue::StringOwned(ref s) => s.as_str(),
            AnyValue::Null => return Err(anyhow!("Date column contains nulls")),
            other => {
                return Err(anyhow!(
                    "Date column must be UTF-8 strings (got {:?})",
                    other.dtype()
                ));
            }
        };
        out.push(parse_date(raw)?);
    }
    Ok(out)
}

/// Accepts `2018-04-01`, `2018-04-01T00:00:00Z` and `04/01/2018`.
pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    let trimmed = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Ok(date);
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.date_naive());
    }
    NaiveDate::parse_from_str(trimmed, "%m/%d/%Y")
        .with_context(|| format!("Failed to parse date '{raw}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parse_date_accepts_supported_formats() -> Result<()> {
        let expected = NaiveDate::from_ymd_opt(2018, 4, 1).unwrap();
        assert_eq!(parse_date("2018-04-01")?, expected);
        assert_eq!(parse_date("2018-04-01T00:00:00Z")?, expected);
        assert_eq!(parse_date("04/01/2018")?, expected);
        assert!(parse_date("April 1st").is_err());
        Ok(())
    }

    #[test]
    fn crypto_csv_loads_close_and_volume() -> Result<()> {
        let temp_dir = tempdir()?;
        std::fs::write(
            temp_dir.path().join("btc.csv"),
            "date,open,high,low,close,volume,mkt_cap\n\
             2018-01-02,13000,15000,12800,14754.1,13444800000,220000000000\n\
             2018-01-01,14112.2,14112.2,13154.7,13657.2,10291200000,236725000000\n",
        )?;
        let store = CsvAssetStore::new(temp_dir.path());
        let series = store.load_asset_series("btc")?;
        assert_eq!(series.column_names(), vec![PRICE_COLUMN, VOLUME_COLUMN]);
        // File order is preserved; sorting is the loader's job.
        assert_eq!(series.float_column(PRICE_COLUMN)?, &[14754.1, 13657.2]);
        assert_eq!(
            series.float_column(VOLUME_COLUMN)?,
            &[13444800000.0, 10291200000.0]
        );
        Ok(())
    }

    #[test]
    fn non_crypto_csv_uses_asset_named_column() -> Result<()> {
        let temp_dir = tempdir()?;
        std::fs::write(
            temp_dir.path().join("SP500.csv"),
            "date,SP500\n2018-01-02,2695.81\n2018-01-03,2713.06\n",
        )?;
        let store = CsvAssetStore::new(temp_dir.path());
        let series = store.load_asset_series("SP500")?;
        assert_eq!(series.column_names(), vec![PRICE_COLUMN]);
        assert_eq!(series.len(), 2);
        Ok(())
    }

    #[test]
    fn missing_file_is_an_error() {
        let temp_dir = tempdir().expect("temp dir");
        let store = CsvAssetStore::new(temp_dir.path());
        assert!(store.load_asset_series("eth").is_err());
    }

    #[test]
    fn sync_store_writes_requested_range() -> Result<()> {
        let d = |day: u32| NaiveDate::from_ymd_opt(2018, 1, day).unwrap();
        let series = TimeSeries::from_float_columns(
            vec![d(3), d(1), d(2)],
            vec![
                (PRICE_COLUMN, vec![3.0, 1.0, 2.0]),
                (VOLUME_COLUMN, vec![30.0, 10.0, 20.0]),
            ],
        )?;
        let remote = MemorySource::new().with_series("bitcoin", series);
        let temp_dir = tempdir()?;
        let store = CsvAssetStore::new(temp_dir.path().join("data"));
        let registry = AssetRegistry::default();

        let written = sync_store(
            &remote,
            &store,
            &registry,
            &["btc".to_string()],
            d(2),
            d(3),
        )?;
        assert_eq!(written, vec![store.path_for("btc")]);

        let reloaded = store.load_asset_series("btc")?;
        assert_eq!(reloaded.dates(), &[d(2), d(3)]);
        assert_eq!(reloaded.float_column(PRICE_COLUMN)?, &[2.0, 3.0]);
        assert_eq!(reloaded.float_column(VOLUME_COLUMN)?, &[20.0, 30.0]);
        Ok(())
    }
}
