//! Design-matrix pipeline expressed as typed stages.
//!
//! `Unloaded -> Loaded -> Standardized -> Featurized -> Labeled`. Each
//! operation consumes its predecessor stage, so a step cannot run twice and
//! cannot run before the step it depends on. [`build_design_data`] composes
//! the stages from a [`DataRequest`].

use anyhow::Result;
use chrono::NaiveDate;
use rayon::prelude::*;
use tracing::info;

use crate::align::{CombinedMatrix, inner_join, join};
use crate::asset::AssetRegistry;
use crate::config::DesignMatrixConfig;
use crate::data::AssetSource;
use crate::error::PipelineError;
use crate::feature::{FeatureSet, LAGGED_OTHERS, relative_lag_indicator};
use crate::label::{Label, LabelSource, LabelSpec, build_label};
use crate::loader::{LoadedSeries, LoaderSettings, TimeSeriesLoader, price_column, volume_column};
use crate::quality::Diagnostics;
use crate::series::TimeSeries;
use crate::standardize::{standardize, std_column};

mod sealed {
    pub trait Sealed {}
}

/// Marker for a pipeline stage.
pub trait Stage: sealed::Sealed {}

#[derive(Debug)]
pub struct Unloaded;
#[derive(Debug)]
pub struct Loaded;
#[derive(Debug)]
pub struct Standardized;
#[derive(Debug)]
pub struct Featurized;
/// Terminal stage; holds the label aligned with the surviving rows.
#[derive(Debug)]
pub struct Labeled {
    label: Label,
}

impl sealed::Sealed for Unloaded {}
impl sealed::Sealed for Loaded {}
impl sealed::Sealed for Standardized {}
impl sealed::Sealed for Featurized {}
impl sealed::Sealed for Labeled {}
impl Stage for Unloaded {}
impl Stage for Loaded {}
impl Stage for Standardized {}
impl Stage for Featurized {}
impl Stage for Labeled {}

#[derive(Debug)]
pub struct DesignMatrix<S: Stage> {
    config: DesignMatrixConfig,
    matrix: CombinedMatrix,
    features: FeatureSet,
    diagnostics: Diagnostics,
    stage: S,
}

impl<S: Stage> DesignMatrix<S> {
    pub fn config(&self) -> &DesignMatrixConfig {
        &self.config
    }

    pub fn matrix(&self) -> &CombinedMatrix {
        &self.matrix
    }

    pub fn feature_names(&self) -> &[String] {
        self.features.names()
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    fn advance<T: Stage>(self, stage: T) -> DesignMatrix<T> {
        DesignMatrix {
            config: self.config,
            matrix: self.matrix,
            features: self.features,
            diagnostics: self.diagnostics,
            stage,
        }
    }
}

impl DesignMatrix<Unloaded> {
    /// Validate the configuration; nothing is loaded yet.
    pub fn new(config: DesignMatrixConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            matrix: CombinedMatrix::default(),
            features: FeatureSet::new(),
            diagnostics: Diagnostics::new(),
            stage: Unloaded,
        })
    }

    /// Load every asset (predictor cryptos, the target, then non-crypto
    /// assets) in parallel and join them into the combined matrix.
    pub fn load(
        self,
        source: &dyn AssetSource,
        registry: &AssetRegistry,
    ) -> Result<DesignMatrix<Loaded>> {
        let cryptos = self.config.xy_cryptos();
        for asset in &cryptos {
            if !registry.is_crypto(asset) {
                return Err(PipelineError::configuration(format!(
                    "'{asset}' is not a registered crypto asset"
                ))
                .into());
            }
        }
        for asset in &self.config.assets {
            if registry.is_crypto(asset) {
                return Err(PipelineError::configuration(format!(
                    "'{asset}' is a crypto asset; list it under predictors"
                ))
                .into());
            }
        }

        let settings = LoaderSettings {
            window_price: self.config.n_rolling_price,
            window_volume: self.config.n_rolling_volume,
            start: self.config.start_date,
            end: self.config.end_date,
        };
        let ids: Vec<&String> = cryptos.iter().chain(self.config.assets.iter()).collect();
        info!(
            target_asset = %self.config.target,
            assets = ids.len(),
            start = %settings.start,
            end = %settings.end,
            "Loading asset series"
        );

        let loader = TimeSeriesLoader::new(source, registry);
        let loaded: Vec<LoadedSeries> = ids
            .par_iter()
            .map(|id| loader.load(id, &settings))
            .collect::<Result<_>>()?;

        let mut diagnostics = self.diagnostics;
        let mut series = Vec::with_capacity(loaded.len());
        for item in loaded {
            diagnostics.extend(item.diagnostics);
            series.push(item.series);
        }
        let refs: Vec<&TimeSeries> = series.iter().collect();
        let matrix = join(&refs, &mut diagnostics)?;

        Ok(DesignMatrix {
            config: self.config,
            matrix,
            features: self.features,
            diagnostics,
            stage: Loaded,
        })
    }
}

impl DesignMatrix<Loaded> {
    /// Raw return columns in load order.
    pub fn raw_columns(&self) -> Vec<String> {
        let mut out = Vec::new();
        for crypto in self.config.xy_cryptos() {
            out.push(price_column(&crypto));
            out.push(volume_column(&crypto));
        }
        out.extend(self.config.assets.iter().map(|a| price_column(a)));
        out
    }

    /// Add trailing z-scores for every crypto return and volume change and
    /// every non-crypto return.
    pub fn standardize(mut self) -> Result<DesignMatrix<Standardized>> {
        let crypto_window = self.config.n_std_window;
        for crypto in self.config.xy_cryptos() {
            for column in [price_column(&crypto), volume_column(&crypto)] {
                let name = standardize(&mut self.matrix, &column, crypto_window)?;
                self.features.push(name);
            }
        }
        let other_window = self.config.n_std_window_noncrypto;
        for asset in self.config.assets.clone() {
            let name = standardize(&mut self.matrix, &price_column(&asset), other_window)?;
            self.features.push(name);
        }
        info!(
            features = self.features.len(),
            crypto_window,
            other_window,
            "Standardized returns"
        );
        Ok(self.advance(Standardized))
    }

    /// Skip standardization: the raw return columns become the features.
    pub fn featurize(mut self) -> DesignMatrix<Featurized> {
        let raw = self.raw_columns();
        self.features.extend(raw);
        self.advance(Featurized)
    }

    pub fn label(self, spec: &LabelSpec) -> Result<DesignMatrix<Labeled>> {
        self.featurize().label(spec)
    }
}

impl DesignMatrix<Standardized> {
    /// Add the boolean `lagged_others` feature.
    pub fn with_relative_lag_indicator(mut self) -> Result<DesignMatrix<Featurized>> {
        let flags = relative_lag_indicator(
            &self.matrix,
            &self.config.target,
            &self.config.x_cryptos(),
        )?;
        let lagged = flags.iter().filter(|f| **f).count();
        self.matrix.insert_bool(LAGGED_OTHERS, flags)?;
        self.features.push(LAGGED_OTHERS);
        info!(lagged, rows = self.matrix.len(), "Added relative lag indicator");
        Ok(self.advance(Featurized))
    }

    pub fn featurize(self) -> DesignMatrix<Featurized> {
        self.advance(Featurized)
    }

    pub fn label(self, spec: &LabelSpec) -> Result<DesignMatrix<Labeled>> {
        self.featurize().label(spec)
    }
}

impl DesignMatrix<Featurized> {
    /// Inner-merge a date-keyed table and append its columns as features.
    pub fn with_auxiliary(mut self, table: &TimeSeries) -> Result<Self> {
        let rows_before = self.matrix.len();
        self.matrix = inner_join(&[&self.matrix, table])?;
        let columns: Vec<String> = table.column_names().iter().map(|c| c.to_string()).collect();
        info!(
            columns = columns.len(),
            rows_before,
            rows = self.matrix.len(),
            "Merged auxiliary features"
        );
        self.features.extend(columns);
        Ok(self)
    }

    pub fn label(self, spec: &LabelSpec) -> Result<DesignMatrix<Labeled>> {
        spec.validate()?;
        let source_column = match spec.source {
            LabelSource::Raw => price_column(&self.config.target),
            LabelSource::Standardized => {
                let column = std_column(&price_column(&self.config.target));
                if !self.matrix.has_column(&column) {
                    return Err(PipelineError::Sequencing {
                        step: "standardized label",
                        prerequisite: "standardize",
                    }
                    .into());
                }
                column
            }
        };
        let labeled = build_label(&self.matrix, &source_column, spec.categorical, spec.threshold)?;
        info!(
            rows = labeled.matrix.len(),
            features = self.features.len(),
            categorical = spec.categorical,
            "Labeled design matrix"
        );
        Ok(DesignMatrix {
            config: self.config,
            matrix: labeled.matrix,
            features: self.features,
            diagnostics: self.diagnostics,
            stage: Labeled {
                label: labeled.label,
            },
        })
    }
}

impl DesignMatrix<Labeled> {
    /// Feature columns only, in feature order.
    pub fn x(&self) -> Result<TimeSeries> {
        self.matrix.select(self.features.names())
    }

    pub fn y(&self) -> &Label {
        &self.stage.label
    }

    pub fn dates(&self) -> &[NaiveDate] {
        self.matrix.dates()
    }

    pub fn len(&self) -> usize {
        self.matrix.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matrix.is_empty()
    }

    pub fn into_design_data(self) -> Result<DesignData> {
        Ok(DesignData {
            x: self.x()?,
            y: self.stage.label,
            features: self.features.names().to_vec(),
            diagnostics: self.diagnostics,
        })
    }
}

/// Which optional steps [`build_design_data`] runs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DataRequest {
    pub standardize: bool,
    pub lag_indicator: bool,
    pub label: LabelSpec,
}

impl Default for DataRequest {
    fn default() -> Self {
        Self {
            standardize: true,
            lag_indicator: false,
            label: LabelSpec::default(),
        }
    }
}

/// Finished `X`/`Y` pair with the warnings raised while building it.
#[derive(Clone, Debug)]
pub struct DesignData {
    pub x: TimeSeries,
    pub y: Label,
    pub features: Vec<String>,
    pub diagnostics: Diagnostics,
}

impl DesignData {
    pub fn dates(&self) -> &[NaiveDate] {
        self.x.dates()
    }
}

/// Run the whole pipeline in one call. The config's auxiliary table, if
/// any, is merged after features are built.
pub fn build_design_data(
    config: DesignMatrixConfig,
    source: &dyn AssetSource,
    registry: &AssetRegistry,
    request: &DataRequest,
) -> Result<DesignData> {
    if request.lag_indicator && !request.standardize {
        return Err(PipelineError::Sequencing {
            step: "relative_lag_indicator",
            prerequisite: "standardize",
        }
        .into());
    }
    if request.label.source == LabelSource::Standardized && !request.standardize {
        return Err(PipelineError::Sequencing {
            step: "standardized label",
            prerequisite: "standardize",
        }
        .into());
    }
    request.label.validate()?;
    if request.lag_indicator && config.x_cryptos().is_empty() {
        return Err(PipelineError::configuration(
            "relative lag indicator needs at least one predictor crypto besides the target",
        )
        .into());
    }

    let auxiliary = config.auxiliary.clone();
    let loaded = DesignMatrix::new(config)?.load(source, registry)?;
    let featurized = if request.standardize {
        let standardized = loaded.standardize()?;
        if request.lag_indicator {
            standardized.with_relative_lag_indicator()?
        } else {
            standardized.featurize()
        }
    } else {
        loaded.featurize()
    };
    let featurized = match &auxiliary {
        Some(table) => featurized.with_auxiliary(table)?,
        None => featurized,
    };
    featurized.label(&request.label)?.into_design_data()
}
