use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::series::TimeSeries;

fn default_n_rolling() -> usize {
    1
}

fn default_n_std_window() -> usize {
    20
}

fn default_n_std_window_noncrypto() -> usize {
    30
}

pub fn default_start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2010, 1, 1).unwrap_or(NaiveDate::MIN)
}

pub fn default_end_date() -> NaiveDate {
    Utc::now().date_naive()
}

/// Parameters for one design-matrix run.
///
/// Every recognised option is a field here; parsing JSON with an unknown
/// key fails. Call [`DesignMatrixConfig::validate`] (the pipeline does so on
/// construction) before using a hand-built value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DesignMatrixConfig {
    /// Crypto asset whose next-period return is the label.
    pub target: String,
    /// Crypto assets used as predictors. The target is implicitly a
    /// predictor of itself and is removed from this list.
    #[serde(default)]
    pub predictors: Vec<String>,
    /// Non-crypto predictor assets (indices, rates, commodities).
    #[serde(default)]
    pub assets: Vec<String>,
    /// Days over which trailing price returns are computed.
    #[serde(default = "default_n_rolling")]
    pub n_rolling_price: usize,
    /// Days over which trailing volume changes are computed.
    #[serde(default = "default_n_rolling")]
    pub n_rolling_volume: usize,
    /// Trailing observations used to standardize crypto returns and volume.
    #[serde(default = "default_n_std_window")]
    pub n_std_window: usize,
    /// Trailing observations used to standardize non-crypto returns.
    #[serde(default = "default_n_std_window_noncrypto")]
    pub n_std_window_noncrypto: usize,
    /// Inclusive start of the returns period.
    #[serde(default = "default_start_date")]
    pub start_date: NaiveDate,
    /// Inclusive end of the returns period.
    #[serde(default = "default_end_date")]
    pub end_date: NaiveDate,
    /// Optional date-keyed feature table (e.g. news sentiment) merged into
    /// the matrix before labeling. Supplied programmatically.
    #[serde(skip)]
    pub auxiliary: Option<TimeSeries>,
}

impl DesignMatrixConfig {
    pub fn new(target: impl Into<String>, predictors: Vec<String>) -> Self {
        Self {
            target: target.into(),
            predictors,
            assets: Vec::new(),
            n_rolling_price: default_n_rolling(),
            n_rolling_volume: default_n_rolling(),
            n_std_window: default_n_std_window(),
            n_std_window_noncrypto: default_n_std_window_noncrypto(),
            start_date: default_start_date(),
            end_date: default_end_date(),
            auxiliary: None,
        }
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw).map_err(|err| {
            PipelineError::configuration(format!("failed to parse design matrix config: {err}"))
        })?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Unable to read config {}", path.display()))?;
        Self::from_json_str(&raw).with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Predictor cryptos with the target removed, in configured order.
    pub fn x_cryptos(&self) -> Vec<String> {
        self.predictors
            .iter()
            .filter(|p| **p != self.target)
            .cloned()
            .collect()
    }

    /// Predictor cryptos followed by the target: the load order of every
    /// crypto series and the order of their feature columns.
    pub fn xy_cryptos(&self) -> Vec<String> {
        let mut out = self.x_cryptos();
        out.push(self.target.clone());
        out
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| -> Result<()> { Err(PipelineError::configuration(msg).into()) };

        if self.target.trim().is_empty() {
            return fail("target asset must not be empty".to_string());
        }
        for (name, value) in [
            ("n_rolling_price", self.n_rolling_price),
            ("n_rolling_volume", self.n_rolling_volume),
            ("n_std_window", self.n_std_window),
            ("n_std_window_noncrypto", self.n_std_window_noncrypto),
        ] {
            if value == 0 {
                return fail(format!("{name} must be a positive integer (got 0)"));
            }
        }
        if self.start_date > self.end_date {
            return fail(format!(
                "start_date {} is after end_date {}",
                self.start_date, self.end_date
            ));
        }

        let mut seen = HashSet::new();
        for asset in self.xy_cryptos().iter().chain(self.assets.iter()) {
            if asset.trim().is_empty() {
                return fail("asset ids must not be empty".to_string());
            }
            if !seen.insert(asset.as_str()) {
                return fail(format!("asset '{asset}' is listed more than once"));
            }
        }
        Ok(())
    }
}
