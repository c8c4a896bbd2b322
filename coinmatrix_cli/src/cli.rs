use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

use coinmatrix_rs::data::read_table_csv;
use coinmatrix_rs::label::DEFAULT_CATEGORY_THRESHOLD;
use coinmatrix_rs::{DataRequest, DesignMatrixConfig, LabelSource, LabelSpec, ReturnsMatrixOptions};

#[derive(Parser, Debug)]
#[command(
    name = "coinmatrix",
    about = "Lookahead-free design matrices from crypto and market price series"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build a labeled design matrix for one target crypto
    #[command(name = "design")]
    Design(DesignArgs),
    /// Build a globally standardized daily returns matrix
    #[command(name = "returns")]
    Returns(ReturnsArgs),
}

impl Commands {
    pub fn output(&self) -> &OutputArgs {
        match self {
            Commands::Design(args) => &args.output,
            Commands::Returns(args) => &args.output,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct OutputArgs {
    /// Directory of `<asset>.csv` files
    #[arg(long = "data-dir", value_hint = clap::ValueHint::DirPath)]
    pub data_dir: PathBuf,

    /// Output directory for the matrix CSV and run log
    #[arg(long = "output-dir", value_hint = clap::ValueHint::DirPath)]
    pub output_dir: PathBuf,

    /// Overwrite an existing output whose contents differ from this run
    #[arg(long = "ack-new-df", default_value_t = false)]
    pub ack_new_df: bool,

    /// Log to stdout only
    #[arg(long = "no-file-log", default_value_t = false)]
    pub no_file_log: bool,
}

#[derive(Parser, Debug)]
pub struct DesignArgs {
    #[command(flatten)]
    pub output: OutputArgs,

    /// JSON file with a design matrix config; flags below override it
    #[arg(long = "config", value_name = "FILE", value_hint = clap::ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// Target crypto whose next-day return is the label
    #[arg(long)]
    pub target: Option<String>,

    /// Predictor cryptos (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub predictors: Vec<String>,

    /// Non-crypto predictor assets (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub assets: Vec<String>,

    /// Days over which price returns are computed
    #[arg(long = "n-rolling-price")]
    pub n_rolling_price: Option<usize>,

    /// Days over which volume changes are computed
    #[arg(long = "n-rolling-volume")]
    pub n_rolling_volume: Option<usize>,

    /// Trailing observations for crypto z-scores
    #[arg(long = "n-std-window")]
    pub n_std_window: Option<usize>,

    /// Trailing observations for non-crypto z-scores
    #[arg(long = "n-std-window-noncrypto")]
    pub n_std_window_noncrypto: Option<usize>,

    /// Inclusive start date (YYYY-MM-DD)
    #[arg(long = "date-start")]
    pub date_start: Option<String>,

    /// Inclusive end date (YYYY-MM-DD)
    #[arg(long = "date-end")]
    pub date_end: Option<String>,

    /// Use raw returns as features instead of z-scores
    #[arg(long = "no-std", default_value_t = false)]
    pub no_std: bool,

    /// Add the `lagged_others` indicator
    #[arg(long = "lag-indicator", default_value_t = false)]
    pub lag_indicator: bool,

    /// Recode the label into -1/0/+1
    #[arg(long = "y-category", default_value_t = false)]
    pub y_category: bool,

    /// Neutral band half-width for --y-category
    #[arg(long = "y-category-thresh", default_value_t = DEFAULT_CATEGORY_THRESHOLD)]
    pub y_category_thresh: f64,

    /// Label from the target's z-score instead of its raw return
    #[arg(long = "y-std", default_value_t = false)]
    pub y_std: bool,

    /// Date-keyed CSV of extra features (e.g. news sentiment)
    #[arg(long = "aux-csv", value_name = "FILE", value_hint = clap::ValueHint::FilePath)]
    pub aux_csv: Option<PathBuf>,
}

impl DesignArgs {
    pub fn to_config(&self) -> Result<DesignMatrixConfig> {
        let mut config = match (&self.config, &self.target) {
            (Some(path), _) => DesignMatrixConfig::from_json_file(path)?,
            (None, Some(target)) => DesignMatrixConfig::new(target.clone(), Vec::new()),
            (None, None) => return Err(anyhow!("either --target or --config is required")),
        };

        if let Some(target) = &self.target {
            config.target = target.clone();
        }
        if !self.predictors.is_empty() {
            config.predictors = self.predictors.clone();
        }
        if !self.assets.is_empty() {
            config.assets = self.assets.clone();
        }
        if let Some(value) = self.n_rolling_price {
            config.n_rolling_price = value;
        }
        if let Some(value) = self.n_rolling_volume {
            config.n_rolling_volume = value;
        }
        if let Some(value) = self.n_std_window {
            config.n_std_window = value;
        }
        if let Some(value) = self.n_std_window_noncrypto {
            config.n_std_window_noncrypto = value;
        }
        if let Some(date) = parse_optional_date(self.date_start.as_deref())? {
            config.start_date = date;
        }
        if let Some(date) = parse_optional_date(self.date_end.as_deref())? {
            config.end_date = date;
        }
        if let Some(path) = &self.aux_csv {
            let table = read_table_csv(path)
                .with_context(|| format!("Failed to read auxiliary features {}", path.display()))?;
            config.auxiliary = Some(table);
        }
        Ok(config)
    }

    pub fn to_request(&self) -> DataRequest {
        DataRequest {
            standardize: !self.no_std,
            lag_indicator: self.lag_indicator,
            label: LabelSpec {
                source: if self.y_std {
                    LabelSource::Standardized
                } else {
                    LabelSource::Raw
                },
                categorical: self.y_category,
                threshold: self.y_category_thresh,
            },
        }
    }
}

#[derive(Parser, Debug)]
pub struct ReturnsArgs {
    #[command(flatten)]
    pub output: OutputArgs,

    /// Assets to include (comma separated)
    #[arg(long, value_delimiter = ',', required = true)]
    pub assets: Vec<String>,

    /// Return horizon in source rows
    #[arg(long, default_value_t = 1)]
    pub periods: usize,

    /// Inclusive start date (YYYY-MM-DD)
    #[arg(long = "date-start")]
    pub date_start: Option<String>,

    /// Inclusive end date (YYYY-MM-DD)
    #[arg(long = "date-end")]
    pub date_end: Option<String>,

    /// Keep column means
    #[arg(long = "no-center", default_value_t = false)]
    pub no_center: bool,

    /// Keep column scale
    #[arg(long = "no-scale", default_value_t = false)]
    pub no_scale: bool,

    /// Keep full crypto names as column headers
    #[arg(long = "no-shortnames", default_value_t = false)]
    pub no_shortnames: bool,
}

impl ReturnsArgs {
    pub fn to_options(&self) -> Result<ReturnsMatrixOptions> {
        let defaults = ReturnsMatrixOptions::default();
        Ok(ReturnsMatrixOptions {
            periods: self.periods,
            start: parse_optional_date(self.date_start.as_deref())?.unwrap_or(defaults.start),
            end: parse_optional_date(self.date_end.as_deref())?.unwrap_or(defaults.end),
            center: !self.no_center,
            scale: !self.no_scale,
            use_shortnames: !self.no_shortnames,
        })
    }
}

fn parse_optional_date(value: Option<&str>) -> Result<Option<NaiveDate>> {
    match value {
        Some(raw) => {
            let parsed = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .with_context(|| format!("Invalid date format for {raw}. Expected YYYY-MM-DD"))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).expect("arguments parse")
    }

    fn design_args(cli: Cli) -> DesignArgs {
        match cli.command {
            Commands::Design(args) => args,
            other => panic!("expected design command, got {other:?}"),
        }
    }

    #[test]
    fn design_flags_build_config_and_request() -> Result<()> {
        let cli = parse(&[
            "coinmatrix",
            "design",
            "--data-dir",
            "data",
            "--output-dir",
            "out",
            "--target",
            "btc",
            "--predictors",
            "eth,ltc",
            "--assets",
            "SP500",
            "--n-std-window",
            "15",
            "--date-start",
            "2018-01-01",
            "--lag-indicator",
            "--y-category",
            "--y-std",
        ]);
        let args = design_args(cli);
        let config = args.to_config()?;
        assert_eq!(config.target, "btc");
        assert_eq!(config.predictors, vec!["eth", "ltc"]);
        assert_eq!(config.assets, vec!["SP500"]);
        assert_eq!(config.n_std_window, 15);
        assert_eq!(config.n_std_window_noncrypto, 30);
        assert_eq!(config.start_date, NaiveDate::from_ymd_opt(2018, 1, 1).unwrap());

        let request = args.to_request();
        assert!(request.standardize && request.lag_indicator);
        assert_eq!(request.label.source, LabelSource::Standardized);
        assert!(request.label.categorical);
        assert_eq!(request.label.threshold, DEFAULT_CATEGORY_THRESHOLD);
        Ok(())
    }

    #[test]
    fn flags_override_config_file() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"target": "eth", "predictors": ["btc"], "n_std_window": 12}"#,
        )?;
        let cli = parse(&[
            "coinmatrix",
            "design",
            "--data-dir",
            "data",
            "--output-dir",
            "out",
            "--config",
            path.to_str().expect("utf-8 path"),
            "--n-std-window",
            "9",
        ]);
        let config = design_args(cli).to_config()?;
        assert_eq!(config.target, "eth");
        assert_eq!(config.predictors, vec!["btc"]);
        assert_eq!(config.n_std_window, 9);
        Ok(())
    }

    #[test]
    fn design_requires_target_or_config() {
        let cli = parse(&[
            "coinmatrix",
            "design",
            "--data-dir",
            "data",
            "--output-dir",
            "out",
        ]);
        assert!(design_args(cli).to_config().is_err());
    }

    #[test]
    fn returns_flags_map_to_options() -> Result<()> {
        let cli = parse(&[
            "coinmatrix",
            "returns",
            "--data-dir",
            "data",
            "--output-dir",
            "out",
            "--assets",
            "bitcoin,SP500",
            "--periods",
            "3",
            "--no-scale",
            "--date-end",
            "2018-04-30",
        ]);
        let Commands::Returns(args) = cli.command else {
            panic!("expected returns command");
        };
        let options = args.to_options()?;
        assert_eq!(args.assets, vec!["bitcoin", "SP500"]);
        assert_eq!(options.periods, 3);
        assert!(options.center && !options.scale && options.use_shortnames);
        assert_eq!(options.end, NaiveDate::from_ymd_opt(2018, 4, 30).unwrap());
        Ok(())
    }

    #[test]
    fn bad_dates_are_rejected() {
        assert!(parse_optional_date(Some("30/04/2018")).is_err());
        assert_eq!(parse_optional_date(None).unwrap(), None);
    }
}
