use std::fmt;

use chrono::NaiveDate;
use itertools::Itertools;
use tracing::warn;

/// Row-drop count above which a join or cleanup step is reported.
pub const DROPPED_ROWS_WARNING_THRESHOLD: usize = 10;

/// Number of offending rows kept as a sample in missing-row warnings.
pub const MISSING_ROW_SAMPLE: usize = 5;

/// One offending row: its date and every column value on that date.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleRow {
    pub date: NaiveDate,
    pub values: Vec<(String, f64)>,
}

impl fmt::Display for SampleRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}]",
            self.date,
            self.values
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .join(", ")
        )
    }
}

/// Non-fatal data-quality signal. These never stop a run.
#[derive(Clone, Debug, PartialEq)]
pub enum DataQualityWarning {
    /// A crypto series had more gap rows after reindexing than its return
    /// warm-up explains.
    ExcessMissingRows {
        asset: String,
        count: usize,
        sample: Vec<SampleRow>,
    },
    /// More rows than [`DROPPED_ROWS_WARNING_THRESHOLD`] were removed for
    /// holding missing values.
    ExcessDroppedRows { stage: &'static str, dropped: usize },
}

impl fmt::Display for DataQualityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataQualityWarning::ExcessMissingRows {
                asset,
                count,
                sample,
            } => write!(
                f,
                "Encountered {count} null rows in time series for {asset} (first: {})",
                sample.iter().join("; ")
            ),
            DataQualityWarning::ExcessDroppedRows { stage, dropped } => write!(
                f,
                "More than {DROPPED_ROWS_WARNING_THRESHOLD} N/A rows dropped in {stage} ({dropped})"
            ),
        }
    }
}

/// Warnings collected during one run, in the order they were raised.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Diagnostics {
    warnings: Vec<DataQualityWarning>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log the warning on the operator channel and keep it for the caller.
    pub fn report(&mut self, warning: DataQualityWarning) {
        match &warning {
            DataQualityWarning::ExcessMissingRows {
                asset,
                count,
                sample,
            } => warn!(
                asset = %asset,
                count = *count,
                sample = %sample.iter().join("; "),
                "Unexpected missing rows after daily reindex"
            ),
            DataQualityWarning::ExcessDroppedRows { stage, dropped } => warn!(
                stage = *stage,
                dropped = *dropped,
                threshold = DROPPED_ROWS_WARNING_THRESHOLD,
                "Dropped rows with missing values"
            ),
        }
        self.warnings.push(warning);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.warnings.extend(other.warnings);
    }

    pub fn warnings(&self) -> &[DataQualityWarning] {
        &self.warnings
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.warnings.len()
    }
}

/// Report a row drop only when it crosses the warning threshold.
pub fn check_dropped_rows(diagnostics: &mut Diagnostics, stage: &'static str, dropped: usize) {
    if dropped > DROPPED_ROWS_WARNING_THRESHOLD {
        diagnostics.report(DataQualityWarning::ExcessDroppedRows { stage, dropped });
    }
}
