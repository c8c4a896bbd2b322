use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use polars::prelude::*;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::label::{LABEL_COLUMN, Label};
use crate::pipeline::DesignData;
use crate::series::TimeSeries;

pub const DESIGN_MATRIX_FILE: &str = "design_matrix.csv";
pub const RETURNS_MATRIX_FILE: &str = "returns_matrix.csv";

/// `date`, the feature columns in order, then `Y`.
pub fn design_frame(data: &DesignData) -> Result<DataFrame> {
    let mut frame = data.x.to_data_frame()?;
    let label = match &data.y {
        Label::Continuous(values) => Series::new(LABEL_COLUMN, values.clone()),
        Label::Categorical(values) => Series::new(
            LABEL_COLUMN,
            values.iter().map(|&v| i32::from(v)).collect::<Vec<i32>>(),
        ),
    };
    frame
        .with_column(label)
        .context("Failed to attach label column")?;
    Ok(frame)
}

pub fn returns_frame(matrix: &TimeSeries) -> Result<DataFrame> {
    matrix.to_data_frame()
}

/// Hex SHA-256 of the frame's CSV rendering (header included).
pub fn frame_fingerprint(frame: &mut DataFrame) -> Result<String> {
    let mut hasher = FingerprintWriter::default();
    CsvWriter::new(&mut hasher)
        .include_header(true)
        .finish(frame)
        .context("Failed to render frame for fingerprinting")?;
    Ok(hasher.finalize_hex())
}

pub fn file_fingerprint(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .with_context(|| format!("Unable to open {} for hashing", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file
            .read(&mut buffer)
            .with_context(|| format!("Unable to read {}", path.display()))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[derive(Default)]
struct FingerprintWriter {
    hasher: Sha256,
}

impl FingerprintWriter {
    fn finalize_hex(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

impl Write for FingerprintWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.hasher.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PersistOutcome {
    Written,
    /// An identical file already existed and was left untouched.
    Reused,
    /// A differing file was replaced because the caller acknowledged it.
    Overwritten,
}

#[derive(Clone, Debug)]
pub struct Persisted {
    pub path: PathBuf,
    pub fingerprint: String,
    pub outcome: PersistOutcome,
}

/// Write `frame` to `path` unless a different file is already there.
///
/// An existing file with the same fingerprint is reused. A differing one is
/// an error unless `ack_new` is set, in which case it is overwritten.
pub fn persist_with_guard(path: &Path, frame: &mut DataFrame, ack_new: bool) -> Result<Persisted> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Unable to create {}", parent.display()))?;
    }

    let fingerprint = frame_fingerprint(frame)?;
    let mut outcome = PersistOutcome::Written;
    if path.exists() {
        let existing = file_fingerprint(path)?;
        if existing == fingerprint {
            info!(
                rows = frame.height(),
                path = %path.display(),
                "Output unchanged; reusing existing file"
            );
            return Ok(Persisted {
                path: path.to_path_buf(),
                fingerprint,
                outcome: PersistOutcome::Reused,
            });
        }
        if !ack_new {
            return Err(anyhow!(
                "Existing {} differs from the newly built matrix.\n\
                 existing sha256: {}\n\
                 new sha256: {}\n\
                 Rerun with --ack-new-df to overwrite, or choose a fresh --output-dir to keep prior results.",
                path.display(),
                existing,
                fingerprint
            ));
        }
        warn!(
            existing_hash = %existing,
            new_hash = %fingerprint,
            path = %path.display(),
            "Output hash mismatch; overwriting because ack_new_df=true"
        );
        outcome = PersistOutcome::Overwritten;
    }

    let mut file =
        File::create(path).with_context(|| format!("Unable to create {}", path.display()))?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .finish(frame)
        .with_context(|| format!("Failed to persist {}", path.display()))?;
    info!(
        rows = frame.height(),
        columns = frame.width(),
        path = %path.display(),
        sha256 = %fingerprint,
        "Matrix written"
    );
    Ok(Persisted {
        path: path.to_path_buf(),
        fingerprint,
        outcome,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn matrix(value: f64) -> TimeSeries {
        TimeSeries::from_float_columns(
            vec![
                NaiveDate::from_ymd_opt(2018, 6, 1).unwrap(),
                NaiveDate::from_ymd_opt(2018, 6, 2).unwrap(),
            ],
            vec![("btc", vec![0.5, value])],
        )
        .unwrap()
    }

    #[test]
    fn fingerprint_matches_written_file() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join(RETURNS_MATRIX_FILE);
        let mut frame = returns_frame(&matrix(1.0))?;
        let persisted = persist_with_guard(&path, &mut frame, false)?;
        assert_eq!(persisted.outcome, PersistOutcome::Written);
        assert_eq!(file_fingerprint(&path)?, persisted.fingerprint);
        Ok(())
    }

    #[test]
    fn guard_reuses_identical_and_rejects_changed_output() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("out").join(RETURNS_MATRIX_FILE);
        persist_with_guard(&path, &mut returns_frame(&matrix(1.0))?, false)?;

        let again = persist_with_guard(&path, &mut returns_frame(&matrix(1.0))?, false)?;
        assert_eq!(again.outcome, PersistOutcome::Reused);

        let err = persist_with_guard(&path, &mut returns_frame(&matrix(2.0))?, false).unwrap_err();
        assert!(err.to_string().contains("--ack-new-df"));

        let forced = persist_with_guard(&path, &mut returns_frame(&matrix(2.0))?, true)?;
        assert_eq!(forced.outcome, PersistOutcome::Overwritten);
        Ok(())
    }

    #[test]
    fn design_frame_appends_label_last() -> Result<()> {
        let data = DesignData {
            x: matrix(1.0),
            y: Label::Categorical(vec![1, -1]),
            features: vec!["btc".to_string()],
            diagnostics: Default::default(),
        };
        let frame = design_frame(&data)?;
        let names: Vec<&str> = frame.get_column_names();
        assert_eq!(names, vec!["date", "btc", "Y"]);
        Ok(())
    }
}
