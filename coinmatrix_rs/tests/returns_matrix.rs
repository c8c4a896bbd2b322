use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::NaiveDate;
use coinmatrix_rs::output::{RETURNS_MATRIX_FILE, persist_with_guard, returns_frame};
use coinmatrix_rs::{AssetRegistry, CsvAssetStore, ReturnsMatrixOptions, build_returns_matrix};
use tempfile::tempdir;

fn store() -> CsvAssetStore {
    let root: PathBuf = Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .expect("workspace root")
        .join("tests")
        .join("data");
    CsvAssetStore::new(root)
}

fn assets() -> Vec<String> {
    ["btc", "eth", "SP500"].iter().map(|s| s.to_string()).collect()
}

#[test]
fn end_bound_is_the_earliest_available_last_date() -> Result<()> {
    // Requesting past the end of the sample must not extend any series with
    // forward-filled rows.
    let options = ReturnsMatrixOptions {
        start: NaiveDate::from_ymd_opt(2017, 6, 1).unwrap(),
        end: NaiveDate::from_ymd_opt(2030, 1, 1).unwrap(),
        center: false,
        scale: false,
        ..ReturnsMatrixOptions::default()
    };
    let out = build_returns_matrix(&store(), &AssetRegistry::default(), &assets(), &options)?;

    let sp500_last = NaiveDate::from_ymd_opt(2018, 4, 30).unwrap();
    assert_eq!(out.matrix.last_date(), Some(sp500_last));
    assert_eq!(out.matrix.first_date(), NaiveDate::from_ymd_opt(2018, 1, 2));
    assert_eq!(out.matrix.column_names(), vec!["btc", "eth", "SP500"]);
    assert_eq!(out.matrix.missing_row_count(), 0);
    Ok(())
}

#[test]
fn multi_period_returns_count_source_rows() -> Result<()> {
    let base = ReturnsMatrixOptions {
        start: NaiveDate::from_ymd_opt(2018, 1, 1).unwrap(),
        end: NaiveDate::from_ymd_opt(2018, 12, 31).unwrap(),
        ..ReturnsMatrixOptions::default()
    };
    let daily = build_returns_matrix(&store(), &AssetRegistry::default(), &assets(), &base)?;
    let weekly = build_returns_matrix(
        &store(),
        &AssetRegistry::default(),
        &assets(),
        &ReturnsMatrixOptions {
            periods: 7,
            ..base.clone()
        },
    )?;
    // SP500 has no weekend rows, so seven periods reach back to Jan 1 only
    // on Jan 10.
    assert_eq!(weekly.matrix.first_date(), NaiveDate::from_ymd_opt(2018, 1, 10));
    assert_eq!(daily.matrix.len(), weekly.matrix.len() + 8);
    Ok(())
}

#[test]
fn returns_output_round_trips_through_the_guard() -> Result<()> {
    let options = ReturnsMatrixOptions {
        start: NaiveDate::from_ymd_opt(2018, 1, 1).unwrap(),
        end: NaiveDate::from_ymd_opt(2018, 3, 31).unwrap(),
        ..ReturnsMatrixOptions::default()
    };
    let temp_dir = tempdir()?;
    let path = temp_dir.path().join(RETURNS_MATRIX_FILE);

    let out = build_returns_matrix(&store(), &AssetRegistry::default(), &assets(), &options)?;
    let written = persist_with_guard(&path, &mut returns_frame(&out.matrix)?, false)?;
    let rebuilt = build_returns_matrix(&store(), &AssetRegistry::default(), &assets(), &options)?;
    let reused = persist_with_guard(&path, &mut returns_frame(&rebuilt.matrix)?, false)?;
    assert_eq!(written.fingerprint, reused.fingerprint);
    Ok(())
}
