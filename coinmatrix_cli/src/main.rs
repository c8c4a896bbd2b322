mod cli;

use std::fs::OpenOptions;
use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::Parser;
use cli::{Cli, Commands, DesignArgs, ReturnsArgs};
use coinmatrix_rs::output::{
    DESIGN_MATRIX_FILE, RETURNS_MATRIX_FILE, design_frame, persist_with_guard, returns_frame,
};
use coinmatrix_rs::{
    AssetRegistry, CsvAssetStore, Diagnostics, build_design_data, build_returns_matrix,
};
use tracing::{info, warn};
use tracing_appender::non_blocking;
use tracing_subscriber::{EnvFilter, prelude::*};

fn init_tracing(log_file: Option<PathBuf>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stdout_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stdout);

    if let Some(path) = log_file {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| anyhow!("failed to create log directory {parent:?}: {err}"))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| anyhow!("failed to open log file {path:?}: {err}"))?;
        let (non_blocking_writer, guard) = non_blocking(file);
        // The writer thread must outlive every log call.
        let _guard = Box::leak(Box::new(guard));
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(non_blocking_writer);
        tracing_subscriber::registry()
            .with(filter)
            .with(stdout_layer)
            .with(file_layer)
            .try_init()
            .map_err(|err| anyhow!("failed to initialize tracing: {err}"))
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(stdout_layer)
            .try_init()
            .map_err(|err| anyhow!("failed to initialize tracing: {err}"))
    }
}

fn log_invocation(log_file: Option<&PathBuf>) {
    let cwd = std::env::current_dir().ok();
    let argv: Vec<String> = std::env::args_os()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect();

    info!("==================== new coinmatrix run ====================");
    info!(
        version = env!("CARGO_PKG_VERSION"),
        cwd = ?cwd,
        log_file = ?log_file,
        argv = ?argv,
        "coinmatrix_cli invoked"
    );
    if argv.len() >= 2 {
        info!(
            "cargo_repro_command=cargo run --release -p coinmatrix_cli -- {}",
            argv[1..].join(" ")
        );
    }
}

fn summarize(diagnostics: &Diagnostics) {
    if diagnostics.is_empty() {
        return;
    }
    warn!(
        count = diagnostics.len(),
        "Run finished with data-quality warnings"
    );
    for warning in diagnostics.warnings() {
        warn!("{warning}");
    }
}

fn run_design(args: DesignArgs) -> Result<()> {
    let config = args.to_config()?;
    let request = args.to_request();
    let store = CsvAssetStore::new(&args.output.data_dir);
    let registry = AssetRegistry::default();

    let data = build_design_data(config, &store, &registry, &request)?;
    summarize(&data.diagnostics);

    let mut frame = design_frame(&data)?;
    let path = args.output.output_dir.join(DESIGN_MATRIX_FILE);
    let persisted = persist_with_guard(&path, &mut frame, args.output.ack_new_df)?;
    info!(
        rows = data.x.len(),
        features = data.features.len(),
        path = %persisted.path.display(),
        outcome = ?persisted.outcome,
        "Design matrix ready"
    );
    Ok(())
}

fn run_returns(args: ReturnsArgs) -> Result<()> {
    let options = args.to_options()?;
    let store = CsvAssetStore::new(&args.output.data_dir);
    let registry = AssetRegistry::default();

    let returns = build_returns_matrix(&store, &registry, &args.assets, &options)?;
    summarize(&returns.diagnostics);

    let mut frame = returns_frame(&returns.matrix)?;
    let path = args.output.output_dir.join(RETURNS_MATRIX_FILE);
    let persisted = persist_with_guard(&path, &mut frame, args.output.ack_new_df)?;
    info!(
        rows = returns.matrix.len(),
        assets = args.assets.len(),
        path = %persisted.path.display(),
        outcome = ?persisted.outcome,
        "Returns matrix ready"
    );
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let output = cli.command.output();
    let log_file = if output.no_file_log {
        None
    } else {
        Some(output.output_dir.join("coinmatrix.log"))
    };

    init_tracing(log_file.clone())?;
    log_invocation(log_file.as_ref());

    match cli.command {
        Commands::Design(args) => run_design(args),
        Commands::Returns(args) => run_returns(args),
    }
}
