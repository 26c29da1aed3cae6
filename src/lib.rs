pub mod cleaning;
pub mod cli;
pub mod config;
pub mod data;
pub mod dataset;
pub mod error;
pub mod ingest;
pub mod io_utils;
pub mod normalize;
pub mod pipeline;
pub mod preview;
pub mod quality;
pub mod repair;
pub mod report;
pub mod stats;
pub mod storage;
pub mod table;
pub mod typing;

use std::{env, fs, path::Path, sync::OnceLock};

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use log::{LevelFilter, debug, info};

use crate::{
    cli::{Cli, Commands},
    config::PipelineConfig,
    ingest::SourceType,
    pipeline::{Pipeline, ProcessRequest},
    table::Align,
};

pub use crate::{
    error::PipelineError,
    pipeline::process_file,
    report::PipelineReport,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("table_refinery", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Process(args) => handle_process(&args),
        Commands::Preview(args) => preview::execute(&args),
        Commands::Stats(args) => handle_stats(&args),
    }
}

/// Loads the YAML configuration when given, then applies a storage override.
pub(crate) fn resolve_config(
    config: Option<&Path>,
    storage: Option<&Path>,
) -> Result<PipelineConfig> {
    let mut resolved = match config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Loading pipeline configuration from {path:?}"))?,
        None => PipelineConfig::default(),
    };
    if let Some(root) = storage {
        resolved = resolved.with_storage_root(root);
    }
    debug!("Pipeline configuration: {resolved:?}");
    Ok(resolved)
}

fn handle_process(args: &cli::ProcessArgs) -> Result<()> {
    let config = resolve_config(args.config.as_deref(), args.storage.as_deref())?;
    let source_type = match &args.source_type {
        Some(tag) => tag.clone(),
        None => SourceType::from_path(&args.input)
            .map(|kind| kind.to_string())
            .ok_or_else(|| {
                anyhow!(
                    "Cannot infer the source type of {:?}; pass --source-type ({})",
                    args.input,
                    SourceType::variants().join(", ")
                )
            })?,
    };
    let source_id = match &args.source_id {
        Some(id) => id.clone(),
        None => default_source_id(&args.input),
    };
    let mut request = ProcessRequest::new(&args.input, source_type, source_id);
    if let Some(sheet) = &args.sheet {
        request = request.with_sheet(sheet.clone());
    }

    let report = Pipeline::new(config).process(&request);
    let json = report
        .to_json_pretty()
        .context("Serializing pipeline report")?;
    if let Some(path) = &args.report {
        fs::write(path, &json).with_context(|| format!("Writing report to {path:?}"))?;
        info!("Report written to {path:?}");
    }
    println!("{json}");

    if !report.success {
        bail!(
            "Pipeline failed with {}: {}",
            report.error_type.as_deref().unwrap_or("error"),
            report.error.as_deref().unwrap_or("unknown failure")
        );
    }
    Ok(())
}

/// Normalized stem of the input file name.
fn default_source_id(input: &Path) -> String {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    normalize::normalize_name(&stem)
}

fn handle_stats(args: &cli::StatsArgs) -> Result<()> {
    let config = resolve_config(args.config.as_deref(), args.storage.as_deref())?;
    let dataset = storage::load_clean(&config, &args.source_id)
        .with_context(|| format!("Loading cleaned table for source '{}'", args.source_id))?;
    let stats = storage::column_stats(&dataset);

    let headers = [
        "column", "dtype", "non_null", "null", "unique", "min", "max", "mean", "median",
    ]
    .iter()
    .map(|h| h.to_string())
    .collect::<Vec<_>>();
    let format_number = |value: Option<f64>| value.map(|v| format!("{v:.4}")).unwrap_or_default();
    let rows = dataset
        .column_names()
        .into_iter()
        .filter_map(|name| {
            let summary = stats.get(&name)?;
            Some(vec![
                name,
                summary.dtype.clone(),
                summary.non_null_count.to_string(),
                summary.null_count.to_string(),
                summary.unique_count.to_string(),
                format_number(summary.min),
                format_number(summary.max),
                format_number(summary.mean),
                format_number(summary.median),
            ])
        })
        .collect::<Vec<_>>();
    let mut alignments = vec![Align::Left, Align::Left];
    alignments.extend(std::iter::repeat_n(Align::Right, 7));
    print!("{}", table::render_table(&headers, &rows, &alignments));
    info!(
        "Summarized {} column(s) across {} row(s) for source '{}'",
        rows.len(),
        dataset.row_count(),
        args.source_id
    );
    Ok(())
}
