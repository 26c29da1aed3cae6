use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::ingest::SheetSelector;

#[derive(Debug, Parser)]
#[command(author, version, about = "Refine raw tabular files into clean, scored parquet", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a file through every pipeline layer and store the cleaned table
    Process(ProcessArgs),
    /// Show the first rows of a stored source in a formatted table
    Preview(PreviewArgs),
    /// Summarize the columns of a stored source
    Stats(StatsArgs),
}

#[derive(Debug, Args)]
pub struct ProcessArgs {
    /// Input file to process
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Source type (csv, tsv, excel, json, parquet); inferred from the extension if omitted
    #[arg(short = 't', long = "source-type")]
    pub source_type: Option<String>,
    /// Identifier naming the stored artifacts (defaults to the input file stem)
    #[arg(long = "source-id")]
    pub source_id: Option<String>,
    /// Worksheet index or name for spreadsheet inputs
    #[arg(long, value_parser = parse_sheet)]
    pub sheet: Option<SheetSelector>,
    /// Storage root for raw, clean and preview artifacts
    #[arg(short = 's', long = "storage")]
    pub storage: Option<PathBuf>,
    /// YAML pipeline configuration
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,
    /// Also write the JSON report to this file
    #[arg(short = 'r', long = "report")]
    pub report: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct PreviewArgs {
    /// Identifier the source was processed under
    #[arg(long = "source-id")]
    pub source_id: String,
    /// Storage root holding the processed artifacts
    #[arg(short = 's', long = "storage")]
    pub storage: Option<PathBuf>,
    /// YAML pipeline configuration
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,
    /// Number of rows to display
    #[arg(long, default_value_t = 10)]
    pub rows: usize,
    /// Read the full cleaned table instead of the preview sample
    #[arg(long)]
    pub clean: bool,
}

#[derive(Debug, Args)]
pub struct StatsArgs {
    /// Identifier the source was processed under
    #[arg(long = "source-id")]
    pub source_id: String,
    /// Storage root holding the processed artifacts
    #[arg(short = 's', long = "storage")]
    pub storage: Option<PathBuf>,
    /// YAML pipeline configuration
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,
}

pub fn parse_sheet(value: &str) -> Result<SheetSelector, String> {
    if value.trim().is_empty() {
        return Err("Sheet cannot be empty".to_string());
    }
    value.parse().map_err(|err| format!("{err:?}"))
}
