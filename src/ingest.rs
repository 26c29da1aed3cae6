//! Layer 1: reads a source into a [`Dataset`], fingerprints it and stages a
//! raw parquet archive keyed by that fingerprint.
//!
//! Delimited text is decoded with a sniffed encoding and split on the most
//! frequent delimiter of its first line. Every cell read from text stays a
//! string until type detection; spreadsheet, JSON and parquet sources keep
//! their native cell types.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    fs::{self, File},
    io::BufReader,
    path::Path,
    str::FromStr,
};

use calamine::{Data, Reader, open_workbook_auto};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    config::PipelineConfig,
    data::{self, Value},
    dataset::{Cell, Dataset},
    error::{PipelineError, Result},
    io_utils::{self, StagedFile},
    report::IngestionReport,
    storage,
};

/// Text treated as a missing value in delimited and spreadsheet cells.
pub const NULL_TOKENS: &[&str] = &[
    "", "NA", "N/A", "n/a", "NaN", "nan", "null", "NULL", "None", "#N/A", "<NA>", "-NaN",
];

const FINGERPRINT_SAMPLE_ROWS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Csv,
    Tsv,
    Excel,
    Json,
    Parquet,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Csv => "csv",
            SourceType::Tsv => "tsv",
            SourceType::Excel => "excel",
            SourceType::Json => "json",
            SourceType::Parquet => "parquet",
        }
    }

    pub fn variants() -> &'static [&'static str] {
        &["csv", "tsv", "excel", "json", "parquet"]
    }

    /// Source type implied by a file extension, if any.
    pub fn from_path(path: &Path) -> Option<Self> {
        match io_utils::file_extension(path)?.as_str() {
            "csv" | "txt" => Some(SourceType::Csv),
            "tsv" | "tab" => Some(SourceType::Tsv),
            "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => Some(SourceType::Excel),
            "json" => Some(SourceType::Json),
            "parquet" | "pq" => Some(SourceType::Parquet),
            _ => None,
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "csv" | "delimited" => Ok(SourceType::Csv),
            "tsv" | "tab-separated" => Ok(SourceType::Tsv),
            "excel" | "xlsx" | "spreadsheet" => Ok(SourceType::Excel),
            "json" => Ok(SourceType::Json),
            "parquet" | "columnar" => Ok(SourceType::Parquet),
            _ => Err(PipelineError::ingestion(format!(
                "Unsupported source type: {value}. Supported types: {}",
                SourceType::variants().join(", ")
            ))),
        }
    }
}

/// Worksheet selection for spreadsheet sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SheetSelector {
    Index(usize),
    Name(String),
}

impl Default for SheetSelector {
    fn default() -> Self {
        SheetSelector::Index(0)
    }
}

impl fmt::Display for SheetSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SheetSelector::Index(index) => write!(f, "{index}"),
            SheetSelector::Name(name) => f.write_str(name),
        }
    }
}

impl FromStr for SheetSelector {
    type Err = std::convert::Infallible;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = value.trim();
        Ok(match trimmed.parse::<usize>() {
            Ok(index) => SheetSelector::Index(index),
            Err(_) => SheetSelector::Name(trimmed.to_string()),
        })
    }
}

/// Output of the ingestion layer. The raw archive stays staged until the
/// orchestrator commits the run.
#[derive(Debug)]
pub struct Ingested {
    pub dataset: Dataset,
    pub report: IngestionReport,
    pub raw_archive: StagedFile,
}

pub fn ingest(
    path: &Path,
    source_type: SourceType,
    sheet: &SheetSelector,
    config: &PipelineConfig,
    run_id: &str,
) -> Result<Ingested> {
    info!("Layer 1: ingesting {source_type} from {path:?}");
    let metadata = fs::metadata(path)
        .map_err(|err| PipelineError::ingestion(format!("File not found: {path:?} ({err})")))?;
    if !metadata.is_file() {
        return Err(PipelineError::ingestion(format!("Not a file: {path:?}")));
    }
    let file_size = metadata.len();
    if file_size == 0 {
        return Err(PipelineError::ingestion(format!("File is empty: {path:?}")));
    }

    let mut encoding = None;
    let mut delimiter = None;
    let mut sheet_name = None;
    let dataset = match source_type {
        SourceType::Csv | SourceType::Tsv => {
            let fixed = (source_type == SourceType::Tsv).then_some(io_utils::DEFAULT_TSV_DELIMITER);
            let delimited = read_delimited(path, fixed, config)?;
            encoding = Some(delimited.encoding.to_string());
            delimiter = Some(io_utils::printable_delimiter(delimited.delimiter));
            delimited.dataset
        }
        SourceType::Excel => {
            let (dataset, name) = read_spreadsheet(path, sheet)?;
            sheet_name = Some(name);
            dataset
        }
        SourceType::Json => read_json(path)?,
        SourceType::Parquet => storage::read_parquet(path).map_err(|err| {
            PipelineError::ingestion(format!("Reading parquet from {path:?}: {err}"))
        })?,
    };

    let fingerprint = fingerprint(&dataset);
    let raw_target = storage::raw_path(config, &fingerprint);
    let raw_archive = storage::stage_parquet(&dataset, &raw_target, run_id)?;
    debug!("Raw archive staged at {:?}", raw_archive.temp_path());

    let report = IngestionReport {
        source_type: source_type.as_str().to_string(),
        row_count: dataset.row_count(),
        column_count: dataset.column_count(),
        file_size: Some(file_size),
        encoding,
        delimiter,
        fingerprint,
        raw_path: raw_target.display().to_string(),
        columns: dataset.column_names(),
        sheet_name,
    };
    info!(
        "Layer 1 complete: {} row(s), {} column(s)",
        report.row_count, report.column_count
    );
    Ok(Ingested {
        dataset,
        report,
        raw_archive,
    })
}

/// SHA-256 over the shape, the column labels and the first and last rows.
/// Identical content always yields the same fingerprint.
pub fn fingerprint(dataset: &Dataset) -> String {
    let rows = dataset.row_count();
    let mut hasher = Sha256::new();
    hasher.update(format!(
        "({rows}, {})_{:?}",
        dataset.column_count(),
        dataset.column_names()
    ));
    if rows > 0 {
        hasher.update(b"_");
        hasher.update(rows_json(&dataset.head(FINGERPRINT_SAMPLE_ROWS)));
    }
    if rows > FINGERPRINT_SAMPLE_ROWS {
        hasher.update(b"_");
        hasher.update(rows_json(&dataset.tail(FINGERPRINT_SAMPLE_ROWS)));
    }
    format!("{:x}", hasher.finalize())
}

fn rows_json(dataset: &Dataset) -> String {
    let rows = (0..dataset.row_count())
        .map(|idx| {
            serde_json::Value::Array(
                dataset
                    .row(idx)
                    .into_iter()
                    .map(|cell| cell.map(Value::to_json).unwrap_or(serde_json::Value::Null))
                    .collect(),
            )
        })
        .collect();
    serde_json::Value::Array(rows).to_string()
}

struct Delimited {
    dataset: Dataset,
    encoding: &'static str,
    delimiter: u8,
}

fn read_delimited(path: &Path, fixed: Option<u8>, config: &PipelineConfig) -> Result<Delimited> {
    let probe = io_utils::read_probe(path, config.encoding_probe_bytes)?;
    let sniffed = io_utils::sniff_encoding(&probe);
    let text = io_utils::read_decoded(path, sniffed.encoding)?;
    let delimiter = fixed
        .unwrap_or_else(|| io_utils::detect_delimiter(text.lines().next().unwrap_or_default()));
    debug!(
        "Reading {path:?} as {} with delimiter '{}'",
        sniffed.label,
        io_utils::printable_delimiter(delimiter)
    );

    let mut reader = io_utils::open_csv_reader(text.as_bytes(), delimiter);
    let mut records = reader.records();
    let header = match records.next() {
        Some(record) => record
            .map_err(|err| PipelineError::ingestion(format!("Reading header of {path:?}: {err}")))?,
        None => {
            return Err(PipelineError::ingestion(format!(
                "No columns to parse from file {path:?}"
            )));
        }
    };
    let mut headers = header.iter().map(str::to_string).collect::<Vec<_>>();
    let mut rows = Vec::new();
    for (idx, record) in records.enumerate() {
        let record = record.map_err(|err| {
            PipelineError::ingestion(format!("Reading row {} of {path:?}: {err}", idx + 2))
        })?;
        rows.push(record.iter().map(text_cell).collect::<Vec<_>>());
    }
    extend_headers(&mut headers, rows.iter().map(Vec::len).max().unwrap_or(0));

    Ok(Delimited {
        dataset: Dataset::from_rows(finalize_headers(headers), rows),
        encoding: sniffed.label,
        delimiter,
    })
}

fn text_cell(raw: &str) -> Cell {
    if NULL_TOKENS.contains(&raw) {
        None
    } else {
        Some(Value::String(raw.to_string()))
    }
}

fn extend_headers(headers: &mut Vec<String>, width: usize) {
    while headers.len() < width {
        headers.push(String::new());
    }
}

/// Names blank labels `Unnamed: <i>` and suffixes repeats with `.1`, `.2`, ...
pub(crate) fn finalize_headers(headers: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut repeats: HashMap<String, usize> = HashMap::new();
    headers
        .into_iter()
        .enumerate()
        .map(|(idx, header)| {
            let base = if header.trim().is_empty() {
                format!("Unnamed: {idx}")
            } else {
                header
            };
            if seen.insert(base.clone()) {
                return base;
            }
            let counter = repeats.entry(base.clone()).or_insert(0);
            loop {
                *counter += 1;
                let candidate = format!("{base}.{counter}");
                if seen.insert(candidate.clone()) {
                    return candidate;
                }
            }
        })
        .collect()
}

fn read_spreadsheet(path: &Path, sheet: &SheetSelector) -> Result<(Dataset, String)> {
    let mut workbook = open_workbook_auto(path)
        .map_err(|err| PipelineError::ingestion(format!("Opening workbook {path:?}: {err}")))?;
    let names = workbook.sheet_names();
    let name = match sheet {
        SheetSelector::Index(index) => names.get(*index).cloned().ok_or_else(|| {
            PipelineError::ingestion(format!(
                "Worksheet index {index} out of range; workbook has {} sheet(s)",
                names.len()
            ))
        })?,
        SheetSelector::Name(name) => {
            if names.iter().any(|candidate| candidate == name) {
                name.clone()
            } else {
                return Err(PipelineError::ingestion(format!(
                    "Worksheet named '{name}' not found"
                )));
            }
        }
    };
    let range = workbook
        .worksheet_range(&name)
        .map_err(|err| PipelineError::ingestion(format!("Reading worksheet '{name}': {err}")))?;

    let mut rows = range.rows();
    let mut headers = rows
        .next()
        .map(|row| row.iter().map(|cell| cell.to_string()).collect::<Vec<_>>())
        .unwrap_or_default();
    let cells = rows
        .map(|row| row.iter().map(spreadsheet_cell).collect::<Vec<_>>())
        .collect::<Vec<_>>();
    extend_headers(&mut headers, cells.iter().map(Vec::len).max().unwrap_or(0));
    Ok((Dataset::from_rows(finalize_headers(headers), cells), name))
}

fn spreadsheet_cell(cell: &Data) -> Cell {
    match cell {
        Data::Empty | Data::Error(_) => None,
        Data::String(text) => text_cell(text),
        Data::Int(value) => Some(Value::Integer(*value)),
        Data::Float(value) => {
            if data::is_whole(*value) && value.abs() < 9.0e15 {
                Some(Value::Integer(*value as i64))
            } else {
                Some(Value::Float(*value))
            }
        }
        Data::Bool(value) => Some(Value::Boolean(*value)),
        Data::DateTime(value) => value.as_datetime().map(Value::DateTime),
        Data::DateTimeIso(text) => Some(
            data::parse_timestamp(text)
                .map(Value::DateTime)
                .unwrap_or_else(|| Value::String(text.clone())),
        ),
        Data::DurationIso(text) => Some(Value::String(text.clone())),
    }
}

fn read_json(path: &Path) -> Result<Dataset> {
    let file = File::open(path)
        .map_err(|err| PipelineError::ingestion(format!("Opening input file {path:?}: {err}")))?;
    let document: serde_json::Value = serde_json::from_reader(BufReader::new(file))
        .map_err(|err| PipelineError::ingestion(format!("Parsing JSON from {path:?}: {err}")))?;
    let records = json_records(document).ok_or_else(|| {
        PipelineError::ingestion(format!(
            "JSON in {path:?} must hold an array of records or an object"
        ))
    })?;

    let mut headers: Vec<String> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    for record in &records {
        for (key, _) in record {
            if !positions.contains_key(key) {
                positions.insert(key.clone(), headers.len());
                headers.push(key.clone());
            }
        }
    }
    let rows = records
        .into_iter()
        .map(|record| {
            let mut row: Vec<Cell> = vec![None; headers.len()];
            for (key, value) in record {
                if let Some(position) = positions.get(&key) {
                    row[*position] = json_cell(value);
                }
            }
            row
        })
        .collect();
    Ok(Dataset::from_rows(headers, rows))
}

type JsonRecord = Vec<(String, serde_json::Value)>;

/// Normalizes a JSON document into flat records.
///
/// - an array yields one record per element (scalars land in `value`);
/// - an object holding an array of objects yields one record per element,
///   with the object's remaining scalar fields repeated on every record;
/// - any other object yields a single record.
fn json_records(document: serde_json::Value) -> Option<Vec<JsonRecord>> {
    match document {
        serde_json::Value::Array(items) => Some(items.into_iter().map(item_record).collect()),
        serde_json::Value::Object(map) => {
            let record_key = map
                .iter()
                .find(|(_, value)| {
                    value
                        .as_array()
                        .is_some_and(|items| !items.is_empty() && items.iter().all(|i| i.is_object()))
                })
                .map(|(key, _)| key.clone());
            let Some(record_key) = record_key else {
                let mut record = Vec::new();
                flatten_into("", serde_json::Value::Object(map), &mut record);
                return Some(vec![record]);
            };
            let mut meta = Vec::new();
            let mut items = Vec::new();
            for (key, value) in map {
                if key == record_key {
                    if let serde_json::Value::Array(values) = value {
                        items = values;
                    }
                } else if !value.is_array() {
                    flatten_into(&key, value, &mut meta);
                }
            }
            Some(
                items
                    .into_iter()
                    .map(|item| {
                        let mut record = item_record(item);
                        for (key, value) in &meta {
                            if !record.iter().any(|(existing, _)| existing == key) {
                                record.push((key.clone(), value.clone()));
                            }
                        }
                        record
                    })
                    .collect(),
            )
        }
        _ => None,
    }
}

fn item_record(item: serde_json::Value) -> JsonRecord {
    let mut record = Vec::new();
    match item {
        serde_json::Value::Object(_) => flatten_into("", item, &mut record),
        other => record.push(("value".to_string(), other)),
    }
    record
}

fn flatten_into(prefix: &str, value: serde_json::Value, out: &mut JsonRecord) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, nested) in map {
                let name = if prefix.is_empty() {
                    key
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_into(&name, nested, out);
            }
        }
        other => out.push((prefix.to_string(), other)),
    }
}

fn json_cell(value: serde_json::Value) -> Cell {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::Bool(b) => Some(Value::Boolean(b)),
        serde_json::Value::Number(number) => match number.as_i64() {
            Some(int) => Some(Value::Integer(int)),
            None => number.as_f64().map(Value::Float),
        },
        serde_json::Value::String(text) => Some(Value::String(text)),
        nested @ (serde_json::Value::Array(_) | serde_json::Value::Object(_)) => {
            Some(Value::String(nested.to_string()))
        }
    }
}
