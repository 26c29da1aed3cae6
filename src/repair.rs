//! Layer 2: structural repair.
//!
//! Merges a secondary header row into the column labels, drops rows and
//! columns holding no values, drops trailing summary rows and flags jagged
//! input. Nothing here fails; every finding becomes an issue string.

use itertools::Itertools;
use log::{info, warn};

use crate::{
    data::{self, Value},
    dataset::{Cell, Dataset},
    ingest,
    report::{ValidationReport, ValidationStats},
    stats::NumericAccumulator,
};

/// Keywords marking a total/summary row. English only.
pub const FOOTER_KEYWORDS: &[&str] = &[
    "total",
    "sum",
    "average",
    "summary",
    "grand total",
    "subtotal",
    "count",
];

const FOOTER_WINDOW: usize = 5;
const HEADER_FILL_RATIO: f64 = 0.8;
const HEADER_LABEL_RATIO: f64 = 0.7;
const LABEL_MAX_CHARS: usize = 50;
const ROW_LENGTH_VARIATION: f64 = 0.2;

pub fn repair(mut dataset: Dataset) -> (Dataset, ValidationReport) {
    info!(
        "Layer 2: validating structure of {} row(s), {} column(s)",
        dataset.row_count(),
        dataset.column_count()
    );
    let original_rows = dataset.row_count();
    let original_columns = dataset.column_count();
    let mut issues = Vec::new();

    if has_multi_header(&dataset) {
        merge_multi_header(&mut dataset);
        issues.push("Multi-header rows detected and merged".to_string());
    }

    let keep = (0..dataset.row_count())
        .map(|idx| dataset.row(idx).iter().any(Option::is_some))
        .collect::<Vec<_>>();
    let empty_rows = keep.iter().filter(|keep| !**keep).count();
    if empty_rows > 0 {
        dataset.retain_rows(&keep);
        issues.push(format!("Removed {empty_rows} empty rows"));
    }

    let before = dataset.column_count();
    dataset.columns.retain(|column| !column.is_all_null());
    let empty_columns = before - dataset.column_count();
    if empty_columns > 0 {
        issues.push(format!("Removed {empty_columns} empty columns"));
    }

    let footers = footer_rows(&dataset);
    if !footers.is_empty() {
        let keep = (0..dataset.row_count())
            .map(|idx| !footers.contains(&idx))
            .collect::<Vec<_>>();
        dataset.retain_rows(&keep);
        issues.push(format!("Removed {} footer/summary rows", footers.len()));
    }

    if has_inconsistent_rows(&dataset) {
        warn!("Row lengths vary by more than 20% of their mean");
        issues.push("Inconsistent row lengths detected; short rows padded with nulls".to_string());
    }

    let final_rows = dataset.row_count();
    let final_columns = dataset.column_count();
    let report = ValidationReport {
        issues,
        stats: ValidationStats {
            original_rows,
            original_columns,
            final_rows,
            final_columns,
            rows_removed: original_rows.saturating_sub(final_rows),
            columns_removed: original_columns.saturating_sub(final_columns),
        },
    };
    info!(
        "Layer 2 complete: {} issue(s), {} row(s), {} column(s)",
        report.issues.len(),
        final_rows,
        final_columns
    );
    (dataset, report)
}

/// A short text cell that does not read as a number.
fn is_label_like(cell: &Cell) -> bool {
    match cell {
        Some(Value::String(text)) => {
            text.chars().count() < LABEL_MAX_CHARS && data::parse_numeric(text).is_none()
        }
        _ => false,
    }
}

fn has_multi_header(dataset: &Dataset) -> bool {
    let width = dataset.column_count();
    if dataset.row_count() == 0 || width == 0 {
        return false;
    }
    let first = dataset
        .columns
        .iter()
        .map(|column| &column.values[0])
        .collect::<Vec<_>>();
    let filled = first.iter().filter(|cell| cell.is_some()).count() as f64 / width as f64;
    if filled < HEADER_FILL_RATIO {
        return false;
    }
    let labels = first.iter().filter(|cell| is_label_like(cell)).count() as f64 / width as f64;
    labels >= HEADER_LABEL_RATIO
}

fn merge_multi_header(dataset: &mut Dataset) {
    let merged = dataset
        .columns
        .iter()
        .map(|column| match &column.values[0] {
            Some(label) if !label.as_display().trim().is_empty() => {
                format!("{}_{}", column.name, label.as_display())
            }
            _ => column.name.clone(),
        })
        .collect::<Vec<_>>();
    for (column, name) in dataset
        .columns
        .iter_mut()
        .zip(ingest::finalize_headers(merged))
    {
        column.name = name;
        column.values.remove(0);
    }
}

/// Indices of rows in the trailing window whose text mentions a footer keyword.
fn footer_rows(dataset: &Dataset) -> Vec<usize> {
    let rows = dataset.row_count();
    (rows.saturating_sub(FOOTER_WINDOW)..rows)
        .filter(|idx| {
            let text = dataset
                .row(*idx)
                .into_iter()
                .flatten()
                .map(|value| value.as_display().to_lowercase())
                .join(" ");
            FOOTER_KEYWORDS.iter().any(|keyword| text.contains(keyword))
        })
        .collect()
}

fn has_inconsistent_rows(dataset: &Dataset) -> bool {
    if dataset.row_count() < 2 {
        return false;
    }
    let counts = (0..dataset.row_count())
        .map(|idx| dataset.row(idx).iter().filter(|cell| cell.is_some()).count() as f64)
        .collect::<Vec<_>>();
    let acc = NumericAccumulator::from_values(&counts);
    match (acc.mean(), acc.std_dev()) {
        (Some(mean), Some(std_dev)) => mean > 0.0 && std_dev > ROW_LENGTH_VARIATION * mean,
        _ => false,
    }
}
