//! Layer 5: imputation, outlier clipping, trimming and identifier dedup.

use std::collections::{BTreeMap, HashSet};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{
    data::Value,
    dataset::{Cell, Column, Dataset},
    report::{CleaningRecord, CleaningReport, TypingReport},
    stats::{self, NumericAccumulator},
    typing::SemanticType,
};

/// Column-name fragments that mark a column as an identifier.
pub const IDENTIFIER_MARKERS: &[&str] = &["id", "key", "code", "number", "identifier", "reference"];

/// Numeric columns with fewer distinct values than this impute with the mode.
const MODE_DISTINCT_LIMIT: usize = 10;
const SKEW_LIMIT: f64 = 1.0;
const MIN_OUTLIER_VALUES: usize = 4;
const IQR_FACTOR: f64 = 1.5;
const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImputationMethod {
    None,
    Mode,
    Median,
    Mean,
    DefaultFalse,
    ForwardFill,
    DefaultUnknown,
}

pub fn clean(mut dataset: Dataset, typing: &TypingReport) -> (Dataset, CleaningReport) {
    info!("Layer 5: cleaning {} column(s)", dataset.column_count());
    let mut cleaning_report = BTreeMap::new();

    for idx in 0..dataset.columns.len() {
        let column = &mut dataset.columns[idx];
        let semantic = typing
            .type_info
            .get(&column.name)
            .map(|info| info.detected_type)
            .unwrap_or(SemanticType::String);

        let original_nulls = column.null_count();
        let imputation_method = impute(column, semantic);
        let final_nulls = column.null_count();

        let outliers_handled = if semantic.is_numeric() {
            clip_outliers(column, semantic)
        } else {
            0
        };
        if semantic == SemanticType::String {
            trim_text(column);
        }

        let name = column.name.clone();
        let duplicates_removed = if is_identifier_column(&name) {
            let keep = first_occurrences(column);
            let before = dataset.row_count();
            dataset.retain_rows(&keep);
            before - dataset.row_count()
        } else {
            0
        };

        debug!(
            "Column '{name}': {imputation_method:?} imputation, {outliers_handled} outlier(s), {duplicates_removed} duplicate row(s)"
        );
        cleaning_report.insert(
            name,
            CleaningRecord {
                original_nulls,
                imputed_nulls: original_nulls - final_nulls,
                final_nulls,
                imputation_method,
                outliers_handled,
                duplicates_removed,
            },
        );
    }

    let total_imputed = cleaning_report.values().map(|r| r.imputed_nulls).sum();
    let total_outliers = cleaning_report.values().map(|r| r.outliers_handled).sum();
    info!("Layer 5 complete: imputed {total_imputed} value(s), handled {total_outliers} outlier(s)");
    (
        dataset,
        CleaningReport {
            cleaning_report,
            total_imputed,
            total_outliers,
        },
    )
}

pub fn is_identifier_column(name: &str) -> bool {
    let lowered = name.to_lowercase();
    IDENTIFIER_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

fn impute(column: &mut Column, semantic: SemanticType) -> ImputationMethod {
    if column.null_count() == 0 {
        return ImputationMethod::None;
    }
    match semantic {
        s if s.is_numeric() => impute_numeric(column, s),
        SemanticType::Boolean => match stats::mode(column.non_null()) {
            Some(mode) => {
                fill_nulls(column, &mode);
                ImputationMethod::Mode
            }
            None => {
                fill_nulls(column, &Value::Boolean(false));
                ImputationMethod::DefaultFalse
            }
        },
        s if s.is_temporal() => {
            if column.is_all_null() {
                ImputationMethod::None
            } else {
                forward_then_backward_fill(&mut column.values);
                ImputationMethod::ForwardFill
            }
        }
        _ => match stats::mode(column.non_null()) {
            Some(mode) => {
                fill_nulls(column, &mode);
                ImputationMethod::Mode
            }
            None => {
                fill_nulls(column, &Value::String(UNKNOWN.to_string()));
                ImputationMethod::DefaultUnknown
            }
        },
    }
}

fn impute_numeric(column: &mut Column, semantic: SemanticType) -> ImputationMethod {
    let numbers = column.non_null().filter_map(Value::as_f64).collect::<Vec<_>>();
    if numbers.is_empty() {
        return ImputationMethod::None;
    }
    if column.distinct_count() < MODE_DISTINCT_LIMIT {
        if let Some(mode) = stats::mode(column.non_null()) {
            fill_nulls(column, &mode);
            return ImputationMethod::Mode;
        }
        return ImputationMethod::None;
    }

    let acc = NumericAccumulator::from_values(&numbers);
    let (fill, method) = match acc.skewness() {
        Some(skew) if skew.abs() > SKEW_LIMIT => (acc.median(), ImputationMethod::Median),
        _ => (acc.mean(), ImputationMethod::Mean),
    };
    match fill {
        Some(fill) => {
            fill_nulls(column, &numeric_cell(fill, semantic));
            method
        }
        None => ImputationMethod::None,
    }
}

/// Integer columns keep integer cells; the fill is rounded half away from zero.
fn numeric_cell(value: f64, semantic: SemanticType) -> Value {
    if semantic == SemanticType::Integer {
        Value::Integer(value.round() as i64)
    } else {
        Value::Float(value)
    }
}

fn fill_nulls(column: &mut Column, fill: &Value) {
    for cell in column.values.iter_mut().filter(|cell| cell.is_none()) {
        *cell = Some(fill.clone());
    }
}

fn forward_then_backward_fill(values: &mut [Cell]) {
    let mut last: Option<Value> = None;
    for cell in values.iter_mut() {
        match cell {
            Some(value) => last = Some(value.clone()),
            None => *cell = last.clone(),
        }
    }
    let mut next: Option<Value> = None;
    for cell in values.iter_mut().rev() {
        match cell {
            Some(value) => next = Some(value.clone()),
            None => *cell = next.clone(),
        }
    }
}

/// Clips values outside `[Q1 - 1.5 IQR, Q3 + 1.5 IQR]` to the nearest bound
/// and returns how many were clipped.
fn clip_outliers(column: &mut Column, semantic: SemanticType) -> usize {
    let numbers = column.non_null().filter_map(Value::as_f64).collect::<Vec<_>>();
    if numbers.len() < MIN_OUTLIER_VALUES {
        return 0;
    }
    let acc = NumericAccumulator::from_values(&numbers);
    let (Some(q1), Some(q3)) = (acc.quantile(0.25), acc.quantile(0.75)) else {
        return 0;
    };
    let iqr = q3 - q1;
    let mut lower = q1 - IQR_FACTOR * iqr;
    let mut upper = q3 + IQR_FACTOR * iqr;
    if semantic == SemanticType::Integer {
        lower = lower.ceil();
        upper = upper.floor();
    }

    let mut clipped = 0;
    for value in column.values.iter_mut().flatten() {
        match value {
            Value::Integer(int) => {
                let current = *int as f64;
                if current < lower {
                    *int = lower as i64;
                    clipped += 1;
                } else if current > upper {
                    *int = upper as i64;
                    clipped += 1;
                }
            }
            Value::Float(float) if !float.is_nan() => {
                if *float < lower {
                    *float = lower;
                    clipped += 1;
                } else if *float > upper {
                    *float = upper;
                    clipped += 1;
                }
            }
            _ => {}
        }
    }
    clipped
}

fn trim_text(column: &mut Column) {
    for value in column.values.iter_mut().flatten() {
        if let Value::String(text) = value {
            let trimmed = text.trim();
            if trimmed.len() != text.len() {
                *text = trimmed.to_string();
            }
        }
    }
}

/// `true` for the first row holding each distinct cell; nulls compare equal.
fn first_occurrences(column: &Column) -> Vec<bool> {
    let mut seen: HashSet<&Cell> = HashSet::new();
    column.values.iter().map(|cell| seen.insert(cell)).collect()
}
