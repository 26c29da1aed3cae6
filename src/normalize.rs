//! Layer 3: rewrites column labels into unique, lowercase identifiers.

use std::collections::{BTreeMap, HashSet};

use log::{debug, info};

use crate::{
    dataset::Dataset,
    report::{ColumnTransformation, NormalizationReport},
};

const SEPARATORS: &[char] = &[' ', '/', '\\', '-', '.'];

const SYMBOL_NAMES: &[(char, &str)] = &[
    ('$', "dollars"),
    ('€', "euros"),
    ('£', "pounds"),
    ('%', "percent"),
    ('#', "number"),
    ('@', "at"),
    ('&', "and"),
    ('+', "plus"),
    ('=', "equals"),
];

pub const FALLBACK_NAME: &str = "unnamed_column";

pub fn normalize(mut dataset: Dataset) -> (Dataset, NormalizationReport) {
    info!("Layer 3: normalizing {} column name(s)", dataset.column_count());
    let mut assigned: HashSet<String> = HashSet::new();
    let mut column_mapping = BTreeMap::new();
    let mut transformations = Vec::new();

    for column in dataset.columns.iter_mut() {
        let mut normalized = normalize_name(&column.name);
        if assigned.contains(&normalized) {
            normalized = disambiguate(&normalized, &assigned);
        }
        assigned.insert(normalized.clone());
        if normalized != column.name {
            debug!("Column '{}' renamed to '{}'", column.name, normalized);
            transformations.push(ColumnTransformation {
                original: column.name.clone(),
                normalized: normalized.clone(),
            });
        }
        column_mapping.insert(column.name.clone(), normalized.clone());
        column.name = normalized;
    }

    let report = NormalizationReport {
        column_mapping,
        transformation_count: transformations.len(),
        transformations,
    };
    info!(
        "Layer 3 complete: {} column(s) renamed",
        report.transformation_count
    );
    (dataset, report)
}

/// Canonical form of a single label: lowercase word characters joined by
/// single underscores, never starting with a digit, never empty.
pub fn normalize_name(label: &str) -> String {
    let mut expanded = String::with_capacity(label.len());
    for ch in label.trim().to_lowercase().chars() {
        if SEPARATORS.contains(&ch) {
            expanded.push('_');
        } else if let Some((_, name)) = SYMBOL_NAMES.iter().find(|(symbol, _)| *symbol == ch) {
            expanded.push('_');
            expanded.push_str(name);
            expanded.push('_');
        } else if ch.is_alphanumeric() || ch == '_' {
            expanded.push(ch);
        }
    }

    let mut collapsed = String::with_capacity(expanded.len());
    for ch in expanded.chars() {
        if ch == '_' && collapsed.ends_with('_') {
            continue;
        }
        collapsed.push(ch);
    }
    let trimmed = collapsed.trim_matches('_');

    if trimmed.is_empty() {
        FALLBACK_NAME.to_string()
    } else if trimmed.starts_with(|c: char| c.is_numeric()) {
        format!("col_{trimmed}")
    } else {
        trimmed.to_string()
    }
}

fn disambiguate(base: &str, assigned: &HashSet<String>) -> String {
    let mut suffix = 1usize;
    loop {
        let candidate = format!("{base}_{suffix}");
        if !assigned.contains(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}
