//! Layer 6: per-column quality metrics and the dataset-level score.

use std::{collections::BTreeMap, fmt};

use log::info;
use serde::{Deserialize, Serialize};

use crate::{
    data::Value,
    dataset::{Column, Dataset},
    report::{
        CleaningRecord, CleaningReport, ColumnQuality, DatasetStats, QualityLayerReport,
        QualityReport, TypingReport, round2,
    },
    typing::{self, SemanticType},
};

const COMPLETENESS_WEIGHT: f64 = 0.40;
const CONSISTENCY_WEIGHT: f64 = 0.30;
const VALIDITY_WEIGHT: f64 = 0.20;
const UNIQUENESS_WEIGHT: f64 = 0.10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityLevel {
    Excellent,
    Good,
    Fair,
    Poor,
    Critical,
}

impl QualityLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            QualityLevel::Excellent
        } else if score >= 80.0 {
            QualityLevel::Good
        } else if score >= 70.0 {
            QualityLevel::Fair
        } else if score >= 60.0 {
            QualityLevel::Poor
        } else {
            QualityLevel::Critical
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityLevel::Excellent => "excellent",
            QualityLevel::Good => "good",
            QualityLevel::Fair => "fair",
            QualityLevel::Poor => "poor",
            QualityLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for QualityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Weighted composite of the four column metrics, always within `[0, 100]`.
pub fn composite_score(completeness: f64, consistency: f64, validity: f64, uniqueness: f64) -> f64 {
    completeness * COMPLETENESS_WEIGHT
        + consistency * CONSISTENCY_WEIGHT
        + validity * VALIDITY_WEIGHT
        + uniqueness.min(100.0) * UNIQUENESS_WEIGHT
}

pub fn score(
    dataset: &Dataset,
    typing: &TypingReport,
    cleaning: &CleaningReport,
) -> QualityLayerReport {
    info!("Layer 6: assessing quality for {} column(s)", dataset.column_count());
    let mut columns = BTreeMap::new();
    let mut scores = Vec::with_capacity(dataset.column_count());

    for column in &dataset.columns {
        let semantic = typing
            .type_info
            .get(&column.name)
            .map(|info| info.detected_type)
            .unwrap_or(SemanticType::String);
        let metrics = column_quality(column, semantic, cleaning.cleaning_report.get(&column.name));
        scores.push(metrics.quality_score);
        columns.insert(column.name.clone(), metrics);
    }

    let overall_score = if scores.is_empty() {
        0.0
    } else {
        round2(scores.iter().sum::<f64>() / scores.len() as f64)
    };
    let total_cells = dataset.total_cells();
    let complete_cells = dataset.non_null_cells();
    let dataset_stats = DatasetStats {
        total_rows: dataset.row_count(),
        total_columns: dataset.column_count(),
        total_cells,
        missing_cells: total_cells - complete_cells,
        complete_cells,
        completeness_percent: percent(complete_cells, total_cells, 0.0),
    };

    let quality_report = QualityReport {
        overall_score,
        overall_level: QualityLevel::from_score(overall_score),
        columns,
        dataset_stats,
    };
    info!(
        "Layer 6 complete: overall quality score {} ({})",
        quality_report.overall_score, quality_report.overall_level
    );
    QualityLayerReport { quality_report }
}

pub fn column_quality(
    column: &Column,
    semantic: SemanticType,
    cleaning: Option<&CleaningRecord>,
) -> ColumnQuality {
    let total = column.len();
    let non_null = column.non_null_count();
    let mut issues = Vec::new();

    let completeness = if total > 0 {
        non_null as f64 / total as f64 * 100.0
    } else {
        0.0
    };
    if completeness < 70.0 {
        issues.push(format!("Low completeness: {completeness:.1}%"));
    } else if completeness < 90.0 {
        issues.push(format!("Moderate completeness: {completeness:.1}%"));
    }

    let uniqueness = if non_null > 0 {
        column.distinct_count() as f64 / non_null as f64 * 100.0
    } else {
        0.0
    };

    let consistency = consistency(column, semantic);
    if consistency < 80.0 {
        issues.push(format!("Low consistency: {consistency:.1}%"));
    }

    let validity = validity(column, semantic);
    if validity < 90.0 {
        issues.push(format!("Validity issues: {validity:.1}%"));
    }

    if let Some(record) = cleaning {
        let imputed = percent(record.imputed_nulls, total, 0.0);
        if imputed > 10.0 {
            issues.push(format!("{imputed:.1}% values imputed"));
        }
        let outliers = percent(record.outliers_handled, total, 0.0);
        if outliers > 5.0 {
            issues.push(format!("{outliers:.1}% outliers handled"));
        }
    }

    let score = composite_score(completeness, consistency, validity, uniqueness);
    ColumnQuality {
        completeness: round2(completeness),
        uniqueness: round2(uniqueness),
        consistency: round2(consistency),
        validity: round2(validity),
        quality_score: round2(score),
        quality_level: QualityLevel::from_score(score),
        issues,
    }
}

/// Unrounded share of `part` in `whole`, or `empty` when `whole` is zero.
fn percent(part: usize, whole: usize, empty: f64) -> f64 {
    if whole == 0 {
        empty
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

/// Share of values that match the format their type implies.
fn consistency(column: &Column, semantic: SemanticType) -> f64 {
    let matcher: fn(&str) -> bool = match semantic {
        SemanticType::Email => typing::is_email,
        SemanticType::Url => typing::is_url,
        _ => return 100.0,
    };
    let values = column.non_null().collect::<Vec<_>>();
    let matched = values
        .iter()
        .filter(|value| matcher(&value.as_display()))
        .count();
    percent(matched, values.len(), 100.0)
}

fn validity(column: &Column, semantic: SemanticType) -> f64 {
    let values = column.non_null().collect::<Vec<_>>();
    let valid = if semantic.is_numeric() {
        values
            .iter()
            .filter(|value| value.as_f64().is_some_and(f64::is_finite))
            .count()
    } else if semantic == SemanticType::Boolean {
        values
            .iter()
            .filter(|value| matches!(value, Value::Boolean(_)))
            .count()
    } else {
        return 100.0;
    };
    percent(valid, values.len(), 100.0)
}
