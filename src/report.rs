//! Serializable record of a pipeline run.
//!
//! One struct per layer, gathered under [`Layers`] inside the
//! [`PipelineReport`]. Per-column maps are ordered by column name so the JSON
//! form is stable across runs.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    cleaning::ImputationMethod, pipeline::PipelineState, quality::QualityLevel,
    typing::SemanticType,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionReport {
    pub source_type: String,
    pub row_count: usize,
    pub column_count: usize,
    pub file_size: Option<u64>,
    pub encoding: Option<String>,
    pub delimiter: Option<String>,
    pub fingerprint: String,
    pub raw_path: String,
    pub columns: Vec<String>,
    pub sheet_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationStats {
    pub original_rows: usize,
    pub original_columns: usize,
    pub final_rows: usize,
    pub final_columns: usize,
    pub rows_removed: usize,
    pub columns_removed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub issues: Vec<String>,
    pub stats: ValidationStats,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnTransformation {
    pub original: String,
    pub normalized: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizationReport {
    pub column_mapping: BTreeMap<String, String>,
    /// Only the labels whose normalized form differs from the original.
    pub transformations: Vec<ColumnTransformation>,
    pub transformation_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnTypeInfo {
    pub detected_type: SemanticType,
    pub original_dtype: String,
    pub final_dtype: String,
    pub conversion_success_rate: f64,
    pub failed_conversions: usize,
    pub sample_values: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypingReport {
    pub type_info: BTreeMap<String, ColumnTypeInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleaningRecord {
    pub original_nulls: usize,
    pub imputed_nulls: usize,
    pub final_nulls: usize,
    pub imputation_method: ImputationMethod,
    pub outliers_handled: usize,
    pub duplicates_removed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleaningReport {
    pub cleaning_report: BTreeMap<String, CleaningRecord>,
    pub total_imputed: usize,
    pub total_outliers: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnQuality {
    pub completeness: f64,
    pub uniqueness: f64,
    pub consistency: f64,
    pub validity: f64,
    pub quality_score: f64,
    pub quality_level: QualityLevel,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetStats {
    pub total_rows: usize,
    pub total_columns: usize,
    pub total_cells: usize,
    pub missing_cells: usize,
    pub complete_cells: usize,
    pub completeness_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub overall_score: f64,
    pub overall_level: QualityLevel,
    pub columns: BTreeMap<String, ColumnQuality>,
    pub dataset_stats: DatasetStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityLayerReport {
    pub quality_report: QualityReport,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageInfo {
    pub parquet_path: String,
    pub parquet_size_bytes: u64,
    pub preview_path: String,
    pub preview_size_bytes: u64,
    pub preview_rows: usize,
    pub compression: String,
    pub format: String,
    /// Present only when the size of the ingested file is known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression_ratio_percent: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnStats {
    pub dtype: String,
    pub non_null_count: usize,
    pub null_count: usize,
    pub unique_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub median: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageReport {
    pub storage: StorageInfo,
    pub column_stats: BTreeMap<String, ColumnStats>,
}

/// Outputs of the layers that finished; a failed run keeps what it reached.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Layers {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingestion: Option<IngestionReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalization: Option<NormalizationReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typing: Option<TypingReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleaning: Option<CleaningReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityLayerReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalStats {
    pub rows: usize,
    pub columns: usize,
    pub quality_score: f64,
    pub quality_level: QualityLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub source_id: String,
    pub source_type: String,
    pub file_path: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    /// Last state reached before the failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_stage: Option<PipelineState>,
    pub layers: Layers,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_stats: Option<FinalStats>,
}

impl PipelineReport {
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Rounds to two decimals, the precision every percentage in the report uses.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
