//! Layer 7: persists the cleaned table and its preview as snappy-compressed
//! parquet and summarizes every column.
//!
//! Files are staged next to their final location and only moved into place
//! by the orchestrator once the whole run has succeeded. The same parquet
//! codec backs the raw archive written during ingestion and the readers used
//! by `load_clean`/`load_preview`.

use std::{
    collections::BTreeMap,
    fs::File,
    path::{Path, PathBuf},
    sync::Arc,
};

use arrow::{
    array::{
        Array, ArrayRef, ArrowPrimitiveType, BooleanArray, Date32Array, Float64Array, Int64Array,
        PrimitiveArray, StringArray, TimestampMicrosecondArray,
    },
    compute::concat_batches,
    datatypes::{
        DataType, Date32Type, Field, Float64Type, Int64Type, Schema, TimeUnit,
        TimestampMicrosecondType,
    },
    record_batch::{RecordBatch, RecordBatchOptions, RecordBatchReader},
};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta};
use log::info;
use parquet::{
    arrow::{ArrowWriter, arrow_reader::ParquetRecordBatchReaderBuilder},
    basic::Compression,
    file::properties::WriterProperties,
};

use crate::{
    config::PipelineConfig,
    data::Value,
    dataset::{Cell, Column, Dataset},
    error::{PipelineError, Result},
    io_utils::StagedFile,
    report::{ColumnStats, StorageInfo, StorageReport, round2},
    stats,
};

pub const COMPRESSION: &str = "snappy";
pub const FORMAT: &str = "parquet";
const EXTENSION: &str = "parquet";

pub fn raw_path(config: &PipelineConfig, fingerprint: &str) -> PathBuf {
    config.raw_dir().join(format!("{fingerprint}.{EXTENSION}"))
}

pub fn clean_path(config: &PipelineConfig, source_id: &str) -> PathBuf {
    config.clean_dir().join(format!("{source_id}.{EXTENSION}"))
}

pub fn preview_path(config: &PipelineConfig, source_id: &str) -> PathBuf {
    config.preview_dir().join(format!("{source_id}.{EXTENSION}"))
}

/// Staged artifacts produced by [`store`], committed by the orchestrator.
#[derive(Debug)]
pub struct StoredArtifacts {
    pub clean: StagedFile,
    pub preview: StagedFile,
}

impl StoredArtifacts {
    pub fn into_files(self) -> [StagedFile; 2] {
        [self.clean, self.preview]
    }
}

pub fn store(
    dataset: &Dataset,
    source_id: &str,
    config: &PipelineConfig,
    run_id: &str,
    original_file_size: Option<u64>,
) -> Result<(StorageReport, StoredArtifacts)> {
    info!(
        "Layer 7: storing {} row(s), {} column(s)",
        dataset.row_count(),
        dataset.column_count()
    );
    let clean_target = clean_path(config, source_id);
    let clean = stage_parquet(dataset, &clean_target, run_id)?;
    let preview_rows = config.preview_rows.min(dataset.row_count());
    let preview_target = preview_path(config, source_id);
    let preview = match stage_parquet(&dataset.head(preview_rows), &preview_target, run_id) {
        Ok(staged) => staged,
        Err(err) => {
            clean.discard();
            return Err(err);
        }
    };

    let (parquet_size, preview_size) = match staged_sizes(&clean, &preview) {
        Ok(sizes) => sizes,
        Err(err) => {
            clean.discard();
            preview.discard();
            return Err(err);
        }
    };

    let compression_ratio_percent = original_file_size
        .filter(|size| *size > 0)
        .map(|size| round2((1.0 - parquet_size as f64 / size as f64) * 100.0));

    let report = StorageReport {
        storage: StorageInfo {
            parquet_path: clean_target.display().to_string(),
            parquet_size_bytes: parquet_size,
            preview_path: preview_target.display().to_string(),
            preview_size_bytes: preview_size,
            preview_rows,
            compression: COMPRESSION.to_string(),
            format: FORMAT.to_string(),
            compression_ratio_percent,
        },
        column_stats: column_stats(dataset),
    };
    info!(
        "Layer 7 complete: {} byte(s) staged for {:?} (compression {:.1}%)",
        parquet_size,
        clean_target,
        compression_ratio_percent.unwrap_or(0.0)
    );
    Ok((report, StoredArtifacts { clean, preview }))
}

fn staged_sizes(clean: &StagedFile, preview: &StagedFile) -> Result<(u64, u64)> {
    Ok((clean.size()?, preview.size()?))
}

/// Writes `dataset` as parquet into a staged sibling of `target`.
pub fn stage_parquet(dataset: &Dataset, target: &Path, run_id: &str) -> Result<StagedFile> {
    let (staged, file) = StagedFile::create(target, run_id)?;
    match write_parquet(dataset, file) {
        Ok(()) => Ok(staged),
        Err(err) => {
            staged.discard();
            Err(PipelineError::storage(format!(
                "Writing parquet to {target:?}: {err}"
            )))
        }
    }
}

pub fn write_parquet(dataset: &Dataset, file: File) -> parquet::errors::Result<()> {
    let batch = dataset_to_batch(dataset)?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

pub fn read_parquet(path: &Path) -> parquet::errors::Result<Dataset> {
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    let schema = reader.schema();
    let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
    let batch = concat_batches(&schema, &batches)?;
    Ok(batch_to_dataset(&batch))
}

pub fn load_clean(config: &PipelineConfig, source_id: &str) -> Result<Dataset> {
    load_artifact(&clean_path(config, source_id), "Processed data", source_id)
}

pub fn load_preview(config: &PipelineConfig, source_id: &str) -> Result<Dataset> {
    load_artifact(&preview_path(config, source_id), "Preview data", source_id)
}

fn load_artifact(path: &Path, label: &str, source_id: &str) -> Result<Dataset> {
    if !path.exists() {
        return Err(PipelineError::storage(format!(
            "{label} not found for source {source_id}"
        )));
    }
    read_parquet(path)
        .map_err(|err| PipelineError::storage(format!("Reading parquet from {path:?}: {err}")))
}

pub fn column_stats(dataset: &Dataset) -> BTreeMap<String, ColumnStats> {
    dataset
        .columns
        .iter()
        .map(|column| {
            let dtype = column.representation();
            let numbers = if matches!(dtype, "int64" | "float64") {
                column.non_null().filter_map(Value::as_f64).collect::<Vec<_>>()
            } else {
                Vec::new()
            };
            let summary = stats::NumericSummary::from_values(&numbers);
            (
                column.name.clone(),
                ColumnStats {
                    dtype: dtype.to_string(),
                    non_null_count: column.non_null_count(),
                    null_count: column.null_count(),
                    unique_count: column.distinct_count(),
                    min: summary.as_ref().map(|s| s.min),
                    max: summary.as_ref().map(|s| s.max),
                    mean: summary.as_ref().map(|s| s.mean),
                    median: summary.as_ref().map(|s| s.median),
                },
            )
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArrowKind {
    Int,
    Float,
    Bool,
    Date,
    Timestamp,
    Utf8,
}

fn arrow_kind(column: &Column) -> ArrowKind {
    match column.representation() {
        "int64" => ArrowKind::Int,
        "float64" => ArrowKind::Float,
        "bool" => ArrowKind::Bool,
        "date" => ArrowKind::Date,
        "datetime" => ArrowKind::Timestamp,
        "mixed" if column.non_null().all(|v| v.as_f64().is_some()) => ArrowKind::Float,
        "mixed"
            if column
                .non_null()
                .all(|v| matches!(v, Value::Date(_) | Value::DateTime(_))) =>
        {
            ArrowKind::Timestamp
        }
        _ => ArrowKind::Utf8,
    }
}

fn unix_epoch() -> NaiveDate {
    DateTime::UNIX_EPOCH.date_naive()
}

fn column_to_array(column: &Column, kind: ArrowKind) -> ArrayRef {
    match kind {
        ArrowKind::Int => Arc::new(Int64Array::from(
            column
                .values
                .iter()
                .map(|cell| match cell {
                    Some(Value::Integer(i)) => Some(*i),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        ArrowKind::Float => Arc::new(Float64Array::from(
            column
                .values
                .iter()
                .map(|cell| cell.as_ref().and_then(Value::as_f64))
                .collect::<Vec<_>>(),
        )),
        ArrowKind::Bool => Arc::new(BooleanArray::from(
            column
                .values
                .iter()
                .map(|cell| match cell {
                    Some(Value::Boolean(b)) => Some(*b),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        ArrowKind::Date => Arc::new(Date32Array::from(
            column
                .values
                .iter()
                .map(|cell| match cell {
                    Some(Value::Date(d)) => i32::try_from((*d - unix_epoch()).num_days()).ok(),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        ArrowKind::Timestamp => Arc::new(TimestampMicrosecondArray::from(
            column
                .values
                .iter()
                .map(|cell| match cell {
                    Some(Value::DateTime(dt)) => Some(dt.and_utc().timestamp_micros()),
                    Some(Value::Date(d)) => {
                        Some(d.and_time(NaiveTime::MIN).and_utc().timestamp_micros())
                    }
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        ArrowKind::Utf8 => Arc::new(StringArray::from(
            column
                .values
                .iter()
                .map(|cell| cell.as_ref().map(Value::as_display))
                .collect::<Vec<_>>(),
        )),
    }
}

fn arrow_type(kind: ArrowKind) -> DataType {
    match kind {
        ArrowKind::Int => DataType::Int64,
        ArrowKind::Float => DataType::Float64,
        ArrowKind::Bool => DataType::Boolean,
        ArrowKind::Date => DataType::Date32,
        ArrowKind::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, None),
        ArrowKind::Utf8 => DataType::Utf8,
    }
}

pub fn dataset_to_batch(dataset: &Dataset) -> arrow::error::Result<RecordBatch> {
    let mut fields = Vec::with_capacity(dataset.column_count());
    let mut arrays = Vec::with_capacity(dataset.column_count());
    for column in &dataset.columns {
        let kind = arrow_kind(column);
        fields.push(Field::new(column.name.clone(), arrow_type(kind), true));
        arrays.push(column_to_array(column, kind));
    }
    let options = RecordBatchOptions::new().with_row_count(Some(dataset.row_count()));
    RecordBatch::try_new_with_options(Arc::new(Schema::new(fields)), arrays, &options)
}

pub fn batch_to_dataset(batch: &RecordBatch) -> Dataset {
    let schema = batch.schema();
    Dataset::new(
        schema
            .fields()
            .iter()
            .zip(batch.columns())
            .map(|(field, array)| Column::new(field.name().clone(), array_to_cells(array.as_ref())))
            .collect(),
    )
}

fn cast_primitive<T: ArrowPrimitiveType>(
    array: &dyn Array,
    target: &DataType,
) -> Option<PrimitiveArray<T>> {
    arrow::compute::cast(array, target)
        .ok()
        .and_then(|cast| cast.as_any().downcast_ref::<PrimitiveArray<T>>().cloned())
}

fn array_to_cells(array: &dyn Array) -> Vec<Cell> {
    let len = array.len();
    match array.data_type() {
        DataType::Null => vec![None; len],
        DataType::Boolean => match array.as_any().downcast_ref::<BooleanArray>() {
            Some(bools) => bools.iter().map(|b| b.map(Value::Boolean)).collect(),
            None => vec![None; len],
        },
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => match cast_primitive::<Int64Type>(array, &DataType::Int64) {
            Some(ints) => ints.iter().map(|i| i.map(Value::Integer)).collect(),
            None => vec![None; len],
        },
        DataType::Float16
        | DataType::Float32
        | DataType::Float64
        | DataType::Decimal128(_, _)
        | DataType::Decimal256(_, _) => {
            match cast_primitive::<Float64Type>(array, &DataType::Float64) {
                Some(floats) => floats
                    .iter()
                    .map(|f| f.filter(|f| !f.is_nan()).map(Value::Float))
                    .collect(),
                None => vec![None; len],
            }
        }
        DataType::Date32 | DataType::Date64 => {
            match cast_primitive::<Date32Type>(array, &DataType::Date32) {
                Some(days) => days
                    .iter()
                    .map(|d| {
                        d.and_then(|d| unix_epoch().checked_add_signed(TimeDelta::days(d.into())))
                            .map(Value::Date)
                    })
                    .collect(),
                None => vec![None; len],
            }
        }
        DataType::Timestamp(_, _) => {
            let target = DataType::Timestamp(TimeUnit::Microsecond, None);
            match cast_primitive::<TimestampMicrosecondType>(array, &target) {
                Some(micros) => micros
                    .iter()
                    .map(|us| {
                        us.and_then(DateTime::from_timestamp_micros)
                            .map(|dt| Value::DateTime(dt.naive_utc()))
                    })
                    .collect(),
                None => vec![None; len],
            }
        }
        _ => string_cells(array),
    }
}

fn string_cells(array: &dyn Array) -> Vec<Cell> {
    let len = array.len();
    let Ok(cast) = arrow::compute::cast(array, &DataType::Utf8) else {
        return vec![None; len];
    };
    match cast.as_any().downcast_ref::<StringArray>() {
        Some(strings) => strings
            .iter()
            .map(|s| s.map(|s| Value::String(s.to_string())))
            .collect(),
        None => vec![None; len],
    }
}
