//! Layer 4: semantic type detection and casting.
//!
//! Each column is sampled (seeded, capped), the candidate types are tried in a
//! fixed priority order and the first match wins. The winning
//! [`SemanticType`] then casts every cell of the column; cells it cannot parse
//! become nulls and are counted as failed conversions.

use std::{borrow::Cow, collections::BTreeMap, fmt, sync::OnceLock};

use log::{debug, info};
use rand::{SeedableRng, rngs::StdRng};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    config::PipelineConfig,
    data::{self, Value},
    dataset::{Column, Dataset},
    report::{ColumnTypeInfo, TypingReport, round2},
};

/// Number of leading sampled values inspected by the probe-based checks.
pub const PROBE_SIZE: usize = 10;
const SAMPLE_VALUE_COUNT: usize = 5;
const MAX_BOOLEAN_DISTINCT: usize = 5;
const NUMERIC_RATIO: f64 = 0.9;
const TEMPORAL_RATIO: f64 = 0.8;
const CURRENCY_RATIO: f64 = 0.8;
const PERCENT_RATIO: f64 = 0.5;
const PATTERN_RATIO: f64 = 0.8;

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[\w.-]+@[\w.-]+\.\w+$").expect("valid email pattern"))
}

fn url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^https?://").expect("valid url pattern"))
}

pub fn is_email(text: &str) -> bool {
    email_pattern().is_match(text)
}

pub fn is_url(text: &str) -> bool {
    url_pattern().is_match(text)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    Boolean,
    Integer,
    Currency,
    Percentage,
    Float,
    DateTime,
    Date,
    Email,
    Url,
    String,
}

impl SemanticType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SemanticType::Boolean => "boolean",
            SemanticType::Integer => "integer",
            SemanticType::Currency => "currency",
            SemanticType::Percentage => "percentage",
            SemanticType::Float => "float",
            SemanticType::DateTime => "datetime",
            SemanticType::Date => "date",
            SemanticType::Email => "email",
            SemanticType::Url => "url",
            SemanticType::String => "string",
        }
    }

    /// Types that receive numeric imputation, outlier clipping and
    /// finite-value validity.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            SemanticType::Integer
                | SemanticType::Float
                | SemanticType::Currency
                | SemanticType::Percentage
        )
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, SemanticType::Date | SemanticType::DateTime)
    }

    /// Picks the first matching type in priority order. `sample` holds the
    /// non-null values of a column.
    pub fn detect(sample: &[&Value]) -> SemanticType {
        if sample.is_empty() {
            return SemanticType::String;
        }
        let probe = &sample[..sample.len().min(PROBE_SIZE)];
        if looks_boolean(sample) {
            return SemanticType::Boolean;
        }
        let numbers = sample.iter().filter_map(|v| numeric_value(v)).collect::<Vec<_>>();
        let numeric_share = share(numbers.len(), sample.len());
        if numeric_share >= NUMERIC_RATIO && numbers.iter().all(|n| data::is_whole(*n)) {
            return SemanticType::Integer;
        }
        if looks_currency(probe) {
            return SemanticType::Currency;
        }
        let percent_marked = probe.iter().filter(|v| cell_text(v).contains('%')).count();
        if percent_marked as f64 >= probe.len() as f64 * PERCENT_RATIO {
            return SemanticType::Percentage;
        }
        if numeric_share >= NUMERIC_RATIO {
            return SemanticType::Float;
        }
        let stamps = sample.iter().filter_map(|v| timestamp_value(v)).collect::<Vec<_>>();
        if share(stamps.len(), sample.len()) >= TEMPORAL_RATIO {
            use chrono::Timelike;
            if stamps.iter().any(|ts| ts.hour() != 0 || ts.minute() != 0) {
                return SemanticType::DateTime;
            }
            return SemanticType::Date;
        }
        if matches_pattern(probe, is_email) {
            return SemanticType::Email;
        }
        if matches_pattern(probe, is_url) {
            return SemanticType::Url;
        }
        SemanticType::String
    }

    /// Casts a single value; `None` marks a failed conversion.
    pub fn cast(&self, value: &Value) -> Option<Value> {
        match self {
            SemanticType::Boolean => match value {
                Value::Boolean(b) => Some(Value::Boolean(*b)),
                other => data::parse_boolean(&cell_text(other)).map(Value::Boolean),
            },
            SemanticType::Integer => match value {
                Value::Integer(i) => Some(Value::Integer(*i)),
                other => numeric_value(other)
                    .filter(|n| data::is_whole(*n) && n.abs() < i64::MAX as f64)
                    .map(|n| Value::Integer(n as i64)),
            },
            SemanticType::Float => numeric_value(value).map(Value::Float),
            SemanticType::Currency => match value {
                Value::String(text) => data::parse_currency(text).map(Value::Float),
                other => other.as_f64().map(Value::Float),
            },
            SemanticType::Percentage => match value {
                Value::String(text) => data::parse_percentage(text).map(Value::Float),
                other => other
                    .as_f64()
                    .map(|n| Value::Float(data::fraction_from_number(n))),
            },
            SemanticType::DateTime => timestamp_value(value).map(Value::DateTime),
            SemanticType::Date => timestamp_value(value).map(|ts| Value::Date(ts.date())),
            SemanticType::Email | SemanticType::Url | SemanticType::String => {
                Some(Value::String(cell_text(value).into_owned()))
            }
        }
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn share(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64
    }
}

fn cell_text(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(text) => Cow::Borrowed(text.as_str()),
        other => Cow::Owned(other.as_display()),
    }
}

fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(i) => Some(*i as f64),
        Value::Float(f) if !f.is_nan() => Some(*f),
        Value::String(text) => data::parse_numeric(text),
        _ => None,
    }
}

fn timestamp_value(value: &Value) -> Option<chrono::NaiveDateTime> {
    match value {
        Value::DateTime(ts) => Some(*ts),
        Value::Date(date) => Some(date.and_time(chrono::NaiveTime::MIN)),
        Value::String(text) => data::parse_timestamp(text),
        _ => None,
    }
}

fn looks_boolean(sample: &[&Value]) -> bool {
    let mut distinct = std::collections::HashSet::new();
    for value in sample {
        let token = cell_text(value).trim().to_lowercase();
        if !data::is_boolean_token(&token) {
            return false;
        }
        distinct.insert(token);
        if distinct.len() > MAX_BOOLEAN_DISTINCT {
            return false;
        }
    }
    !distinct.is_empty()
}

fn looks_currency(probe: &[&Value]) -> bool {
    if !probe.iter().any(|v| data::has_currency_marker(&cell_text(v))) {
        return false;
    }
    let parsed = probe
        .iter()
        .filter(|v| SemanticType::Currency.cast(v).is_some())
        .count();
    parsed as f64 >= probe.len() as f64 * CURRENCY_RATIO
}

fn matches_pattern(probe: &[&Value], matcher: fn(&str) -> bool) -> bool {
    let matched = probe.iter().filter(|v| matcher(&cell_text(v))).count();
    matched as f64 >= probe.len() as f64 * PATTERN_RATIO
}

/// Non-null values of `column`, capped at `size` by a seeded index sample
/// that keeps row order.
pub fn sample_values(column: &Column, size: usize, seed: u64) -> Vec<&Value> {
    let non_null = column.non_null().collect::<Vec<_>>();
    if non_null.len() <= size {
        return non_null;
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut picks = rand::seq::index::sample(&mut rng, non_null.len(), size).into_vec();
    picks.sort_unstable();
    picks.into_iter().map(|idx| non_null[idx]).collect()
}

pub fn detect_types(dataset: Dataset, config: &PipelineConfig) -> (Dataset, TypingReport) {
    info!("Layer 4: detecting types for {} column(s)", dataset.column_count());
    let mut type_info = BTreeMap::new();
    let mut columns = Vec::with_capacity(dataset.column_count());

    for column in dataset.columns {
        let sample = sample_values(&column, config.sample_size, config.sample_seed);
        let detected = SemanticType::detect(&sample);
        let (cast, info) = cast_column(&column, detected);
        debug!(
            "Column '{}' detected as {} ({}% converted)",
            column.name, detected, info.conversion_success_rate
        );
        type_info.insert(column.name.clone(), info);
        columns.push(cast);
    }

    info!("Layer 4 complete: types detected and cast");
    (Dataset::new(columns), TypingReport { type_info })
}

/// Applies `detected` to every cell and measures how many values survived.
pub fn cast_column(column: &Column, detected: SemanticType) -> (Column, ColumnTypeInfo) {
    let values = column
        .values
        .iter()
        .map(|cell| cell.as_ref().and_then(|value| detected.cast(value)))
        .collect::<Vec<_>>();
    let cast = Column::new(column.name.clone(), values);

    let original_nulls = column.null_count();
    let non_null_original = column.len() - original_nulls;
    let failed = cast.null_count().saturating_sub(original_nulls);
    let success_rate = if non_null_original > 0 {
        let succeeded = non_null_original as f64 - failed as f64;
        round2((succeeded / non_null_original as f64 * 100.0).max(0.0))
    } else {
        100.0
    };
    let sample_values = cast
        .non_null()
        .take(SAMPLE_VALUE_COUNT)
        .map(Value::to_json)
        .collect();

    let info = ColumnTypeInfo {
        detected_type: detected,
        original_dtype: column.representation().to_string(),
        final_dtype: cast.representation().to_string(),
        conversion_success_rate: success_rate,
        failed_conversions: failed,
        sample_values,
    };
    (cast, info)
}
