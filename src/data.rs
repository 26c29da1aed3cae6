//! Cell values and the fallible parsers behind type detection and casting.
//!
//! Every parser returns `Option`: `None` means "this text is not a value of
//! that kind" and is counted by the caller, never raised.

use std::{
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
    str::FromStr,
};

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

/// Explicit formats tried, in order, before the generic timestamp fallbacks.
pub const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%Y/%m/%d",
    "%b %d, %Y",
    "%B %d, %Y",
    "%d-%b-%Y",
    "%Y%m%d",
    "%m-%d-%Y",
    "%d.%m.%Y",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %I:%M %p",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%d-%b-%Y %H:%M:%S",
];

const LOOSE_DATE_FORMATS: &[&str] = &["%d %B %Y", "%d %b %Y", "%B %d %Y", "%b %d %Y"];

pub const TRUE_TOKENS: &[&str] = &["true", "t", "yes", "y", "1", "on", "enabled"];
pub const FALSE_TOKENS: &[&str] = &["false", "f", "no", "n", "0", "off", "disabled"];

const CURRENCY_MARKERS: &[&str] = &["$", "€", "£", "USD", "EUR", "GBP"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl Value {
    pub fn as_display(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => {
                if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
                    format!("{f:.0}")
                } else {
                    f.to_string()
                }
            }
            Value::Boolean(b) => b.to_string(),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }

    /// Representation tag used for `original_dtype`/`final_dtype`.
    pub fn representation(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Integer(_) => "int64",
            Value::Float(_) => "float64",
            Value::Boolean(_) => "bool",
            Value::Date(_) => "date",
            Value::DateTime(_) => "datetime",
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Value::String(_))
    }

    /// JSON form used for report sample values.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Integer(i) => serde_json::json!(*i as f64),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Date(d) => serde_json::Value::String(d.format("%Y-%m-%d").to_string()),
            Value::DateTime(dt) => {
                serde_json::Value::String(dt.format("%Y-%m-%dT%H:%M:%S").to_string())
            }
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Boolean(_) => 0,
            Value::Integer(_) => 1,
            Value::Float(_) => 2,
            Value::Date(_) => 3,
            Value::DateTime(_) => 4,
            Value::String(_) => 5,
        }
    }
}

// Total order: variants rank first so mixed columns still sort deterministically.
impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::DateTime(a), Value::DateTime(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Value::String(s) => s.hash(state),
            Value::Integer(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Boolean(b) => b.hash(state),
            Value::Date(d) => d.hash(state),
            Value::DateTime(dt) => dt.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

/// Parses plain numeric text. NaN is rejected since it would read back as null.
pub fn parse_numeric(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|parsed| !parsed.is_nan())
}

pub fn is_whole(value: f64) -> bool {
    value.is_finite() && value.fract() == 0.0
}

pub fn is_boolean_token(value: &str) -> bool {
    let lowered = value.trim().to_lowercase();
    TRUE_TOKENS.contains(&lowered.as_str()) || FALSE_TOKENS.contains(&lowered.as_str())
}

pub fn parse_boolean(value: &str) -> Option<bool> {
    let lowered = value.trim().to_lowercase();
    if TRUE_TOKENS.contains(&lowered.as_str()) {
        Some(true)
    } else if FALSE_TOKENS.contains(&lowered.as_str()) {
        Some(false)
    } else {
        None
    }
}

pub fn has_currency_marker(value: &str) -> bool {
    CURRENCY_MARKERS.iter().any(|marker| value.contains(marker))
}

/// Strips currency symbols/codes, thousands separators and spaces, then parses.
pub fn parse_currency(value: &str) -> Option<f64> {
    let mut cleaned = value.to_string();
    for marker in CURRENCY_MARKERS.iter().chain([",", " "].iter()) {
        cleaned = cleaned.replace(marker, "");
    }
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return None;
    }
    match Decimal::from_str(cleaned) {
        Ok(decimal) => decimal.to_f64(),
        Err(_) => parse_numeric(cleaned),
    }
}

/// Converts percentage text to a fraction.
///
/// Text carrying `%` is always divided by 100. Bare numbers inside `[0, 1]`
/// are taken as fractions already; any other bare number is treated as a
/// whole percentage. This is ambiguous for small whole percentages such as
/// `0.5` meaning half a percent.
pub fn parse_percentage(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    if trimmed.contains('%') {
        return parse_numeric(&trimmed.replace('%', "")).map(|parsed| parsed / 100.0);
    }
    parse_numeric(trimmed).map(fraction_from_number)
}

/// Bare numbers inside `[0, 1]` are already fractions; others are percents.
pub fn fraction_from_number(value: f64) -> f64 {
    if (0.0..=1.0).contains(&value) {
        value
    } else {
        value / 100.0
    }
}

/// Parses a calendar date or timestamp. Explicit date formats win; the
/// remaining formats and RFC 3339/2822 act as the generic fallback.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, fmt) {
            return Some(date.and_time(NaiveTime::MIN));
        }
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(parsed);
        }
    }
    for fmt in LOOSE_DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, fmt) {
            return Some(date.and_time(NaiveTime::MIN));
        }
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.naive_utc());
    }
    DateTime::parse_from_rfc2822(trimmed)
        .ok()
        .map(|parsed| parsed.naive_utc())
}
