//! Raw cell values and typed field values.
//!
//! A sheet decoder hands over [`CellValue`]s: untyped scalars exactly as the
//! spreadsheet stored them. The sanitizer turns them into [`FieldValue`]s,
//! which is what the record store persists.

use std::{fmt, str::FromStr};

use anyhow::{Result, anyhow};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

/// Largest serial accepted as a spreadsheet date (9999-12-31).
const MAX_SERIAL_DATE: f64 = 2_958_465.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Empty,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl CellValue {
    pub fn from_text(raw: &str) -> Self {
        if raw.is_empty() {
            CellValue::Empty
        } else {
            CellValue::Text(raw.to_string())
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(text) => text.trim().is_empty(),
            CellValue::Number(number) => number.is_nan(),
            CellValue::Bool(_) => false,
        }
    }

    /// Trimmed textual rendering, `None` when the cell is blank.
    pub fn as_text(&self) -> Option<String> {
        match self {
            CellValue::Empty => None,
            CellValue::Text(text) => {
                let trimmed = text.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            CellValue::Number(number) if number.is_nan() => None,
            CellValue::Number(number) => Some(format_number(*number)),
            CellValue::Bool(flag) => Some(flag.to_string()),
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            CellValue::Number(number) => Decimal::from_f64(*number),
            CellValue::Text(text) => parse_decimal(text).ok(),
            CellValue::Empty | CellValue::Bool(_) => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            CellValue::Number(number) => serial_to_date(*number),
            CellValue::Text(text) => parse_naive_date(text.trim()).ok(),
            CellValue::Empty | CellValue::Bool(_) => None,
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::from_text(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

pub type RecordId = i64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Null,
    Text(String),
    Number(Decimal),
    Date(NaiveDate),
    Id(RecordId),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Normalized form used when comparing natural keys and unique values.
    pub fn as_key(&self) -> Option<String> {
        match self {
            FieldValue::Null => None,
            other => {
                let key = normalize_key(&other.to_string());
                (!key.is_empty()).then_some(key)
            }
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Null => serde_json::Value::Null,
            FieldValue::Text(text) => serde_json::Value::String(text.clone()),
            FieldValue::Number(number) => {
                serde_json::Number::from_str(&number.normalize().to_string())
                    .map(serde_json::Value::Number)
                    .unwrap_or_else(|_| serde_json::Value::String(number.to_string()))
            }
            FieldValue::Date(date) => serde_json::Value::String(date.format("%Y-%m-%d").to_string()),
            FieldValue::Id(id) => serde_json::Value::from(*id),
        }
    }

    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => FieldValue::Null,
            serde_json::Value::String(text) => FieldValue::Text(text.clone()),
            serde_json::Value::Bool(flag) => FieldValue::Text(flag.to_string()),
            serde_json::Value::Number(number) => match number.as_i64() {
                Some(integer) => FieldValue::Number(Decimal::from(integer)),
                None => Decimal::from_str(&number.to_string())
                    .or_else(|_| Decimal::from_scientific(&number.to_string()))
                    .map(FieldValue::Number)
                    .unwrap_or_else(|_| FieldValue::Text(number.to_string())),
            },
            other => FieldValue::Text(other.to_string()),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => Ok(()),
            FieldValue::Text(text) => write!(f, "{text}"),
            FieldValue::Number(number) => write!(f, "{}", number.normalize()),
            FieldValue::Date(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            FieldValue::Id(id) => write!(f, "{id}"),
        }
    }
}

pub fn normalize_key(value: &str) -> String {
    value.trim().to_lowercase()
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        (value as i64).to_string()
    } else {
        value.to_string()
    }
}

/// Parses a number written with either `.` or `,` as the decimal separator.
///
/// When both separators appear, the right-most one is the decimal mark. A lone
/// comma followed by exactly three digits is read as a thousands separator
/// (`1,234` is 1234) unless the integer part is zero. Repeated separators of
/// one kind are always grouping (`1.234.567`).
pub fn parse_decimal(value: &str) -> Result<Decimal> {
    let compact: String = value
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '_')
        .collect();
    let compact = compact.strip_prefix('+').unwrap_or(&compact);
    if compact.is_empty() || !compact.chars().any(|c| c.is_ascii_digit()) {
        return Err(anyhow!("Failed to parse '{value}' as number"));
    }
    let normalized = normalize_separators(compact);
    Decimal::from_str(&normalized)
        .or_else(|_| Decimal::from_scientific(&normalized))
        .map_err(|_| anyhow!("Failed to parse '{value}' as number"))
}

fn normalize_separators(token: &str) -> String {
    let commas = token.matches(',').count();
    let dots = token.matches('.').count();
    match (commas, dots) {
        (0, 0) | (0, 1) => token.to_string(),
        (0, _) => token.replace('.', ""),
        (1, 0) => {
            let (integer, fraction) = token.split_once(',').unwrap_or((token, ""));
            let zero_integer = matches!(integer.trim_start_matches('-'), "" | "0");
            if fraction.len() == 3 && !zero_integer {
                token.replace(',', "")
            } else {
                token.replace(',', ".")
            }
        }
        (_, 0) => token.replace(',', ""),
        _ => {
            let last_comma = token.rfind(',').unwrap_or(0);
            let last_dot = token.rfind('.').unwrap_or(0);
            if last_comma > last_dot {
                token.replace('.', "").replace(',', ".")
            } else {
                token.replace(',', "")
            }
        }
    }
}

pub fn parse_naive_date(value: &str) -> Result<NaiveDate> {
    const DATE_FORMATS: &[&str] = &[
        "%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d", "%d-%m-%Y", "%d.%m.%Y", "%m/%d/%Y",
    ];
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%d/%m/%Y %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ];
    for fmt in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, fmt) {
            return Ok(parsed.date());
        }
    }
    Err(anyhow!("Failed to parse '{value}' as date"))
}

/// Converts a spreadsheet serial day number (1900 date system) into a date.
pub fn serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !(1.0..=MAX_SERIAL_DATE).contains(&serial) {
        return None;
    }
    let days = serial.trunc().to_i64()?;
    NaiveDate::from_ymd_opt(1899, 12, 30)?.checked_add_signed(Duration::days(days))
}
