use std::collections::HashSet;
use std::fmt;
use std::fmt::Write as _;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::row::{Datum, Row};
use super::schema::{FieldGetter, FieldType, Schema};
use crate::error::ConfigError;

/// 0001-01-01 to 1970-01-01 in days.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

const NULL_VALUE: &str = "null";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PartitionError {
    #[error("transform {transform} cannot be applied to {value} in partition field '{field}'")]
    UnsupportedValue {
        field: String,
        transform: Transform,
        value: String,
    },
    #[error("{value} is out of the representable date range in partition field '{field}'")]
    OutOfRange { field: String, value: String },
}

/// Computes the destination partition path of a row.
pub trait PartitionKeyCalculator: Send + Sync + fmt::Debug {
    fn partition(&self, row: &Row) -> Result<String, PartitionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transform {
    Identity,
    Year,
    Month,
    Day,
    Hour,
    Truncate(u32),
    Void,
}

impl Transform {
    pub fn can_transform(&self, field_type: &FieldType) -> bool {
        match self {
            Transform::Identity | Transform::Void => true,
            Transform::Year | Transform::Month | Transform::Day => {
                matches!(field_type, FieldType::Date | FieldType::Timestamp)
            }
            Transform::Hour => matches!(field_type, FieldType::Timestamp),
            Transform::Truncate(_) => matches!(
                field_type,
                FieldType::Int
                    | FieldType::Long
                    | FieldType::String
                    | FieldType::Binary
                    | FieldType::Decimal { .. }
            ),
        }
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transform::Identity => write!(f, "identity"),
            Transform::Year => write!(f, "year"),
            Transform::Month => write!(f, "month"),
            Transform::Day => write!(f, "day"),
            Transform::Hour => write!(f, "hour"),
            Transform::Truncate(w) => write!(f, "truncate[{}]", w),
            Transform::Void => write!(f, "void"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionField {
    pub source_id: i32,
    pub name: String,
    pub transform: Transform,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSpec {
    fields: Vec<PartitionField>,
}

impl PartitionSpec {
    pub fn unpartitioned() -> Self {
        Self::default()
    }

    pub fn builder() -> PartitionSpecBuilder {
        PartitionSpecBuilder::default()
    }

    pub fn fields(&self) -> &[PartitionField] {
        &self.fields
    }

    pub fn is_unpartitioned(&self) -> bool {
        self.fields.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct PartitionSpecBuilder {
    fields: Vec<PartitionField>,
}

impl PartitionSpecBuilder {
    pub fn add(mut self, source_id: i32, name: impl Into<String>, transform: Transform) -> Self {
        self.fields.push(PartitionField { source_id, name: name.into(), transform });
        self
    }

    pub fn identity(self, source_id: i32, name: impl Into<String>) -> Self {
        self.add(source_id, name, Transform::Identity)
    }

    pub fn build(self) -> PartitionSpec {
        PartitionSpec { fields: self.fields }
    }
}

#[derive(Debug, Clone)]
struct BoundPartitionField {
    name: String,
    transform: Transform,
    source_type: FieldType,
    getter: FieldGetter,
}

/// A partition spec bound to a row schema. Renders `name=value` segments joined by `/`.
#[derive(Debug, Clone)]
pub struct PartitionKey {
    spec: PartitionSpec,
    fields: Vec<BoundPartitionField>,
}

impl PartitionKey {
    pub fn new(spec: PartitionSpec, row_schema: &Schema) -> Result<Self, ConfigError> {
        let mut names = HashSet::new();
        let mut fields = Vec::with_capacity(spec.fields.len());
        for pf in &spec.fields {
            if !names.insert(pf.name.as_str()) {
                return Err(ConfigError::InvalidPartitionSpec(format!(
                    "duplicate partition field name '{}'",
                    pf.name
                )));
            }
            if let Transform::Truncate(0) = pf.transform {
                return Err(ConfigError::InvalidPartitionSpec(format!(
                    "truncate width must be positive for '{}'",
                    pf.name
                )));
            }
            let pos = row_schema.position_of(pf.source_id).ok_or_else(|| {
                ConfigError::InvalidPartitionSpec(format!(
                    "source field id {} of '{}' not in row schema",
                    pf.source_id, pf.name
                ))
            })?;
            let source_type = row_schema.fields()[pos].field_type;
            if !pf.transform.can_transform(&source_type) {
                return Err(ConfigError::InvalidPartitionSpec(format!(
                    "transform {} cannot be applied to {} field '{}'",
                    pf.transform, source_type, pf.name
                )));
            }
            if let (Transform::Truncate(width), FieldType::Int) = (pf.transform, source_type) {
                if i32::try_from(width).is_err() {
                    return Err(ConfigError::InvalidPartitionSpec(format!(
                        "truncate width {width} does not fit int field '{}'",
                        pf.name
                    )));
                }
            }
            fields.push(BoundPartitionField {
                name: pf.name.clone(),
                transform: pf.transform,
                source_type,
                getter: FieldGetter::new(pos, source_type),
            });
        }
        Ok(Self { spec, fields })
    }

    pub fn spec(&self) -> &PartitionSpec {
        &self.spec
    }

    fn render(&self, field: &BoundPartitionField, value: &Datum) -> Result<Option<String>, PartitionError> {
        let unsupported = || PartitionError::UnsupportedValue {
            field: field.name.clone(),
            transform: field.transform,
            value: format!("{:?}", value),
        };
        let out_of_range = || PartitionError::OutOfRange {
            field: field.name.clone(),
            value: format!("{:?}", value),
        };
        if value.is_null() {
            return Ok(None);
        }
        let rendered = match field.transform {
            Transform::Void => return Ok(None),
            Transform::Identity => identity_string(value, &field.source_type).ok_or_else(out_of_range)?,
            Transform::Year => {
                let ts = to_datetime(value).ok_or_else(unsupported)?.ok_or_else(out_of_range)?;
                format!("{:04}", ts.year())
            }
            Transform::Month => {
                let ts = to_datetime(value).ok_or_else(unsupported)?.ok_or_else(out_of_range)?;
                format!("{:04}-{:02}", ts.year(), ts.month())
            }
            Transform::Day => {
                let ts = to_datetime(value).ok_or_else(unsupported)?.ok_or_else(out_of_range)?;
                ts.format("%Y-%m-%d").to_string()
            }
            Transform::Hour => match value {
                Datum::Timestamp(micros) => {
                    let ts = timestamp_from_micros(*micros).ok_or_else(out_of_range)?;
                    format!("{}-{:02}", ts.format("%Y-%m-%d"), ts.hour())
                }
                _ => return Err(unsupported()),
            },
            Transform::Truncate(width) => truncate_string(value, width, &field.source_type)
                .ok_or_else(unsupported)?
                .ok_or_else(out_of_range)?,
        };
        Ok(Some(rendered))
    }
}

impl PartitionKeyCalculator for PartitionKey {
    fn partition(&self, row: &Row) -> Result<String, PartitionError> {
        let mut path = String::new();
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                path.push('/');
            }
            let value = field.getter.get_field_or_null(row);
            let rendered = self.render(field, &value)?;
            path.push_str(&escape_path_value(&field.name));
            path.push('=');
            path.push_str(&escape_path_value(rendered.as_deref().unwrap_or(NULL_VALUE)));
        }
        Ok(path)
    }
}

/// `Some(None)` means a supported value outside chrono's range.
fn to_datetime(value: &Datum) -> Option<Option<NaiveDateTime>> {
    match value {
        Datum::Date(days) => Some(date_from_days(*days).map(|d| d.and_time(chrono::NaiveTime::MIN))),
        Datum::Timestamp(micros) => Some(timestamp_from_micros(*micros)),
        _ => None,
    }
}

fn date_from_days(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days.checked_add(UNIX_EPOCH_DAYS_FROM_CE)?)
}

fn timestamp_from_micros(micros: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_micros(micros).map(|dt| dt.naive_utc())
}

fn identity_string(value: &Datum, source_type: &FieldType) -> Option<String> {
    let s = match value {
        Datum::Null => NULL_VALUE.to_string(),
        Datum::Boolean(v) => v.to_string(),
        Datum::Int(v) => v.to_string(),
        Datum::Long(v) => v.to_string(),
        Datum::Float(v) => v.to_string(),
        Datum::Double(v) => v.to_string(),
        Datum::Date(days) => date_from_days(*days)?.format("%Y-%m-%d").to_string(),
        Datum::Timestamp(micros) => timestamp_from_micros(*micros)?
            .format("%Y-%m-%dT%H:%M:%S%.f")
            .to_string(),
        Datum::String(v) => v.clone(),
        Datum::Binary(v) => to_hex(v),
        Datum::Decimal(v) => decimal_string(*v, decimal_scale(source_type)),
    };
    Some(s)
}

/// `None` for values truncate does not apply to, `Some(None)` when the floored value
/// does not fit the source type.
fn truncate_string(value: &Datum, width: u32, source_type: &FieldType) -> Option<Option<String>> {
    let width_chars = usize::try_from(width).unwrap_or(usize::MAX);
    let rendered = match value {
        Datum::Int(v) => i32::try_from(width)
            .ok()
            .and_then(|w| v.checked_sub(v.rem_euclid(w)))
            .map(|t| t.to_string()),
        Datum::Long(v) => v.checked_sub(v.rem_euclid(i64::from(width))).map(|t| t.to_string()),
        Datum::String(v) => Some(v.chars().take(width_chars).collect()),
        Datum::Binary(v) => Some(to_hex(&v[..v.len().min(width_chars)])),
        Datum::Decimal(v) => v
            .checked_sub(v.rem_euclid(i128::from(width)))
            .map(|t| decimal_string(t, decimal_scale(source_type))),
        _ => return None,
    };
    Some(rendered)
}

fn decimal_scale(source_type: &FieldType) -> i8 {
    match source_type {
        FieldType::Decimal { scale, .. } => *scale,
        _ => 0,
    }
}

fn decimal_string(unscaled: i128, scale: i8) -> String {
    if scale <= 0 {
        let mut s = unscaled.to_string();
        s.extend(std::iter::repeat('0').take(scale.unsigned_abs() as usize));
        return s;
    }
    let scale = scale as usize;
    let digits = unscaled.unsigned_abs().to_string();
    let padded = if digits.len() <= scale {
        format!("{}{}", "0".repeat(scale + 1 - digits.len()), digits)
    } else {
        digits
    };
    let (int_part, frac_part) = padded.split_at(padded.len() - scale);
    let sign = if unscaled < 0 { "-" } else { "" };
    format!("{}{}.{}", sign, int_part, frac_part)
}

fn to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{:02x}", b);
    }
    s
}

/// Form-encodes a path segment: alphanumerics and `.-*_` pass through, space becomes `+`.
pub fn escape_path_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for b in value.bytes() {
        match b {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'.' | b'-' | b'*' | b'_' => out.push(b as char),
            b' ' => out.push('+'),
            _ => {
                let _ = write!(out, "%{:02X}", b);
            }
        }
    }
    out
}
