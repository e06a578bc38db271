use std::fmt;

use serde::{Deserialize, Serialize};

use super::schema::FieldType;

/// Change kind carried by every row flowing through the write path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RowKind {
    Insert,
    UpdateBefore,
    UpdateAfter,
    Delete,
}

impl RowKind {
    /// Insert and update-after add a row version.
    pub fn is_accumulate(&self) -> bool {
        matches!(self, RowKind::Insert | RowKind::UpdateAfter)
    }

    /// Update-before and delete withdraw a row version.
    pub fn is_retract(&self) -> bool {
        !self.is_accumulate()
    }

    pub fn short_string(&self) -> &'static str {
        match self {
            RowKind::Insert => "+I",
            RowKind::UpdateBefore => "-U",
            RowKind::UpdateAfter => "+U",
            RowKind::Delete => "-D",
        }
    }
}

impl fmt::Display for RowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_string())
    }
}

/// A single typed field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Datum {
    Null,
    Boolean(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    /// Days since 1970-01-01.
    Date(i32),
    /// Microseconds since 1970-01-01T00:00:00, no zone.
    Timestamp(i64),
    String(String),
    Binary(Vec<u8>),
    /// Unscaled value; precision and scale live in the field type.
    Decimal(i128),
}

impl Datum {
    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    /// Whether this value may be stored in a field of `field_type`. Null fits every type.
    pub fn conforms_to(&self, field_type: &FieldType) -> bool {
        matches!(
            (self, field_type),
            (Datum::Null, _)
                | (Datum::Boolean(_), FieldType::Boolean)
                | (Datum::Int(_), FieldType::Int)
                | (Datum::Long(_), FieldType::Long)
                | (Datum::Float(_), FieldType::Float)
                | (Datum::Double(_), FieldType::Double)
                | (Datum::Date(_), FieldType::Date)
                | (Datum::Timestamp(_), FieldType::Timestamp)
                | (Datum::String(_), FieldType::String)
                | (Datum::Binary(_), FieldType::Binary)
                | (Datum::Decimal(_), FieldType::Decimal { .. })
        )
    }
}

impl From<i32> for Datum {
    fn from(v: i32) -> Self {
        Datum::Int(v)
    }
}

impl From<i64> for Datum {
    fn from(v: i64) -> Self {
        Datum::Long(v)
    }
}

impl From<f64> for Datum {
    fn from(v: f64) -> Self {
        Datum::Double(v)
    }
}

impl From<bool> for Datum {
    fn from(v: bool) -> Self {
        Datum::Boolean(v)
    }
}

impl From<&str> for Datum {
    fn from(v: &str) -> Self {
        Datum::String(v.to_string())
    }
}

impl From<String> for Datum {
    fn from(v: String) -> Self {
        Datum::String(v)
    }
}

impl<T: Into<Datum>> From<Option<T>> for Datum {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Datum::Null)
    }
}

/// A row change event: the change kind plus the row's field values in row-schema order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub kind: RowKind,
    pub values: Vec<Datum>,
}

impl Row {
    pub fn new(kind: RowKind, values: Vec<Datum>) -> Self {
        Self { kind, values }
    }

    pub fn insert(values: Vec<Datum>) -> Self {
        Self::new(RowKind::Insert, values)
    }

    pub fn update_after(values: Vec<Datum>) -> Self {
        Self::new(RowKind::UpdateAfter, values)
    }

    pub fn update_before(values: Vec<Datum>) -> Self {
        Self::new(RowKind::UpdateBefore, values)
    }

    pub fn delete(values: Vec<Datum>) -> Self {
        Self::new(RowKind::Delete, values)
    }

    pub fn arity(&self) -> usize {
        self.values.len()
    }

    pub fn get(&self, pos: usize) -> Option<&Datum> {
        self.values.get(pos)
    }

    pub fn is_accumulate(&self) -> bool {
        self.kind.is_accumulate()
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.kind)?;
        for (i, v) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{:?}", v)?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_kind_classification() {
        assert!(RowKind::Insert.is_accumulate());
        assert!(RowKind::UpdateAfter.is_accumulate());
        assert!(RowKind::UpdateBefore.is_retract());
        assert!(RowKind::Delete.is_retract());
        assert_eq!(RowKind::UpdateBefore.to_string(), "-U");
    }

    #[test]
    fn datum_conformance() {
        assert!(Datum::Null.conforms_to(&FieldType::Long));
        assert!(Datum::Long(1).conforms_to(&FieldType::Long));
        assert!(!Datum::Int(1).conforms_to(&FieldType::Long));
        assert!(Datum::Decimal(1234).conforms_to(&FieldType::Decimal { precision: 10, scale: 2 }));
    }

    #[test]
    fn display_includes_kind() {
        let row = Row::insert(vec![Datum::Long(1), "a".into()]);
        assert_eq!(row.to_string(), "+I(Long(1), String(\"a\"))");
    }
}
