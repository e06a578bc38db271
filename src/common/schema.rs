use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema as ArrowSchema, TimeUnit};
use serde::{Deserialize, Serialize};

use super::row::{Datum, Row};

/// Metadata key carrying the field id on converted arrow fields.
pub const FIELD_ID_META_KEY: &str = "PARQUET:field_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    Boolean,
    Int,
    Long,
    Float,
    Double,
    Date,
    Timestamp,
    String,
    Binary,
    Decimal { precision: u8, scale: i8 },
}

impl FieldType {
    pub fn to_arrow(&self) -> DataType {
        match self {
            FieldType::Boolean => DataType::Boolean,
            FieldType::Int => DataType::Int32,
            FieldType::Long => DataType::Int64,
            FieldType::Float => DataType::Float32,
            FieldType::Double => DataType::Float64,
            FieldType::Date => DataType::Date32,
            FieldType::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, None),
            FieldType::String => DataType::Utf8,
            FieldType::Binary => DataType::Binary,
            FieldType::Decimal { precision, scale } => DataType::Decimal128(*precision, *scale),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Boolean => write!(f, "boolean"),
            FieldType::Int => write!(f, "int"),
            FieldType::Long => write!(f, "long"),
            FieldType::Float => write!(f, "float"),
            FieldType::Double => write!(f, "double"),
            FieldType::Date => write!(f, "date"),
            FieldType::Timestamp => write!(f, "timestamp"),
            FieldType::String => write!(f, "string"),
            FieldType::Binary => write!(f, "binary"),
            FieldType::Decimal { precision, scale } => write!(f, "decimal({}, {})", precision, scale),
        }
    }
}

/// A top-level field identified by a stable id, independent of its position or name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NestedField {
    pub id: i32,
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
}

impl NestedField {
    pub fn required(id: i32, name: impl Into<String>, field_type: FieldType) -> Self {
        Self { id, name: name.into(), field_type, required: true }
    }

    pub fn optional(id: i32, name: impl Into<String>, field_type: FieldType) -> Self {
        Self { id, name: name.into(), field_type, required: false }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    fields: Vec<NestedField>,
}

impl Schema {
    pub fn new(fields: Vec<NestedField>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[NestedField] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field_by_id(&self, id: i32) -> Option<&NestedField> {
        self.fields.iter().find(|f| f.id == id)
    }

    /// Position of the field with `id` in this schema.
    pub fn position_of(&self, id: i32) -> Option<usize> {
        self.fields.iter().position(|f| f.id == id)
    }

    /// Sub-schema with the given field ids, in the order given. Unknown ids are skipped.
    pub fn select(&self, ids: &[i32]) -> Schema {
        Schema::new(ids.iter().filter_map(|id| self.field_by_id(*id).cloned()).collect())
    }

    /// Checks arity, types and required-ness of `row` against this schema.
    pub fn validate_row(&self, row: &Row) -> Result<(), String> {
        if row.arity() != self.fields.len() {
            return Err(format!(
                "row has {} fields, schema has {}",
                row.arity(),
                self.fields.len()
            ));
        }
        for (field, value) in self.fields.iter().zip(row.values.iter()) {
            if field.required && value.is_null() {
                return Err(format!("required field '{}' is null", field.name));
            }
            if !value.conforms_to(&field.field_type) {
                return Err(format!(
                    "field '{}' expects {}, got {:?}",
                    field.name, field.field_type, value
                ));
            }
        }
        Ok(())
    }

    pub fn to_arrow_schema(&self) -> Arc<ArrowSchema> {
        let fields: Vec<Field> = self
            .fields
            .iter()
            .map(|f| {
                Field::new(&f.name, f.field_type.to_arrow(), !f.required).with_metadata(
                    HashMap::from([(FIELD_ID_META_KEY.to_string(), f.id.to_string())]),
                )
            })
            .collect();
        Arc::new(ArrowSchema::new(fields))
    }
}

/// Reads the value of one row field by position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldGetter {
    pos: usize,
    field_type: FieldType,
}

impl FieldGetter {
    pub fn new(pos: usize, field_type: FieldType) -> Self {
        Self { pos, field_type }
    }

    /// One getter per field of `schema`, indexed by position.
    pub fn for_schema(schema: &Schema) -> Vec<FieldGetter> {
        schema
            .fields()
            .iter()
            .enumerate()
            .map(|(pos, f)| FieldGetter::new(pos, f.field_type))
            .collect()
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    /// The field value, or `Datum::Null` when the row is shorter than this position.
    pub fn get_field_or_null(&self, row: &Row) -> Datum {
        row.get(self.pos).cloned().unwrap_or(Datum::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        Schema::new(vec![
            NestedField::required(1, "id", FieldType::Long),
            NestedField::optional(2, "name", FieldType::String),
            NestedField::required(3, "ts", FieldType::Timestamp),
        ])
    }

    #[test]
    fn lookup_by_id() {
        let s = schema();
        assert_eq!(s.position_of(3), Some(2));
        assert_eq!(s.position_of(42), None);
        assert_eq!(s.select(&[3, 1]).fields()[0].name, "ts");
    }

    #[test]
    fn validate_row_checks_types_and_nulls() {
        let s = schema();
        assert!(s
            .validate_row(&Row::insert(vec![Datum::Long(1), Datum::Null, Datum::Timestamp(0)]))
            .is_ok());
        assert!(s
            .validate_row(&Row::insert(vec![Datum::Null, Datum::Null, Datum::Timestamp(0)]))
            .is_err());
        assert!(s
            .validate_row(&Row::insert(vec![Datum::Int(1), Datum::Null, Datum::Timestamp(0)]))
            .is_err());
        assert!(s.validate_row(&Row::insert(vec![Datum::Long(1)])).is_err());
    }

    #[test]
    fn arrow_schema_keeps_field_ids() {
        let arrow_schema = schema().to_arrow_schema();
        let ts = arrow_schema.field(2);
        assert_eq!(ts.data_type(), &DataType::Timestamp(TimeUnit::Microsecond, None));
        assert_eq!(ts.metadata().get(FIELD_ID_META_KEY).map(String::as_str), Some("3"));
        assert!(arrow_schema.field(1).is_nullable());
    }

    #[test]
    fn getter_returns_null_past_arity() {
        let getters = FieldGetter::for_schema(&schema());
        let row = Row::insert(vec![Datum::Long(7)]);
        assert_eq!(getters[0].get_field_or_null(&row), Datum::Long(7));
        assert_eq!(getters[2].get_field_or_null(&row), Datum::Null);
    }
}
