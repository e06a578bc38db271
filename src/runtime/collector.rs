use std::mem;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use arrow::array::{
    ArrayRef, BinaryArray, BooleanArray, Date32Array, Decimal128Array, Float32Array, Float64Array,
    Int32Array, Int64Array, StringArray, TimestampMicrosecondArray,
};
use arrow::datatypes::Schema as ArrowSchema;
use arrow::record_batch::RecordBatch;

use crate::common::{Datum, FieldType, NestedField, Row, RowKind, Schema};
use crate::runtime::message::PartitionBatch;

/// Downstream receiver of flushed rows. Rows of one partition arrive between
/// `begin_partition` and `end_partition` for that partition.
pub trait RowCollector: Send {
    fn begin_partition(&mut self, _partition_path: &str) -> Result<()> {
        Ok(())
    }

    fn collect(&mut self, row: Row) -> Result<()>;

    fn end_partition(&mut self, _partition_path: &str) -> Result<()> {
        Ok(())
    }
}

/// Keeps every emitted row together with its partition path.
#[derive(Debug, Default)]
pub struct VecCollector {
    current: Option<String>,
    rows: Vec<(String, Row)>,
}

impl VecCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> &[(String, Row)] {
        &self.rows
    }

    pub fn take(&mut self) -> Vec<(String, Row)> {
        mem::take(&mut self.rows)
    }
}

impl RowCollector for VecCollector {
    fn begin_partition(&mut self, partition_path: &str) -> Result<()> {
        if let Some(open) = &self.current {
            bail!("partition '{open}' still open when '{partition_path}' began");
        }
        self.current = Some(partition_path.to_string());
        Ok(())
    }

    fn collect(&mut self, row: Row) -> Result<()> {
        let path = self
            .current
            .clone()
            .ok_or_else(|| anyhow!("row collected outside of a partition"))?;
        self.rows.push((path, row));
        Ok(())
    }

    fn end_partition(&mut self, partition_path: &str) -> Result<()> {
        match self.current.take() {
            Some(open) if open == partition_path => Ok(()),
            other => bail!("end of partition '{partition_path}' but open partition is {other:?}"),
        }
    }
}

/// Converts each partition's rows into arrow record batches of at most `max_batch_rows` rows.
#[derive(Debug)]
pub struct PartitionedBatchCollector {
    schema: Schema,
    arrow_schema: Arc<ArrowSchema>,
    max_batch_rows: usize,
    current: Option<String>,
    pending: Vec<Row>,
    batches: Vec<PartitionBatch>,
}

impl PartitionedBatchCollector {
    pub fn new(schema: Schema, max_batch_rows: usize) -> Self {
        let arrow_schema = schema.to_arrow_schema();
        Self {
            schema,
            arrow_schema,
            max_batch_rows: max_batch_rows.max(1),
            current: None,
            pending: Vec::new(),
            batches: Vec::new(),
        }
    }

    pub fn arrow_schema(&self) -> &Arc<ArrowSchema> {
        &self.arrow_schema
    }

    /// Drains the batches completed so far.
    pub fn take_batches(&mut self) -> Vec<PartitionBatch> {
        mem::take(&mut self.batches)
    }

    /// Drops everything collected since the last `take_batches`, including an unfinished
    /// partition. Used when the flush feeding this collector failed.
    pub fn reset(&mut self) {
        self.current = None;
        self.pending.clear();
        self.batches.clear();
    }

    fn seal(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let partition_path = self
            .current
            .clone()
            .ok_or_else(|| anyhow!("rows pending outside of a partition"))?;
        let rows = mem::take(&mut self.pending);
        let columns = self
            .schema
            .fields()
            .iter()
            .enumerate()
            .map(|(pos, field)| column(field, pos, &rows))
            .collect::<Result<Vec<_>>>()?;
        let batch = RecordBatch::try_new(self.arrow_schema.clone(), columns)?;
        let row_kinds: Vec<RowKind> = rows.iter().map(|r| r.kind).collect();
        self.batches.push(PartitionBatch { partition_path, batch, row_kinds });
        Ok(())
    }
}

impl RowCollector for PartitionedBatchCollector {
    fn begin_partition(&mut self, partition_path: &str) -> Result<()> {
        if let Some(open) = &self.current {
            bail!("partition '{open}' still open when '{partition_path}' began");
        }
        self.current = Some(partition_path.to_string());
        Ok(())
    }

    fn collect(&mut self, row: Row) -> Result<()> {
        if self.current.is_none() {
            bail!("row collected outside of a partition");
        }
        self.schema
            .validate_row(&row)
            .map_err(|reason| anyhow!("row {row} does not match output schema: {reason}"))?;
        self.pending.push(row);
        if self.pending.len() >= self.max_batch_rows {
            self.seal()?;
        }
        Ok(())
    }

    fn end_partition(&mut self, partition_path: &str) -> Result<()> {
        if self.current.as_deref() != Some(partition_path) {
            bail!("end of partition '{partition_path}' but open partition is {:?}", self.current);
        }
        self.seal()?;
        self.current = None;
        Ok(())
    }
}

static NULL: Datum = Datum::Null;

fn values<'r, T>(
    field: &NestedField,
    pos: usize,
    rows: &'r [Row],
    extract: impl Fn(&'r Datum) -> Option<T>,
) -> Result<Vec<Option<T>>> {
    rows.iter()
        .map(|row| {
            let datum = row.get(pos).unwrap_or(&NULL);
            if datum.is_null() {
                return Ok(None);
            }
            extract(datum)
                .map(Some)
                .ok_or_else(|| anyhow!("field '{}' expects {}, got {:?}", field.name, field.field_type, datum))
        })
        .collect()
}

fn column(field: &NestedField, pos: usize, rows: &[Row]) -> Result<ArrayRef> {
    let array: ArrayRef = match field.field_type {
        FieldType::Boolean => Arc::new(BooleanArray::from(values(field, pos, rows, |d| match d {
            Datum::Boolean(v) => Some(*v),
            _ => None,
        })?)),
        FieldType::Int => Arc::new(Int32Array::from(values(field, pos, rows, |d| match d {
            Datum::Int(v) => Some(*v),
            _ => None,
        })?)),
        FieldType::Long => Arc::new(Int64Array::from(values(field, pos, rows, |d| match d {
            Datum::Long(v) => Some(*v),
            _ => None,
        })?)),
        FieldType::Float => Arc::new(Float32Array::from(values(field, pos, rows, |d| match d {
            Datum::Float(v) => Some(*v),
            _ => None,
        })?)),
        FieldType::Double => Arc::new(Float64Array::from(values(field, pos, rows, |d| match d {
            Datum::Double(v) => Some(*v),
            _ => None,
        })?)),
        FieldType::Date => Arc::new(Date32Array::from(values(field, pos, rows, |d| match d {
            Datum::Date(v) => Some(*v),
            _ => None,
        })?)),
        FieldType::Timestamp => {
            Arc::new(TimestampMicrosecondArray::from(values(field, pos, rows, |d| match d {
                Datum::Timestamp(v) => Some(*v),
                _ => None,
            })?))
        }
        FieldType::String => Arc::new(StringArray::from(values(field, pos, rows, |d| match d {
            Datum::String(v) => Some(v.as_str()),
            _ => None,
        })?)),
        FieldType::Binary => Arc::new(BinaryArray::from(values(field, pos, rows, |d| match d {
            Datum::Binary(v) => Some(v.as_slice()),
            _ => None,
        })?)),
        FieldType::Decimal { precision, scale } => Arc::new(
            Decimal128Array::from(values(field, pos, rows, |d| match d {
                Datum::Decimal(v) => Some(*v),
                _ => None,
            })?)
            .with_precision_and_scale(precision, scale)?,
        ),
    };
    Ok(array)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Array;
    use crate::common::schema::FIELD_ID_META_KEY;

    fn schema() -> Schema {
        Schema::new(vec![
            NestedField::required(1, "id", FieldType::Long),
            NestedField::optional(2, "name", FieldType::String),
            NestedField::optional(3, "day", FieldType::Date),
            NestedField::optional(4, "amount", FieldType::Decimal { precision: 10, scale: 2 }),
        ])
    }

    fn row(id: i64, name: Option<&str>) -> Row {
        Row::insert(vec![Datum::Long(id), name.into(), Datum::Date(19_723), Datum::Decimal(12_345)])
    }

    #[test]
    fn vec_collector_tags_rows_with_partition() {
        let mut c = VecCollector::new();
        c.begin_partition("p=a").unwrap();
        c.collect(row(1, None)).unwrap();
        c.end_partition("p=a").unwrap();
        c.begin_partition("p=b").unwrap();
        c.collect(row(2, None)).unwrap();
        c.end_partition("p=b").unwrap();

        let paths: Vec<&str> = c.rows().iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(paths, vec!["p=a", "p=b"]);
        assert_eq!(c.take().len(), 2);
        assert!(c.rows().is_empty());
    }

    #[test]
    fn vec_collector_rejects_unbalanced_calls() {
        let mut c = VecCollector::new();
        assert!(c.collect(row(1, None)).is_err());
        c.begin_partition("p=a").unwrap();
        assert!(c.begin_partition("p=b").is_err());
        assert!(c.end_partition("p=b").is_err());
    }

    #[test]
    fn splits_partition_into_bounded_batches() {
        let mut c = PartitionedBatchCollector::new(schema(), 2);
        c.begin_partition("p=a").unwrap();
        for i in 0..5 {
            c.collect(row(i, Some("x"))).unwrap();
        }
        c.end_partition("p=a").unwrap();
        c.begin_partition("p=b").unwrap();
        c.end_partition("p=b").unwrap();

        let batches = c.take_batches();
        let sizes: Vec<usize> = batches.iter().map(PartitionBatch::num_rows).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert!(batches.iter().all(|b| b.partition_path == "p=a"));
        assert!(c.take_batches().is_empty());
    }

    #[test]
    fn reset_discards_partial_output() {
        let mut c = PartitionedBatchCollector::new(schema(), 2);
        c.begin_partition("p=a").unwrap();
        for i in 0..3 {
            c.collect(row(i, None)).unwrap();
        }
        c.reset();
        assert!(c.take_batches().is_empty());

        c.begin_partition("p=b").unwrap();
        c.collect(row(9, None)).unwrap();
        c.end_partition("p=b").unwrap();
        let batches = c.take_batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].partition_path, "p=b");
        assert_eq!(batches[0].num_rows(), 1);
    }

    #[test]
    fn builds_typed_columns_with_nulls_and_field_ids() {
        let mut c = PartitionedBatchCollector::new(schema(), 16);
        c.begin_partition("").unwrap();
        c.collect(row(7, Some("seven"))).unwrap();
        c.collect(Row::update_after(vec![Datum::Long(8), Datum::Null, Datum::Null, Datum::Null]))
            .unwrap();
        c.end_partition("").unwrap();

        let batches = c.take_batches();
        assert_eq!(batches.len(), 1);
        let b = &batches[0];
        assert_eq!(b.row_kinds, vec![RowKind::Insert, RowKind::UpdateAfter]);

        let ids = b.batch.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(ids.values().to_vec(), vec![7, 8]);
        let names = b.batch.column(1).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(names.value(0), "seven");
        assert!(names.is_null(1));
        let amounts = b.batch.column(3).as_any().downcast_ref::<Decimal128Array>().unwrap();
        assert_eq!(amounts.value_as_string(0), "123.45");

        let field = b.batch.schema().field(2).clone();
        assert_eq!(field.metadata().get(FIELD_ID_META_KEY).map(String::as_str), Some("3"));
    }

    #[test]
    fn rejects_rows_not_matching_schema() {
        let mut c = PartitionedBatchCollector::new(schema(), 16);
        c.begin_partition("p=a").unwrap();
        let bad = Row::insert(vec![Datum::String("no".into()), Datum::Null, Datum::Null, Datum::Null]);
        assert!(c.collect(bad).is_err());
        let missing_required = Row::insert(vec![Datum::Null, Datum::Null, Datum::Null, Datum::Null]);
        assert!(c.collect(missing_required).is_err());
    }
}
