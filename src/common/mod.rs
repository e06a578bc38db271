pub mod key;
pub mod partition;
pub mod row;
pub mod schema;

pub use key::{BufferKey, EqualityKey};
pub use partition::{PartitionKey, PartitionKeyCalculator, PartitionSpec, Transform};
pub use row::{Datum, Row, RowKind};
pub use schema::{FieldGetter, FieldType, NestedField, Schema};
