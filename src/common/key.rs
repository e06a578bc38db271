use serde::{Deserialize, Serialize};

use super::row::{Datum, Row};
use super::schema::FieldGetter;
use crate::storage::spill::StoreError;

/// Size of the big-endian length header in front of the partition path bytes.
const PARTITION_LEN_BYTES: usize = 4;

/// Identity of the logical entity a row represents: the row projected on the equality fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EqualityKey {
    values: Vec<Datum>,
}

impl EqualityKey {
    pub fn new(values: Vec<Datum>) -> Self {
        Self { values: values.into_iter().map(canonicalize).collect() }
    }

    /// Projects `row` on `positions`, which must follow row-schema order so that equal
    /// rows always produce equal bytes.
    pub fn project(row: &Row, getters: &[FieldGetter], positions: &[usize]) -> Self {
        Self::new(positions.iter().map(|&pos| getters[pos].get_field_or_null(row)).collect())
    }

    pub fn values(&self) -> &[Datum] {
        &self.values
    }
}

// NaN payloads differ bitwise; collapse them so every NaN key hits the same entry.
fn canonicalize(value: Datum) -> Datum {
    match value {
        Datum::Float(v) if v.is_nan() => Datum::Float(f32::NAN),
        Datum::Double(v) if v.is_nan() => Datum::Double(f64::NAN),
        other => other,
    }
}

/// Composite buffer key. Encodes as `[u32 BE path length][path bytes][equality key bytes]`,
/// so all keys of one partition share the partition prefix and no prefix of one partition
/// matches keys of another.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferKey {
    pub partition_path: String,
    pub equality_key: EqualityKey,
}

impl BufferKey {
    pub fn new(partition_path: String, equality_key: EqualityKey) -> Self {
        Self { partition_path, equality_key }
    }

    /// Scan prefix covering every key of `partition_path`.
    pub fn partition_prefix(partition_path: &str) -> Result<Vec<u8>, StoreError> {
        let mut buf = Vec::with_capacity(PARTITION_LEN_BYTES + partition_path.len());
        write_partition(&mut buf, partition_path)?;
        Ok(buf)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, StoreError> {
        let mut buf = Vec::with_capacity(PARTITION_LEN_BYTES + self.partition_path.len() + 32);
        write_partition(&mut buf, &self.partition_path)?;
        bincode::serialize_into(&mut buf, &self.equality_key.values)?;
        Ok(buf)
    }
}

fn write_partition(buf: &mut Vec<u8>, partition_path: &str) -> Result<(), StoreError> {
    buf.extend_from_slice(&partition_len_header(partition_path.len())?);
    buf.extend_from_slice(partition_path.as_bytes());
    Ok(())
}

fn partition_len_header(len: usize) -> Result<[u8; PARTITION_LEN_BYTES], StoreError> {
    u32::try_from(len)
        .map(u32::to_be_bytes)
        .map_err(|_| StoreError::MalformedKey(format!("partition path of {len} bytes exceeds the u32 length header")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::schema::FieldType;

    fn key(path: &str, id: i64) -> BufferKey {
        BufferKey::new(path.to_string(), EqualityKey::new(vec![Datum::Long(id), Datum::from("x")]))
    }

    #[test]
    fn encoding_layout() {
        let k = key("region=eu/day=2024-01-15", 42);
        let bytes = k.to_bytes().unwrap();
        assert_eq!(&bytes[..4], &24u32.to_be_bytes());
        assert_eq!(&bytes[4..28], b"region=eu/day=2024-01-15");
        let values: Vec<Datum> = bincode::deserialize(&bytes[28..]).unwrap();
        assert_eq!(values, k.equality_key.values());
    }

    #[test]
    fn keys_start_with_their_partition_prefix() {
        let prefix = BufferKey::partition_prefix("p=1").unwrap();
        assert!(key("p=1", 1).to_bytes().unwrap().starts_with(&prefix));
        assert!(key("p=1", 2).to_bytes().unwrap().starts_with(&prefix));
    }

    #[test]
    fn path_that_extends_another_does_not_share_prefix() {
        let short = BufferKey::partition_prefix("year=2024").unwrap();
        let long_key = key("year=20245", 1).to_bytes().unwrap();
        assert!(!long_key.starts_with(&short));

        let long = BufferKey::partition_prefix("year=20245").unwrap();
        assert!(!key("year=2024", 1).to_bytes().unwrap().starts_with(&long));
    }

    #[test]
    fn empty_partition_path() {
        let k = key("", 3);
        let bytes = k.to_bytes().unwrap();
        assert_eq!(BufferKey::partition_prefix("").unwrap(), vec![0, 0, 0, 0]);
        assert!(bytes.starts_with(&[0, 0, 0, 0]));
    }

    #[test]
    fn projection_follows_positions_and_canonicalizes_nan() {
        let getters = vec![
            FieldGetter::new(0, FieldType::Double),
            FieldGetter::new(1, FieldType::String),
            FieldGetter::new(2, FieldType::Long),
        ];
        let a = Row::insert(vec![Datum::Double(f64::NAN), "a".into(), Datum::Long(1)]);
        let b = Row::insert(vec![Datum::Double(-f64::NAN), "b".into(), Datum::Long(1)]);
        let ka = BufferKey::new("p".into(), EqualityKey::project(&a, &getters, &[0, 2]));
        let kb = BufferKey::new("p".into(), EqualityKey::project(&b, &getters, &[0, 2]));
        assert_eq!(ka.to_bytes().unwrap(), kb.to_bytes().unwrap());
    }

    #[test]
    fn path_length_must_fit_the_header() {
        assert_eq!(partition_len_header(u32::MAX as usize).unwrap(), [0xff; 4]);
        #[cfg(target_pointer_width = "64")]
        assert!(matches!(
            partition_len_header(u32::MAX as usize + 1),
            Err(StoreError::MalformedKey(_))
        ));
    }
}
