use std::fmt::Debug;

use crate::common::Row;

use super::StoreError;

pub type EncodeFn = fn(&Row) -> Result<Vec<u8>, StoreError>;
pub type DecodeFn = fn(&[u8]) -> Result<Row, StoreError>;

/// Value codec used by stores that keep rows as bytes.
pub struct RowSerde {
    pub encode: EncodeFn,
    pub decode: DecodeFn,
}

impl Copy for RowSerde {}

impl Clone for RowSerde {
    fn clone(&self) -> Self {
        *self
    }
}

impl RowSerde {
    pub fn new(encode: EncodeFn, decode: DecodeFn) -> Self {
        Self { encode, decode }
    }
}

impl Default for RowSerde {
    fn default() -> Self {
        bincode_row_serde()
    }
}

impl Debug for RowSerde {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowSerde").finish()
    }
}

fn encode_bincode(row: &Row) -> Result<Vec<u8>, StoreError> {
    Ok(bincode::serialize(row)?)
}

fn decode_bincode(bytes: &[u8]) -> Result<Row, StoreError> {
    Ok(bincode::deserialize(bytes)?)
}

pub fn bincode_row_serde() -> RowSerde {
    RowSerde::new(encode_bincode, decode_bincode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{Datum, RowKind};

    #[test]
    fn bincode_serde_keeps_kind_and_values() {
        let serde = bincode_row_serde();
        let row = Row::new(
            RowKind::UpdateAfter,
            vec![Datum::Long(1), Datum::Null, Datum::Decimal(-99), Datum::Binary(vec![1, 2])],
        );
        let bytes = (serde.encode)(&row).unwrap();
        assert_eq!((serde.decode)(&bytes).unwrap(), row);
    }

    #[test]
    fn garbage_fails_to_decode() {
        let serde = bincode_row_serde();
        assert!(matches!((serde.decode)(&[0xff]), Err(StoreError::Serialization(_))));
    }
}
