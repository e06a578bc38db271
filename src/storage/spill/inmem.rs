use std::collections::BTreeMap;

use crate::common::Row;

use super::{ScanIter, SpillStore, StoreError};

/// Ordered map kept entirely in memory. Used when a job opts out of disk spilling and in tests.
#[derive(Debug, Default)]
pub struct InMemSpillStore {
    entries: BTreeMap<Vec<u8>, Row>,
}

impl InMemSpillStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SpillStore for InMemSpillStore {
    fn put(&mut self, key: Vec<u8>, value: Row) -> Result<(), StoreError> {
        self.entries.insert(key, value);
        Ok(())
    }

    fn remove(&mut self, key: &[u8]) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    fn scan<'a>(&'a self, prefix: &[u8]) -> Result<ScanIter<'a>, StoreError> {
        let prefix = prefix.to_vec();
        let iter = self
            .entries
            .range(prefix.clone()..)
            .take_while(move |(k, _)| k.starts_with(&prefix))
            .map(|(k, v)| Ok::<_, StoreError>((k.clone(), v.clone())));
        Ok(Box::new(iter))
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        self.entries.clear();
        Ok(())
    }

    fn len_hint(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Datum;

    fn row(v: i64) -> Row {
        Row::insert(vec![Datum::Long(v)])
    }

    fn scan_values(store: &InMemSpillStore, prefix: &[u8]) -> Vec<(Vec<u8>, i64)> {
        store
            .scan(prefix)
            .unwrap()
            .map(|r| {
                let (k, v) = r.unwrap();
                match v.values[0] {
                    Datum::Long(x) => (k, x),
                    _ => unreachable!(),
                }
            })
            .collect()
    }

    #[test]
    fn put_overwrites_and_remove_is_idempotent() {
        let mut store = InMemSpillStore::new();
        store.put(b"a1".to_vec(), row(1)).unwrap();
        store.put(b"a1".to_vec(), row(2)).unwrap();
        store.remove(b"zz").unwrap();
        assert_eq!(scan_values(&store, b"a"), vec![(b"a1".to_vec(), 2)]);
        store.remove(b"a1").unwrap();
        store.remove(b"a1").unwrap();
        assert!(scan_values(&store, b"a").is_empty());
    }

    #[test]
    fn scan_is_prefix_bounded_and_ordered() {
        let mut store = InMemSpillStore::new();
        let entries: [(&[u8], i64); 5] = [(b"b2", 4), (b"a2", 2), (b"b1", 3), (b"a1", 1), (b"c", 5)];
        for (k, v) in entries {
            store.put(k.to_vec(), row(v)).unwrap();
        }
        let got: Vec<i64> = scan_values(&store, b"b").into_iter().map(|(_, v)| v).collect();
        assert_eq!(got, vec![3, 4]);
        assert_eq!(scan_values(&store, b"").len(), 5);
        store.clear().unwrap();
        assert_eq!(store.len_hint(), 0);
    }
}
