use super::run::{Slot, SlotIter};
use super::StoreError;

/// K-way merge over sorted sources ordered oldest first.
///
/// On equal keys the newest source wins and the older versions are skipped. Keys whose
/// winning version is a tombstone are not yielded.
pub(super) struct MergeIter<'a> {
    sources: Vec<SlotIter<'a>>,
    heads: Vec<Option<(Vec<u8>, Slot)>>,
    primed: bool,
    done: bool,
}

impl<'a> MergeIter<'a> {
    pub(super) fn new(sources: Vec<SlotIter<'a>>) -> Self {
        let heads = sources.iter().map(|_| None).collect();
        Self { sources, heads, primed: false, done: false }
    }

    fn advance(&mut self, i: usize) -> Result<(), StoreError> {
        self.heads[i] = self.sources[i].next().transpose()?;
        Ok(())
    }

    fn next_live(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>, StoreError> {
        if !self.primed {
            for i in 0..self.sources.len() {
                self.advance(i)?;
            }
            self.primed = true;
        }
        loop {
            let min_key = match self.heads.iter().flatten().map(|(k, _)| k).min() {
                Some(k) => k.clone(),
                None => return Ok(None),
            };
            let mut winner = None;
            for i in 0..self.heads.len() {
                if matches!(&self.heads[i], Some((k, _)) if *k == min_key) {
                    winner = self.heads[i].take();
                    self.advance(i)?;
                }
            }
            if let Some((key, Slot::Put(value))) = winner {
                return Ok(Some((key, value)));
            }
        }
    }
}

impl Iterator for MergeIter<'_> {
    type Item = Result<(Vec<u8>, Vec<u8>), StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_live() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(entries: Vec<(&'static str, Slot)>) -> SlotIter<'static> {
        Box::new(entries.into_iter().map(|(k, s)| Ok((k.as_bytes().to_vec(), s))))
    }

    fn put(v: u8) -> Slot {
        Slot::Put(vec![v])
    }

    #[test]
    fn newest_source_wins_and_tombstones_hide() {
        let oldest = source(vec![("a", put(1)), ("b", put(1)), ("c", put(1))]);
        let middle = source(vec![("b", Slot::Tombstone), ("d", put(2))]);
        let newest = source(vec![("a", put(3)), ("b", put(3)), ("c", Slot::Tombstone)]);
        let merged: Vec<_> = MergeIter::new(vec![oldest, middle, newest]).map(|r| r.unwrap()).collect();
        assert_eq!(
            merged,
            vec![
                (b"a".to_vec(), vec![3]),
                (b"b".to_vec(), vec![3]),
                (b"d".to_vec(), vec![2]),
            ]
        );
    }

    #[test]
    fn error_ends_the_merge() {
        let failing: SlotIter<'static> = Box::new(
            vec![
                Ok((b"a".to_vec(), put(1))),
                Err(StoreError::MalformedKey("boom".into())),
            ]
            .into_iter(),
        );
        let ok = source(vec![("b", put(2))]);
        let mut merged = MergeIter::new(vec![failing, ok]);
        assert!(matches!(merged.next(), Some(Err(_))));
        assert!(merged.next().is_none());
    }

    #[test]
    fn empty_sources() {
        assert_eq!(MergeIter::new(vec![]).count(), 0);
        assert_eq!(MergeIter::new(vec![source(vec![])]).count(), 0);
    }
}
