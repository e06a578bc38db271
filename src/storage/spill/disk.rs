use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::common::Row;
use crate::storage::config::SpillStoreConfig;
use crate::storage::stats::MiniBatchStats;

use super::merge::MergeIter;
use super::row_serde::RowSerde;
use super::run::{RunWriter, Slot, SlotIter, SpillRun};
use super::{ScanIter, SpillStore, StoreError};

/// Per-entry bookkeeping charged on top of key and value bytes.
const ENTRY_OVERHEAD_BYTES: usize = 48;

/// Spill store with a bounded in-memory table backed by sorted run files.
///
/// Writes land in the memtable. Once it grows past `memtable_limit_bytes` it is written out as
/// an immutable run in this instance's scratch directory. Removals of keys that may live in a
/// run are recorded as tombstones. Scans merge the memtable with all runs, newest first.
#[derive(Debug)]
pub struct DiskSpillStore {
    config: SpillStoreConfig,
    dir: PathBuf,
    memtable: BTreeMap<Vec<u8>, Slot>,
    memtable_bytes: usize,
    // Oldest first.
    runs: Vec<SpillRun>,
    next_run_id: u64,
    serde: RowSerde,
    stats: Arc<MiniBatchStats>,
}

impl DiskSpillStore {
    pub fn open(config: SpillStoreConfig, stats: Arc<MiniBatchStats>) -> Result<Self, StoreError> {
        config
            .validate()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let dir = config.scratch_dir.join(format!("mini_batch-{}", Uuid::new_v4()));
        fs::create_dir_all(&dir)?;
        debug!(dir = %dir.display(), limit_bytes = config.memtable_limit_bytes, "opened disk spill store");
        Ok(Self {
            config,
            dir,
            memtable: BTreeMap::new(),
            memtable_bytes: 0,
            runs: Vec::new(),
            next_run_id: 0,
            serde: RowSerde::default(),
            stats,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn num_runs(&self) -> usize {
        self.runs.len()
    }

    pub fn memtable_bytes(&self) -> usize {
        self.memtable_bytes
    }

    fn charge(key: &[u8], slot: &Slot) -> usize {
        key.len() + slot.value_len() + ENTRY_OVERHEAD_BYTES
    }

    fn insert_slot(&mut self, key: Vec<u8>, slot: Slot) -> Result<(), StoreError> {
        let added = Self::charge(&key, &slot);
        if let Some(old) = self.memtable.get(&key) {
            let released = Self::charge(&key, old);
            self.memtable_bytes = self.memtable_bytes.saturating_sub(released);
        }
        self.memtable.insert(key, slot);
        self.memtable_bytes += added;
        if self.memtable_bytes > self.config.memtable_limit_bytes {
            self.spill_memtable()?;
        }
        Ok(())
    }

    fn next_run_path(&mut self) -> PathBuf {
        let path = self.dir.join(format!("run-{:08}.spill", self.next_run_id));
        self.next_run_id += 1;
        path
    }

    fn spill_memtable(&mut self) -> Result<(), StoreError> {
        if self.memtable.is_empty() {
            return Ok(());
        }
        let path = self.next_run_path();
        let mut writer = RunWriter::create(path, self.config.index_interval)?;
        for (key, slot) in &self.memtable {
            writer.append(key, slot)?;
        }
        let run = writer.finish()?;
        debug!(
            path = %run.path().display(),
            entries = run.entries(),
            bytes = run.bytes(),
            "spilled memtable to sorted run"
        );
        self.stats.on_spill(run.bytes());
        self.memtable.clear();
        self.memtable_bytes = 0;
        self.runs.push(run);

        if self.runs.len() >= self.config.max_spill_runs {
            self.compact_runs()?;
        }
        Ok(())
    }

    /// Merges every run into one. Tombstones are dropped since no older data remains.
    fn compact_runs(&mut self) -> Result<(), StoreError> {
        let path = self.next_run_path();
        let mut writer = RunWriter::create(path, self.config.index_interval)?;
        {
            let mut sources: Vec<SlotIter<'_>> = Vec::with_capacity(self.runs.len());
            for run in &self.runs {
                sources.push(Box::new(run.scan(&[])?));
            }
            for entry in MergeIter::new(sources) {
                let (key, value) = entry?;
                writer.append(&key, &Slot::Put(value))?;
            }
        }
        let merged = writer.finish()?;
        debug!(
            inputs = self.runs.len(),
            entries = merged.entries(),
            bytes = merged.bytes(),
            "compacted spill runs"
        );
        for run in std::mem::replace(&mut self.runs, vec![merged]) {
            run.delete()?;
        }
        self.stats.on_compaction();
        Ok(())
    }
}

impl SpillStore for DiskSpillStore {
    fn put(&mut self, key: Vec<u8>, value: Row) -> Result<(), StoreError> {
        let bytes = (self.serde.encode)(&value)?;
        self.insert_slot(key, Slot::Put(bytes))
    }

    fn remove(&mut self, key: &[u8]) -> Result<(), StoreError> {
        if self.runs.is_empty() {
            if let Some(old) = self.memtable.remove(key) {
                let released = Self::charge(key, &old);
                self.memtable_bytes = self.memtable_bytes.saturating_sub(released);
            }
            return Ok(());
        }
        self.insert_slot(key.to_vec(), Slot::Tombstone)
    }

    fn scan<'a>(&'a self, prefix: &[u8]) -> Result<ScanIter<'a>, StoreError> {
        let mut sources: Vec<SlotIter<'a>> = Vec::with_capacity(self.runs.len() + 1);
        for run in &self.runs {
            sources.push(Box::new(run.scan(prefix)?));
        }
        let owned_prefix = prefix.to_vec();
        let memtable = self
            .memtable
            .range(owned_prefix.clone()..)
            .take_while(move |(k, _)| k.starts_with(&owned_prefix))
            .map(|(k, s)| Ok::<_, StoreError>((k.clone(), s.clone())));
        sources.push(Box::new(memtable));

        let decode = self.serde.decode;
        let iter = MergeIter::new(sources).map(move |entry| -> Result<(Vec<u8>, Row), StoreError> {
            let (key, bytes) = entry?;
            Ok((key, decode(&bytes)?))
        });
        Ok(Box::new(iter))
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        self.memtable.clear();
        self.memtable_bytes = 0;
        for run in self.runs.drain(..) {
            run.delete()?;
        }
        Ok(())
    }

    fn len_hint(&self) -> usize {
        self.memtable.len() + self.runs.iter().map(SpillRun::entries).sum::<usize>()
    }
}

impl Drop for DiskSpillStore {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.dir) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(dir = %self.dir.display(), error = %e, "failed to remove spill directory");
            }
        }
    }
}
