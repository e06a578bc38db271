use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Counters for one mini-batch operator and its spill store.
///
/// Not tied to a metrics backend; callers snapshot and export.
#[derive(Debug, Default)]
pub struct MiniBatchStats {
    events_accumulated: AtomicU64,
    events_retracted: AtomicU64,

    flushes: AtomicU64,
    partitions_flushed: AtomicU64,
    rows_emitted: AtomicU64,

    spilled_runs: AtomicU64,
    spilled_bytes: AtomicU64,
    run_compactions: AtomicU64,
}

impl MiniBatchStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> MiniBatchStatsSnapshot {
        MiniBatchStatsSnapshot {
            events_accumulated: self.events_accumulated.load(Ordering::Relaxed),
            events_retracted: self.events_retracted.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            partitions_flushed: self.partitions_flushed.load(Ordering::Relaxed),
            rows_emitted: self.rows_emitted.load(Ordering::Relaxed),
            spilled_runs: self.spilled_runs.load(Ordering::Relaxed),
            spilled_bytes: self.spilled_bytes.load(Ordering::Relaxed),
            run_compactions: self.run_compactions.load(Ordering::Relaxed),
        }
    }

    // ----------------- update helpers -----------------

    pub fn on_accumulate(&self) {
        self.events_accumulated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_retract(&self) {
        self.events_retracted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_flush(&self, partitions: usize, rows: usize) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.partitions_flushed.fetch_add(partitions as u64, Ordering::Relaxed);
        self.rows_emitted.fetch_add(rows as u64, Ordering::Relaxed);
    }

    pub fn on_spill(&self, bytes: u64) {
        self.spilled_runs.fetch_add(1, Ordering::Relaxed);
        self.spilled_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn on_compaction(&self) {
        self.run_compactions.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiniBatchStatsSnapshot {
    pub events_accumulated: u64,
    pub events_retracted: u64,
    pub flushes: u64,
    pub partitions_flushed: u64,
    pub rows_emitted: u64,
    pub spilled_runs: u64,
    pub spilled_bytes: u64,
    pub run_compactions: u64,
}
