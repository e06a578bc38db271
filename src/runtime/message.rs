use arrow::record_batch::RecordBatch;

use crate::common::{Row, RowKind};

/// Checkpoint barrier injected by the engine. Everything received before it belongs to
/// checkpoint `checkpoint_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointBarrier {
    pub checkpoint_id: u64,
}

impl CheckpointBarrier {
    pub fn new(checkpoint_id: u64) -> Self {
        Self { checkpoint_id }
    }
}

/// Rows of a single partition, converted to columnar form.
///
/// `row_kinds[i]` is the change kind of row `i` of `batch`.
#[derive(Debug, Clone)]
pub struct PartitionBatch {
    pub partition_path: String,
    pub batch: RecordBatch,
    pub row_kinds: Vec<RowKind>,
}

impl PartitionBatch {
    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }
}

#[derive(Debug, Clone)]
pub enum Message {
    Event(Row),
    Batch(PartitionBatch),
    CheckpointBarrier(CheckpointBarrier),
    EndOfInput,
}

impl Message {
    pub fn as_batch(&self) -> Option<&PartitionBatch> {
        match self {
            Message::Batch(b) => Some(b),
            _ => None,
        }
    }
}
