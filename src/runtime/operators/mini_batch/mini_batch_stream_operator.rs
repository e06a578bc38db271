use std::fmt;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::common::{FieldGetter, PartitionKeyCalculator, Schema};
use crate::error::MiniBatchResult;
use crate::runtime::collector::PartitionedBatchCollector;
use crate::runtime::message::Message;
use crate::runtime::operators::mini_batch::{BatchState, FlushSummary, MiniBatchGroupOperator};
use crate::runtime::operators::operator::OperatorTrait;
use crate::runtime::runtime_context::RuntimeContext;
use crate::storage::stats::{MiniBatchStats, MiniBatchStatsSnapshot};
use crate::storage::create_spill_store;

/// Message-driven wrapper around [`MiniBatchGroupOperator`].
///
/// The spill store and the batch size are taken from the `mini_batch` block of the job config
/// on `open`. Flushed partitions leave as `Message::Batch`, ahead of the control message that
/// triggered the flush.
pub struct MiniBatchStreamOperator {
    field_getters: Vec<FieldGetter>,
    equality_schema: Schema,
    row_schema: Schema,
    partition_key: Option<Box<dyn PartitionKeyCalculator>>,
    inner: Option<MiniBatchGroupOperator>,
    collector: Option<PartitionedBatchCollector>,
}

impl fmt::Debug for MiniBatchStreamOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiniBatchStreamOperator")
            .field("inner", &self.inner)
            .finish()
    }
}

impl MiniBatchStreamOperator {
    pub fn new(
        field_getters: Vec<FieldGetter>,
        equality_schema: Schema,
        row_schema: Schema,
        partition_key: Box<dyn PartitionKeyCalculator>,
    ) -> Self {
        Self {
            field_getters,
            equality_schema,
            row_schema,
            partition_key: Some(partition_key),
            inner: None,
            collector: None,
        }
    }

    pub fn state(&self) -> BatchState {
        self.inner.as_ref().map(|op| op.state()).unwrap_or(BatchState::Created)
    }

    pub fn stats(&self) -> Option<MiniBatchStatsSnapshot> {
        self.inner.as_ref().map(|op| op.stats().snapshot())
    }

    fn parts(&mut self) -> Result<(&mut MiniBatchGroupOperator, &mut PartitionedBatchCollector)> {
        match (self.inner.as_mut(), self.collector.as_mut()) {
            (Some(op), Some(collector)) => Ok((op, collector)),
            _ => Err(anyhow!("mini-batch operator used before open")),
        }
    }

    /// Batches of a successful flush followed by `tail`. Batches sealed by a failed flush
    /// are dropped.
    fn emit(
        collector: &mut PartitionedBatchCollector,
        flushed: MiniBatchResult<FlushSummary>,
        mut tail: Vec<Message>,
    ) -> Result<Vec<Message>> {
        if let Err(e) = flushed {
            collector.reset();
            return Err(e.into());
        }
        let mut batches: Vec<Message> = collector.take_batches().into_iter().map(Message::Batch).collect();
        batches.append(&mut tail);
        Ok(batches)
    }
}

#[async_trait]
impl OperatorTrait for MiniBatchStreamOperator {
    async fn open(&mut self, context: &RuntimeContext) -> Result<()> {
        let partition_key = self
            .partition_key
            .take()
            .ok_or_else(|| anyhow!("mini-batch operator opened twice"))?;
        let config = context.mini_batch_config()?;
        let stats = MiniBatchStats::new();
        let store = create_spill_store(&config, stats.clone())?;

        let mut inner = MiniBatchGroupOperator::new(
            self.field_getters.clone(),
            &self.equality_schema,
            &self.row_schema,
            partition_key,
            store,
        )?
        .with_stats(stats)
        .with_name(context.task_label());
        inner.open()?;

        self.collector = Some(PartitionedBatchCollector::new(self.row_schema.clone(), config.max_batch_rows));
        self.inner = Some(inner);
        Ok(())
    }

    async fn close(&mut self) -> Result<Vec<Message>> {
        let (op, collector) = self.parts()?;
        let closed = op.close(collector);
        Self::emit(collector, closed, Vec::new())
    }

    async fn process_message(&mut self, message: Message) -> Result<Vec<Message>> {
        let (op, collector) = self.parts()?;
        match message {
            Message::Event(row) => {
                op.process_event(row)?;
                Ok(Vec::new())
            }
            Message::CheckpointBarrier(barrier) => {
                let flushed = op.prepare_snapshot_pre_barrier(barrier.checkpoint_id, collector);
                Self::emit(collector, flushed, vec![Message::CheckpointBarrier(barrier)])
            }
            Message::EndOfInput => {
                let flushed = op.end_input(collector);
                Self::emit(collector, flushed, vec![Message::EndOfInput])
            }
            Message::Batch(batch) => bail!(
                "mini-batch operator expects row events, got a batch for partition '{}'",
                batch.partition_path
            ),
        }
    }
}
