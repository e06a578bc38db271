use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::common::{BufferKey, EqualityKey, FieldGetter, PartitionKeyCalculator, Row, Schema};
use crate::error::{ConfigError, MiniBatchError, MiniBatchResult};
use crate::runtime::collector::RowCollector;
use crate::storage::spill::DynSpillStore;
use crate::storage::stats::MiniBatchStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Created,
    Open,
    Flushing,
    /// A store, partitioning or downstream call failed. Only `close` is accepted.
    Failed,
    Terminated,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushSummary {
    pub partitions: usize,
    pub rows: usize,
}

/// Deduplicates row changes per (partition, equality key) within a mini-batch and emits the
/// surviving rows grouped by partition when the batch is flushed.
///
/// Accumulate rows (`+I`, `+U`) overwrite the buffered row for their key; retract rows
/// (`-U`, `-D`) drop it. Nothing is emitted until a flush, which is triggered by a checkpoint
/// barrier, end of input or close.
pub struct MiniBatchGroupOperator {
    field_getters: Vec<FieldGetter>,
    equality_field_ids: Vec<i32>,
    equality_positions: Vec<usize>,
    row_schema: Schema,
    partition_key: Box<dyn PartitionKeyCalculator>,
    store: DynSpillStore,
    touched_partitions: HashSet<String>,
    state: BatchState,
    stats: Arc<MiniBatchStats>,
    name: String,
}

impl fmt::Debug for MiniBatchGroupOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiniBatchGroupOperator")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("equality_field_ids", &self.equality_field_ids)
            .field("equality_positions", &self.equality_positions)
            .field("partition_key", &self.partition_key)
            .field("touched_partitions", &self.touched_partitions.len())
            .field("store", &self.store)
            .finish()
    }
}

impl MiniBatchGroupOperator {
    pub fn new(
        field_getters: Vec<FieldGetter>,
        equality_schema: &Schema,
        row_schema: &Schema,
        partition_key: Box<dyn PartitionKeyCalculator>,
        store: DynSpillStore,
    ) -> Result<Self, ConfigError> {
        let resolved = resolve_equality_fields(equality_schema, row_schema, field_getters.len())?;
        Ok(Self {
            field_getters,
            equality_field_ids: resolved.iter().map(|(id, _)| *id).collect(),
            equality_positions: resolved.iter().map(|(_, pos)| *pos).collect(),
            row_schema: row_schema.clone(),
            partition_key,
            store,
            touched_partitions: HashSet::new(),
            state: BatchState::Created,
            stats: MiniBatchStats::new(),
            name: "mini_batch_group".to_string(),
        })
    }

    /// Shares `stats` with the caller, e.g. with the disk store that also reports into it.
    pub fn with_stats(mut self, stats: Arc<MiniBatchStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    pub fn stats(&self) -> &Arc<MiniBatchStats> {
        &self.stats
    }

    /// Row positions of the equality fields, ascending.
    pub fn equality_positions(&self) -> &[usize] {
        &self.equality_positions
    }

    /// Partitions touched since the last flush.
    pub fn pending_partitions(&self) -> usize {
        self.touched_partitions.len()
    }

    pub fn open(&mut self) -> MiniBatchResult<()> {
        self.expect_state(BatchState::Created, "open")?;
        self.state = BatchState::Open;
        info!(
            operator = %self.name,
            equality_field_ids = ?self.equality_field_ids,
            equality_positions = ?self.equality_positions,
            partition_key = ?self.partition_key,
            "opened mini-batch group operator"
        );
        Ok(())
    }

    pub fn process_event(&mut self, row: Row) -> MiniBatchResult<()> {
        self.expect_state(BatchState::Open, "process event")?;
        let result = self.apply(row);
        if result.is_err() {
            self.state = BatchState::Failed;
        }
        result
    }

    fn apply(&mut self, row: Row) -> MiniBatchResult<()> {
        // Retracted rows are never emitted, so only rows that may survive must match the schema.
        if row.is_accumulate() {
            self.row_schema
                .validate_row(&row)
                .map_err(|reason| MiniBatchError::InvalidRow { row: row.to_string(), reason })?;
        }
        let equality_key = EqualityKey::project(&row, &self.field_getters, &self.equality_positions);
        let partition_path = self.partition_key.partition(&row)?;
        let key = BufferKey::new(partition_path, equality_key);
        let key_bytes = key.to_bytes()?;

        if row.is_accumulate() {
            self.store.put(key_bytes, row)?;
            self.stats.on_accumulate();
        } else {
            self.store.remove(&key_bytes)?;
            self.stats.on_retract();
        }
        self.touched_partitions.insert(key.partition_path);
        Ok(())
    }

    /// Emits the surviving row of every key, partition by partition, then empties the buffer.
    ///
    /// On error the operator is failed and rows emitted before the error stay emitted; the
    /// caller must not complete the checkpoint this flush belongs to.
    pub fn flush(&mut self, collector: &mut dyn RowCollector) -> MiniBatchResult<FlushSummary> {
        self.expect_state(BatchState::Open, "flush")?;
        self.state = BatchState::Flushing;
        match self.drain(collector) {
            Ok(summary) => {
                self.state = BatchState::Open;
                Ok(summary)
            }
            Err(e) => {
                self.state = BatchState::Failed;
                Err(e)
            }
        }
    }

    fn drain(&mut self, collector: &mut dyn RowCollector) -> MiniBatchResult<FlushSummary> {
        if self.touched_partitions.is_empty() {
            return Ok(FlushSummary::default());
        }
        let mut summary = FlushSummary::default();
        for partition_path in &self.touched_partitions {
            collector
                .begin_partition(partition_path)
                .map_err(MiniBatchError::Downstream)?;
            let prefix = BufferKey::partition_prefix(partition_path)?;
            let mut rows = 0usize;
            for entry in self.store.scan(&prefix)? {
                let (_, row) = entry?;
                collector.collect(row).map_err(MiniBatchError::Downstream)?;
                rows += 1;
            }
            collector
                .end_partition(partition_path)
                .map_err(MiniBatchError::Downstream)?;
            debug!(
                operator = %self.name,
                partition = %partition_path,
                rows,
                buffered = self.store.len_hint(),
                "flushed partition"
            );
            summary.partitions += 1;
            summary.rows += rows;
        }
        self.store.clear()?;
        self.touched_partitions.clear();
        self.stats.on_flush(summary.partitions, summary.rows);
        Ok(summary)
    }

    /// Flushes the open mini-batch before the barrier of `checkpoint_id` is forwarded.
    pub fn prepare_snapshot_pre_barrier(
        &mut self,
        checkpoint_id: u64,
        collector: &mut dyn RowCollector,
    ) -> MiniBatchResult<FlushSummary> {
        let summary = self.flush(collector)?;
        info!(
            operator = %self.name,
            checkpoint_id,
            partitions = summary.partitions,
            rows = summary.rows,
            "flushed mini-batch before checkpoint barrier"
        );
        Ok(summary)
    }

    pub fn end_input(&mut self, collector: &mut dyn RowCollector) -> MiniBatchResult<FlushSummary> {
        let summary = self.flush(collector)?;
        info!(
            operator = %self.name,
            partitions = summary.partitions,
            rows = summary.rows,
            "flushed mini-batch at end of input"
        );
        Ok(summary)
    }

    /// Flushes whatever is still buffered and terminates. Closing twice is a no-op.
    pub fn close(&mut self, collector: &mut dyn RowCollector) -> MiniBatchResult<FlushSummary> {
        let summary = match self.state {
            BatchState::Terminated => return Ok(FlushSummary::default()),
            BatchState::Created => FlushSummary::default(),
            BatchState::Open => self.flush(collector)?,
            BatchState::Flushing | BatchState::Failed => {
                warn!(
                    operator = %self.name,
                    pending_partitions = self.touched_partitions.len(),
                    "closing failed mini-batch operator, buffered rows are discarded"
                );
                self.touched_partitions.clear();
                self.store.clear()?;
                FlushSummary::default()
            }
        };
        self.state = BatchState::Terminated;
        info!(
            operator = %self.name,
            partitions = summary.partitions,
            rows = summary.rows,
            stats = ?self.stats.snapshot(),
            "closed mini-batch group operator"
        );
        Ok(summary)
    }

    fn expect_state(&self, expected: BatchState, op: &'static str) -> MiniBatchResult<()> {
        if self.state != expected {
            return Err(MiniBatchError::InvalidState { op, state: self.state });
        }
        Ok(())
    }
}

/// Maps every equality field to its row position, sorted by position.
fn resolve_equality_fields(
    equality_schema: &Schema,
    row_schema: &Schema,
    num_getters: usize,
) -> Result<Vec<(i32, usize)>, ConfigError> {
    if equality_schema.is_empty() {
        return Err(ConfigError::EmptyEqualityFields);
    }
    let mut seen = HashSet::new();
    let mut resolved = Vec::with_capacity(equality_schema.len());
    for field in equality_schema.fields() {
        if !seen.insert(field.id) {
            return Err(ConfigError::DuplicateEqualityField(field.id));
        }
        let position = row_schema.position_of(field.id).ok_or_else(|| {
            ConfigError::UnresolvedEqualityField { field_id: field.id, name: field.name.clone() }
        })?;
        if position >= num_getters {
            return Err(ConfigError::MissingFieldGetter { position, num_getters });
        }
        resolved.push((field.id, position));
    }
    resolved.sort_by_key(|(_, pos)| *pos);
    Ok(resolved)
}
