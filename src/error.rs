use thiserror::Error;

use crate::common::partition::PartitionError;
use crate::runtime::operators::mini_batch::BatchState;
use crate::storage::spill::StoreError;

/// Invalid setup detected while building a component. The component refuses to start.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("equality field {name} (id {field_id}) not found in row schema")]
    UnresolvedEqualityField { field_id: i32, name: String },
    #[error("equality field id {0} listed more than once")]
    DuplicateEqualityField(i32),
    #[error("equality schema has no fields")]
    EmptyEqualityFields,
    #[error("no field getter for row position {position} ({num_getters} getters configured)")]
    MissingFieldGetter { position: usize, num_getters: usize },
    #[error("invalid partition spec: {0}")]
    InvalidPartitionSpec(String),
    #[error("invalid mini-batch config: {0}")]
    InvalidConfig(String),
}

/// Errors raised by the mini-batch group operator. All of them are fatal for the running task.
#[derive(Error, Debug)]
pub enum MiniBatchError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("spill store failure: {0}")]
    Storage(#[from] StoreError),
    #[error("partition key computation failed: {0}")]
    Partition(#[from] PartitionError),
    #[error("row {row} does not match row schema: {reason}")]
    InvalidRow { row: String, reason: String },
    #[error("downstream collector failed: {0}")]
    Downstream(#[source] anyhow::Error),
    #[error("cannot {op} while operator is {state:?}")]
    InvalidState { op: &'static str, state: BatchState },
}

pub type MiniBatchResult<T> = Result<T, MiniBatchError>;
