pub mod common;
pub mod error;
pub mod runtime;
pub mod storage;

pub use error::{ConfigError, MiniBatchError, MiniBatchResult};
pub use runtime::operators::mini_batch::{BatchState, FlushSummary, MiniBatchGroupOperator};
