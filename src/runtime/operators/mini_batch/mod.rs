pub mod mini_batch_group_operator;
pub mod mini_batch_stream_operator;

pub use mini_batch_group_operator::{BatchState, FlushSummary, MiniBatchGroupOperator};
pub use mini_batch_stream_operator::MiniBatchStreamOperator;
