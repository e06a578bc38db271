pub mod mini_batch;
pub mod operator;
