pub mod collector;
pub mod message;
pub mod operators;
pub mod runtime_context;
