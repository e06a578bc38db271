use std::fmt;

use anyhow::Result;
use async_trait::async_trait;

use crate::runtime::message::Message;
use crate::runtime::runtime_context::RuntimeContext;

#[async_trait]
pub trait OperatorTrait: Send + fmt::Debug {
    async fn open(&mut self, context: &RuntimeContext) -> Result<()>;
    /// Shuts the operator down. Returns whatever it still had to emit.
    async fn close(&mut self) -> Result<Vec<Message>>;
    async fn process_message(&mut self, message: Message) -> Result<Vec<Message>>;
}
