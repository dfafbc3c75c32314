//! User message handlers.

use crate::message::Message;
use async_trait::async_trait;
use std::future::Future;

/// Processes one delivered message.
///
/// Handlers run concurrently within a batch and must be idempotent: a message
/// whose acknowledgment fails is delivered again.
#[async_trait]
pub trait MessageHandler<T>: Send + Sync {
    async fn handle(&self, message: &Message<T>) -> anyhow::Result<()>;
}

/// Any `Fn(Message<T>) -> impl Future<Output = anyhow::Result<()>>` is a handler.
#[async_trait]
impl<T, F, Fut> MessageHandler<T> for F
where
    T: Clone + Send + Sync + 'static,
    F: Fn(Message<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, message: &Message<T>) -> anyhow::Result<()> {
        (self)(message.clone()).await
    }
}
