//! Entry point wiring a Redis connection to producers and consumers.

use crate::config::{ConsumerConfig, ConveyorConfig};
use crate::consumer::Consumer;
use crate::error::ConveyorResult;
use crate::handler::MessageHandler;
use crate::message::MessageBody;
use crate::producer::Producer;
use crate::store::{RedisStore, StreamStore};
use redis::Client;
use std::sync::Arc;
use tracing::info;

/// Options for [`Conveyor::consumer`].
#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    pub config: ConsumerConfig,
    /// Reuse the client's connection instead of opening a dedicated one.
    pub share_connection: bool,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            config: ConsumerConfig::default(),
            share_connection: true,
        }
    }
}

/// A connected client. Producers and consumers built from it share one
/// multiplexed connection unless asked otherwise.
pub struct Conveyor {
    config: ConveyorConfig,
    client: Client,
    shared: RedisStore,
}

impl Conveyor {
    pub async fn connect(config: ConveyorConfig) -> ConveyorResult<Self> {
        let client = Client::open(config.redis_url.as_str())?;
        let shared = RedisStore::connect(&client).await?;

        info!(consumer = %config.consumer_id, "Connected to Redis");

        Ok(Self {
            config,
            client,
            shared,
        })
    }

    pub fn consumer_id(&self) -> &str {
        &self.config.consumer_id
    }

    pub async fn producer(&self, share_connection: bool) -> ConveyorResult<Producer> {
        Ok(Producer::new(self.store(share_connection).await?))
    }

    /// Build a consumer for `group` over `topics`. Call
    /// [`Consumer::start`] to begin delivery.
    pub async fn consumer<T, H>(
        &self,
        group: &str,
        topics: Vec<String>,
        handler: H,
        options: ConsumerOptions,
    ) -> ConveyorResult<Consumer<T>>
    where
        T: MessageBody,
        H: MessageHandler<T> + 'static,
    {
        let store = self.store(options.share_connection).await?;
        Consumer::new(
            store,
            self.config.consumer_id.clone(),
            group,
            topics,
            Arc::new(handler),
            options.config,
        )
    }

    async fn store(&self, share_connection: bool) -> ConveyorResult<Arc<dyn StreamStore>> {
        if share_connection {
            Ok(Arc::new(self.shared.clone()))
        } else {
            Ok(Arc::new(RedisStore::connect(&self.client).await?))
        }
    }
}
