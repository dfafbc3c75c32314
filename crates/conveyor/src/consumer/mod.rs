//! Consumer: lifecycle and the three delivery loops.
//!
//! ```text
//! Created -> Starting -> Recovering -> Running -> Stopping -> Stopped
//!              |  (group creation)  (backlog)   (live + stale)
//!              +--> Stopped on startup failure
//! ```
//!
//! On start the backlog of this consumer's own unacknowledged entries is
//! drained once, then live consumption and stale reclaim run side by side
//! until [`Consumer::stop`] is called. Every fetched batch goes through the
//! [`DeliveryExecutor`].

mod live;
mod recovery;
mod stale;

use crate::config::ConsumerConfig;
use crate::error::{ConveyorError, ConveyorResult};
use crate::events::{EventChannel, EventReceiver};
use crate::executor::DeliveryExecutor;
use crate::handler::MessageHandler;
use crate::message::MessageBody;
use crate::store::StreamStore;
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// Lifecycle state of a [`Consumer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Created,
    /// Consumer groups are being created.
    Starting,
    /// Draining this consumer's own backlog.
    Recovering,
    /// Live and stale loops active.
    Running,
    /// Stop requested; loops exit at their next cycle boundary.
    Stopping,
    /// All loops have exited. Terminal.
    Stopped,
}

/// A member of a consumer group reading one or more topics.
pub struct Consumer<T> {
    inner: Arc<ConsumerInner<T>>,
}

pub(crate) struct ConsumerInner<T> {
    store: Arc<dyn StreamStore>,
    consumer_id: String,
    group: String,
    topics: Vec<String>,
    config: ConsumerConfig,
    executor: DeliveryExecutor<T>,
    events: Arc<EventChannel<T>>,
    state: watch::Sender<ConsumerState>,
    stop: watch::Sender<bool>,
}

impl<T: MessageBody> Consumer<T> {
    /// Create a consumer. Nothing touches the store until [`start`](Self::start).
    pub fn new(
        store: Arc<dyn StreamStore>,
        consumer_id: impl Into<String>,
        group: impl Into<String>,
        topics: Vec<String>,
        handler: Arc<dyn MessageHandler<T>>,
        config: ConsumerConfig,
    ) -> ConveyorResult<Self> {
        config.validate()?;
        if topics.is_empty() {
            return Err(ConveyorError::Config(
                "a consumer needs at least one topic".to_string(),
            ));
        }

        let consumer_id = consumer_id.into();
        let group = group.into();
        let events = Arc::new(EventChannel::new(format!("{}|{}", consumer_id, group)));
        let executor = DeliveryExecutor::new(
            store.clone(),
            group.clone(),
            handler,
            events.clone(),
            config.max_deliver_times,
        );
        let (state, _) = watch::channel(ConsumerState::Created);
        let (stop, _) = watch::channel(false);

        Ok(Self {
            inner: Arc::new(ConsumerInner {
                store,
                consumer_id,
                group,
                topics,
                config,
                executor,
                events,
                state,
                stop,
            }),
        })
    }

    pub fn id(&self) -> &str {
        &self.inner.consumer_id
    }

    pub fn group(&self) -> &str {
        &self.inner.group
    }

    pub fn topics(&self) -> &[String] {
        &self.inner.topics
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.inner.config
    }

    /// Receive `error`, `message-error` and `message-abandoned` events.
    pub fn subscribe(&self) -> EventReceiver<T> {
        self.inner.events.subscribe()
    }

    pub fn state(&self) -> ConsumerState {
        *self.inner.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConsumerState> {
        self.inner.state.subscribe()
    }

    /// Create the consumer group on every topic, then start the loops in the
    /// background.
    ///
    /// Fails if any topic's group cannot be created for a reason other than
    /// it already existing; the consumer is then `Stopped`. Calling `start`
    /// more than once is an error.
    pub async fn start(&self) -> ConveyorResult<()> {
        if !self
            .inner
            .transition(ConsumerState::Created, ConsumerState::Starting)
        {
            return Err(ConveyorError::InvalidState(format!(
                "cannot start consumer in state {:?}",
                self.state()
            )));
        }

        if let Err(e) = self.inner.create_groups().await {
            self.inner.state.send_replace(ConsumerState::Stopped);
            return Err(e);
        }

        let inner = self.inner.clone();
        tokio::spawn(async move { inner.run().await });

        Ok(())
    }

    /// Ask every loop to exit. In-flight store calls and handlers finish first.
    ///
    /// Dropping the consumer does the same.
    pub fn stop(&self) {
        self.inner.request_stop();
    }

    /// Wait until every loop has exited.
    pub async fn stopped(&self) {
        let mut rx = self.inner.state.subscribe();
        let _ = rx.wait_for(|state| *state == ConsumerState::Stopped).await;
    }
}

impl<T: MessageBody> ConsumerInner<T> {
    async fn run(self: Arc<Self>) {
        if self.transition(ConsumerState::Starting, ConsumerState::Recovering) {
            info!(consumer = %self.consumer_id, group = %self.group, "Recovering pending messages");
            recovery::drain(&self).await;
        }

        if self.transition(ConsumerState::Recovering, ConsumerState::Running) {
            info!(
                consumer = %self.consumer_id,
                group = %self.group,
                topics = ?self.topics,
                "Consuming new messages and watching stale messages"
            );
            tokio::join!(live::run(&self), stale::run(&self));
        }

        self.state.send_replace(ConsumerState::Stopped);
        info!(consumer = %self.consumer_id, group = %self.group, "Consumer stopped");
    }

    async fn create_groups(&self) -> ConveyorResult<()> {
        let results = join_all(
            self.topics
                .iter()
                .map(|topic| self.store.create_group(topic, &self.group)),
        )
        .await;

        for (topic, result) in self.topics.iter().zip(results) {
            match result {
                Ok(outcome) => {
                    debug!(topic = %topic, group = %self.group, ?outcome, "Consumer group ready")
                }
                Err(e) => {
                    return Err(ConveyorError::GroupCreate {
                        topic: topic.clone(),
                        group: self.group.clone(),
                        source: Box::new(e),
                    })
                }
            }
        }

        Ok(())
    }
}

impl<T> Drop for Consumer<T> {
    fn drop(&mut self) {
        self.inner.request_stop();
    }
}

impl<T> ConsumerInner<T> {
    fn request_stop(&self) {
        if self.stop.send_replace(true) {
            return;
        }
        self.state.send_if_modified(|state| match state {
            ConsumerState::Created => {
                *state = ConsumerState::Stopped;
                true
            }
            ConsumerState::Starting | ConsumerState::Recovering | ConsumerState::Running => {
                *state = ConsumerState::Stopping;
                true
            }
            ConsumerState::Stopping | ConsumerState::Stopped => false,
        });
        info!(consumer = %self.consumer_id, group = %self.group, "Consumer stop requested");
    }

    /// Move `from -> to` if currently in `from`.
    fn transition(&self, from: ConsumerState, to: ConsumerState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    /// Sleep for `duration`, waking early if stop is requested.
    async fn pause(&self, duration: Duration) {
        if duration.is_zero() || self.is_stopped() {
            return;
        }
        let mut stop = self.stop.subscribe();
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = stop.wait_for(|stopped| *stopped) => {}
        }
    }
}
