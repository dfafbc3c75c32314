//! Delivery executor: runs the handler over a batch and acknowledges it.
//!
//! This is the only place acknowledgment happens. Per message:
//!
//! | outcome                              | event               | acked |
//! |--------------------------------------|---------------------|-------|
//! | handler ok                           | -                   | yes   |
//! | handler failed, count < max          | `message-error`     | no    |
//! | handler failed, count >= max         | `message-abandoned` | yes   |
//! | unparseable, count < max             | `error` (with raw)  | no    |
//! | unparseable, count >= max            | `error` (with raw)  | yes   |
//!
//! Exactly one ack call is issued per batch, covering every acked id.

use crate::events::EventChannel;
use crate::handler::MessageHandler;
use crate::message::{DeliveryMetadata, Message, MessageBody};
use crate::store::{RawEntry, StreamStore};
use futures_util::future::join_all;
use futures_util::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

/// Deliver counts for entries that are not on their first delivery, by id.
pub type DeliveryOverrides = HashMap<String, u32>;

/// What happened to one message of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Handled,
    Retry,
    Abandoned,
}

/// Ids acknowledged and left pending by one `deliver` call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub acked: Vec<String>,
    pub pending: Vec<String>,
}

/// Runs handlers for one consumer identity.
pub struct DeliveryExecutor<T> {
    store: Arc<dyn StreamStore>,
    group: String,
    handler: Arc<dyn MessageHandler<T>>,
    events: Arc<EventChannel<T>>,
    max_deliver_times: u32,
}

impl<T: MessageBody> DeliveryExecutor<T> {
    pub fn new(
        store: Arc<dyn StreamStore>,
        group: impl Into<String>,
        handler: Arc<dyn MessageHandler<T>>,
        events: Arc<EventChannel<T>>,
        max_deliver_times: u32,
    ) -> Self {
        Self {
            store,
            group: group.into(),
            handler,
            events,
            max_deliver_times,
        }
    }

    /// Handle a batch fetched from `topic` and acknowledge what is done with.
    ///
    /// Entries missing from `overrides` are on their first delivery. Never
    /// fails: every problem is published on the event channel.
    pub async fn deliver(
        &self,
        topic: &str,
        entries: Vec<RawEntry>,
        overrides: &DeliveryOverrides,
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        if entries.is_empty() {
            return report;
        }

        let mut messages = Vec::with_capacity(entries.len());
        for raw in entries {
            let deliver_count = overrides.get(&raw.id).copied().unwrap_or(1);
            match Message::<T>::from_raw(topic, &raw, DeliveryMetadata::with_count(deliver_count)) {
                Ok(message) => messages.push(message),
                Err(e) => {
                    let id = raw.id.clone();
                    self.events.parse_error(e.into(), raw);
                    if deliver_count >= self.max_deliver_times {
                        warn!(
                            topic = %topic,
                            message_id = %id,
                            deliver_count,
                            "Dropping unparseable entry after final delivery"
                        );
                        report.acked.push(id);
                    } else {
                        report.pending.push(id);
                    }
                }
            }
        }

        let outcomes = join_all(messages.iter().map(|message| self.run_handler(message))).await;

        for (message, outcome) in messages.iter().zip(outcomes) {
            match outcome {
                Outcome::Handled | Outcome::Abandoned => {
                    report.acked.push(message.id().to_string())
                }
                Outcome::Retry => report.pending.push(message.id().to_string()),
            }
        }

        if !report.acked.is_empty() {
            self.ack(topic, &report.acked).await;
        }

        report
    }

    async fn run_handler(&self, message: &Message<T>) -> Outcome {
        let result = AssertUnwindSafe(self.handler.handle(message))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(anyhow::anyhow!("handler panicked")));

        let error = match result {
            Ok(()) => {
                debug!(
                    topic = %message.topic(),
                    message_id = %message.id(),
                    deliver_count = message.deliver_count(),
                    "Message handled"
                );
                return Outcome::Handled;
            }
            Err(e) => Arc::new(e),
        };

        if message.deliver_count() >= self.max_deliver_times {
            self.events.message_abandoned(error, message.clone());
            Outcome::Abandoned
        } else {
            self.events.message_error(error, message.clone());
            Outcome::Retry
        }
    }

    async fn ack(&self, topic: &str, ids: &[String]) {
        match self.store.ack(topic, &self.group, ids).await {
            Ok(acked) => {
                debug!(
                    topic = %topic,
                    group = %self.group,
                    requested = ids.len(),
                    acked,
                    "Messages acknowledged"
                );
            }
            Err(e) => self.events.error(e),
        }
    }
}
