//! Events surfaced to the embedding application.
//!
//! Steady-state failures never propagate out of the delivery loops; they are
//! published here instead. Every subscriber gets its own unbounded queue, so a
//! slow subscriber never loses an event. An abandoned message is queued before
//! its acknowledgment is sent.

use crate::error::ConveyorError;
use crate::message::Message;
use crate::store::RawEntry;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

/// Receiving side handed out by [`EventChannel::subscribe`].
pub type EventReceiver<T> = mpsc::UnboundedReceiver<ConsumerEvent<T>>;

/// Something the application may want to react to.
#[derive(Debug, Clone)]
pub enum ConsumerEvent<T> {
    /// Loop-level or infrastructure failure, including unparseable entries
    /// (in which case `raw` holds the offending entry).
    Error {
        error: Arc<ConveyorError>,
        raw: Option<RawEntry>,
    },

    /// Handler failed; the message stays pending and will be redelivered.
    MessageError {
        error: Arc<anyhow::Error>,
        message: Message<T>,
    },

    /// Handler failed on the last allowed delivery. The message is acknowledged
    /// right after this event is queued.
    MessageAbandoned {
        error: Arc<anyhow::Error>,
        message: Message<T>,
    },
}

impl<T> ConsumerEvent<T> {
    /// Short kind name, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ConsumerEvent::Error { .. } => "error",
            ConsumerEvent::MessageError { .. } => "message-error",
            ConsumerEvent::MessageAbandoned { .. } => "message-abandoned",
        }
    }
}

/// Publishing side of the event channel, owned by one consumer.
#[derive(Debug)]
pub struct EventChannel<T> {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ConsumerEvent<T>>>>,
    label: String,
}

impl<T: Clone> EventChannel<T> {
    /// `label` identifies the consumer in log lines (e.g. `id|group`).
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            label: label.into(),
        }
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> EventReceiver<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Report an infrastructure failure.
    pub fn error(&self, error: ConveyorError) {
        warn!(consumer = %self.label, error = %error, "Consumer error");
        self.publish(ConsumerEvent::Error {
            error: Arc::new(error),
            raw: None,
        });
    }

    /// Report an entry that could not be parsed.
    pub fn parse_error(&self, error: ConveyorError, raw: RawEntry) {
        warn!(
            consumer = %self.label,
            message_id = %raw.id,
            error = %error,
            "Failed to parse stream entry"
        );
        self.publish(ConsumerEvent::Error {
            error: Arc::new(error),
            raw: Some(raw),
        });
    }

    pub fn message_error(&self, error: Arc<anyhow::Error>, message: Message<T>) {
        warn!(
            consumer = %self.label,
            topic = %message.topic(),
            message_id = %message.id(),
            deliver_count = message.deliver_count(),
            error = %error,
            "Handler failed, message left pending"
        );
        self.publish(ConsumerEvent::MessageError { error, message });
    }

    pub fn message_abandoned(&self, error: Arc<anyhow::Error>, message: Message<T>) {
        warn!(
            consumer = %self.label,
            topic = %message.topic(),
            message_id = %message.id(),
            deliver_count = message.deliver_count(),
            error = %error,
            "Handler failed on final delivery, abandoning message"
        );
        self.publish(ConsumerEvent::MessageAbandoned { error, message });
    }

    fn publish(&self, event: ConsumerEvent<T>) {
        let mut subscribers = self.subscribers.lock();
        // Dropped receivers are pruned; no subscribers is fine, the event was logged
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
