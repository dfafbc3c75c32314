//! Conveyor: at-least-once consumer groups over Redis Streams.
//!
//! Several consumer processes share topics through a consumer group. Each
//! entry is handed to one consumer, retried on failure, reclaimed from peers
//! that crash or hang, and abandoned after a bounded number of deliveries.
//!
//! # Core Invariants
//!
//! 1. **Ack-Gated**: an entry is acknowledged only after its handler succeeded
//!    or it ran out of deliveries
//! 2. **One Ack Per Batch**: each fetched batch ends in a single XACK per topic
//! 3. **Bounded Retry**: a failing message is delivered at most
//!    `max_deliver_times` times, then abandoned exactly once
//! 4. **Crash-Safe**: entries left pending by a dead consumer are reclaimed
//!    once idle past the timeout
//!
//! # Architecture
//!
//! ```text
//!            +--> backlog recovery (once) --+
//! Redis  ----+                              +--> DeliveryExecutor --> handler
//! Stream     +--> live polling -------------+          |
//!    ^       +--> stale reclaim (XCLAIM) ---+          |
//!    |________________ XACK <_____________________________|
//! ```
//!
//! Failures inside the loops never reach the caller; subscribe to
//! [`ConsumerEvent`]s to observe them.

pub mod client;
pub mod config;
pub mod consumer;
pub mod error;
pub mod events;
pub mod executor;
pub mod handler;
pub mod logging;
pub mod message;
pub mod producer;
pub mod store;

#[cfg(test)]
mod tests;

pub use client::{ConsumerOptions, Conveyor};
pub use config::{ConsumerConfig, ConveyorConfig};
pub use consumer::{Consumer, ConsumerState};
pub use error::{ConveyorError, ConveyorResult, ParseError};
pub use events::{ConsumerEvent, EventReceiver};
pub use executor::{DeliveryExecutor, DeliveryOverrides, DeliveryReport};
pub use handler::MessageHandler;
pub use message::{DeliveryMetadata, Header, Message, MessageBody, Payload};
pub use producer::{Producer, SendOptions};
pub use store::{
    GroupCreation, PendingCursor, PendingEntry, RawEntry, ReadCursor, RedisStore, StreamStore,
    TopicEntries,
};
