//! Log store contract consumed by the delivery loops.
//!
//! The store owns durability, ordering and consumer-group bookkeeping. The
//! consumer only relies on the operations below being atomic per call.

mod redis_store;

pub use redis_store::RedisStore;

use crate::error::ConveyorResult;
use async_trait::async_trait;
use std::time::Duration;

/// An entry as returned by the store, before payload parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    pub id: String,
    /// Field/value pairs in store order.
    pub fields: Vec<(String, String)>,
}

impl RawEntry {
    /// First value stored under `name`.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Entries returned for one topic by a group read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicEntries {
    pub topic: String,
    pub entries: Vec<RawEntry>,
}

/// A delivered-but-unacknowledged entry as reported by the pending listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub id: String,
    pub consumer: String,
    pub idle: Duration,
    pub deliver_count: u32,
}

/// Where a group read starts for one topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadCursor {
    /// Entries never delivered to any consumer of the group.
    New,
    /// This consumer's own pending entries with ids greater than the given one.
    /// `After("0")` starts from the beginning of its history.
    After(String),
}

impl ReadCursor {
    pub fn beginning() -> Self {
        ReadCursor::After("0".to_string())
    }
}

/// Where a pending listing page starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingCursor {
    Start,
    /// Strictly after the given id.
    After(String),
}

/// Outcome of an idempotent group creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupCreation {
    Created,
    AlreadyExists,
}

/// Operations the consumer needs from an append-only log store.
#[async_trait]
pub trait StreamStore: Send + Sync {
    /// Create `group` on `topic` (creating the topic if needed).
    async fn create_group(&self, topic: &str, group: &str) -> ConveyorResult<GroupCreation>;

    /// Read up to `count` entries per topic, assigning them to `consumer`.
    ///
    /// Topics with nothing to return may be omitted from the result.
    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        cursors: &[(String, ReadCursor)],
        count: usize,
    ) -> ConveyorResult<Vec<TopicEntries>>;

    /// One page of the group's pending entries on `topic`, in id order.
    async fn list_pending(
        &self,
        topic: &str,
        group: &str,
        start: &PendingCursor,
        count: usize,
    ) -> ConveyorResult<Vec<PendingEntry>>;

    /// Pending entries owned by `consumer` with ids in `first..=last`.
    ///
    /// Each record's delivery count already includes the read that returned it.
    async fn list_consumer_pending(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        first: &str,
        last: &str,
        count: usize,
    ) -> ConveyorResult<Vec<PendingEntry>>;

    /// Reassign `ids` to `consumer` if they are still idle for at least
    /// `min_idle`. Returns only the entries actually reassigned.
    async fn claim(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        ids: &[String],
    ) -> ConveyorResult<Vec<RawEntry>>;

    /// Remove `ids` from the pending set. Returns how many were removed.
    async fn ack(&self, topic: &str, group: &str, ids: &[String]) -> ConveyorResult<u64>;

    /// Append an entry, optionally trimming the topic to roughly `max_len`.
    async fn append(
        &self,
        topic: &str,
        fields: &[(String, String)],
        max_len: Option<usize>,
    ) -> ConveyorResult<String>;
}
