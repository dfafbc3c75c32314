//! Stale reclaim: take over entries left unacknowledged past the timeout.
//!
//! Each topic keeps its own scan position over the group's pending list. A
//! page that comes back empty resets the position, so the scan wraps around
//! and keeps revisiting the whole pending set. Entries bunched at the front of
//! a large pending set are revisited more often than the tail.

use super::ConsumerInner;
use crate::executor::DeliveryOverrides;
use crate::message::MessageBody;
use crate::store::{PendingCursor, PendingEntry};
use futures_util::future::join_all;
use std::time::Instant;
use tracing::debug;

/// Per-topic scan positions. Private to one consumer.
pub(crate) struct ScanCursors {
    cursors: Vec<(String, PendingCursor)>,
}

impl ScanCursors {
    pub(crate) fn new(topics: &[String]) -> Self {
        Self {
            cursors: topics
                .iter()
                .map(|topic| (topic.clone(), PendingCursor::Start))
                .collect(),
        }
    }

    #[cfg(test)]
    pub(crate) fn position(&self, topic: &str) -> Option<&PendingCursor> {
        self.cursors
            .iter()
            .find(|(t, _)| t == topic)
            .map(|(_, cursor)| cursor)
    }
}

/// Sweep until stopped, one sweep per stale interval.
pub(crate) async fn run<T: MessageBody>(inner: &ConsumerInner<T>) {
    let mut scan = ScanCursors::new(&inner.topics);

    while !inner.is_stopped() {
        let started = Instant::now();
        sweep_once(inner, &mut scan).await;
        inner
            .pause(inner.config.stale_interval.saturating_sub(started.elapsed()))
            .await;
    }
}

/// One sweep over every topic, concurrently.
pub(crate) async fn sweep_once<T: MessageBody>(inner: &ConsumerInner<T>, scan: &mut ScanCursors) {
    join_all(
        scan.cursors
            .iter_mut()
            .map(|(topic, cursor)| sweep_topic(inner, topic.as_str(), cursor)),
    )
    .await;
}

async fn sweep_topic<T: MessageBody>(
    inner: &ConsumerInner<T>,
    topic: &str,
    cursor: &mut PendingCursor,
) {
    let page = match inner
        .store
        .list_pending(topic, &inner.group, cursor, inner.config.batch_size)
        .await
    {
        Ok(page) => page,
        Err(e) => {
            inner.events.error(e);
            return;
        }
    };

    let Some(last) = page.last() else {
        *cursor = PendingCursor::Start;
        return;
    };
    let page_end = PendingCursor::After(last.id.clone());

    // Strictly past the timeout; the claim re-checks idleness at the store
    let stale: Vec<&PendingEntry> = page
        .iter()
        .filter(|entry| entry.idle > inner.config.timeout)
        .collect();
    if stale.is_empty() {
        *cursor = page_end;
        return;
    }

    let ids: Vec<String> = stale.iter().map(|entry| entry.id.clone()).collect();
    let claimed = match inner
        .store
        .claim(
            topic,
            &inner.group,
            &inner.consumer_id,
            inner.config.timeout,
            &ids,
        )
        .await
    {
        Ok(claimed) => claimed,
        Err(e) => {
            // Page is retried on the next sweep
            inner.events.error(e);
            return;
        }
    };
    *cursor = page_end;

    debug!(
        consumer = %inner.consumer_id,
        topic = %topic,
        stale = ids.len(),
        claimed = claimed.len(),
        "Claimed stale messages"
    );

    // The claim bumped the store's counter by one
    let overrides: DeliveryOverrides = stale
        .iter()
        .map(|entry| (entry.id.clone(), entry.deliver_count.saturating_add(1)))
        .collect();

    inner.executor.deliver(topic, claimed, &overrides).await;
}
