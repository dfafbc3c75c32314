//! Live consumption: poll for entries never delivered to the group.

use super::ConsumerInner;
use crate::executor::DeliveryOverrides;
use crate::message::MessageBody;
use crate::store::{ReadCursor, TopicEntries};
use futures_util::future::join_all;
use std::time::Instant;
use tracing::trace;

/// Poll until stopped. A cycle that overruns the poll interval is followed
/// immediately by the next one.
pub(crate) async fn run<T: MessageBody>(inner: &ConsumerInner<T>) {
    let cursors: Vec<(String, ReadCursor)> = inner
        .topics
        .iter()
        .map(|topic| (topic.clone(), ReadCursor::New))
        .collect();

    while !inner.is_stopped() {
        let started = Instant::now();
        poll_once(inner, &cursors).await;
        inner
            .pause(inner.config.poll_interval.saturating_sub(started.elapsed()))
            .await;
    }
}

/// One cycle: fetch new entries for every topic and deliver each topic's
/// batch concurrently. Returns the number of entries fetched.
pub(crate) async fn poll_once<T: MessageBody>(
    inner: &ConsumerInner<T>,
    cursors: &[(String, ReadCursor)],
) -> usize {
    let streams = match inner
        .store
        .read_group(
            &inner.group,
            &inner.consumer_id,
            cursors,
            inner.config.batch_size,
        )
        .await
    {
        Ok(streams) => streams,
        Err(e) => {
            inner.events.error(e);
            return 0;
        }
    };

    let fetched: usize = streams.iter().map(|s| s.entries.len()).sum();
    if fetched > 0 {
        trace!(consumer = %inner.consumer_id, fetched, "Fetched new messages");
    }

    let overrides = DeliveryOverrides::new();
    join_all(streams.into_iter().map(|TopicEntries { topic, entries }| {
        let overrides = &overrides;
        async move { inner.executor.deliver(&topic, entries, overrides).await }
    }))
    .await;

    fetched
}
