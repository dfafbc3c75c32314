//! Backlog recovery: drain this consumer's own unacknowledged entries once.

use super::ConsumerInner;
use crate::executor::DeliveryOverrides;
use crate::message::MessageBody;
use crate::store::{RawEntry, ReadCursor, TopicEntries};
use futures_util::future::join_all;
use tracing::debug;

/// Re-read everything still pending under this consumer id, from the start of
/// its history, until no topic returns anything.
///
/// A topic drops out once it comes back empty. A failed read is reported and
/// retried with the same cursors after the poll interval.
pub(crate) async fn drain<T: MessageBody>(inner: &ConsumerInner<T>) {
    let mut cursors: Vec<(String, ReadCursor)> = inner
        .topics
        .iter()
        .map(|topic| (topic.clone(), ReadCursor::beginning()))
        .collect();
    let mut recovered = 0usize;

    while !inner.is_stopped() && !cursors.is_empty() {
        let streams = match inner
            .store
            .read_group(
                &inner.group,
                &inner.consumer_id,
                &cursors,
                inner.config.batch_size,
            )
            .await
        {
            Ok(streams) => streams,
            Err(e) => {
                inner.events.error(e);
                inner.pause(inner.config.poll_interval).await;
                continue;
            }
        };

        let mut next = Vec::new();
        let mut batches = Vec::new();
        for stream in streams {
            if let Some(last) = stream.entries.last() {
                next.push((stream.topic.clone(), ReadCursor::After(last.id.clone())));
                recovered += stream.entries.len();
                batches.push(stream);
            }
        }

        join_all(
            batches
                .into_iter()
                .map(|TopicEntries { topic, entries }| redeliver(inner, topic, entries)),
        )
        .await;

        cursors = next;
    }

    debug!(
        consumer = %inner.consumer_id,
        group = %inner.group,
        recovered,
        "Backlog recovery finished"
    );
}

/// Deliver one recovered batch with the delivery counts the store holds.
///
/// The counts come from this consumer's pending records for the batch's id
/// range. Entries no longer owned by this consumer are skipped. If the
/// records cannot be listed the batch is left pending for the stale loop,
/// which reclaims it with correct counts once it times out.
async fn redeliver<T: MessageBody>(
    inner: &ConsumerInner<T>,
    topic: String,
    entries: Vec<RawEntry>,
) {
    let (Some(first), Some(last)) = (entries.first(), entries.last()) else {
        return;
    };

    let records = match inner
        .store
        .list_consumer_pending(
            &topic,
            &inner.group,
            &inner.consumer_id,
            &first.id,
            &last.id,
            entries.len(),
        )
        .await
    {
        Ok(records) => records,
        Err(e) => {
            inner.events.error(e);
            return;
        }
    };

    let overrides: DeliveryOverrides = records
        .into_iter()
        .map(|record| (record.id, record.deliver_count))
        .collect();
    let owned: Vec<RawEntry> = entries
        .into_iter()
        .filter(|entry| overrides.contains_key(&entry.id))
        .collect();

    inner.executor.deliver(&topic, owned, &overrides).await;
}
