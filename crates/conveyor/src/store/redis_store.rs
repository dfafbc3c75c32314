//! Redis Streams implementation of [`StreamStore`].
//!
//! Issues XGROUP / XREADGROUP / XPENDING / XCLAIM / XACK / XADD over a shared
//! multiplexed connection and parses the raw replies.

use super::{
    GroupCreation, PendingCursor, PendingEntry, RawEntry, ReadCursor, StreamStore, TopicEntries,
};
use crate::error::{ConveyorError, ConveyorResult};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, RedisError, RedisResult, Value};
use std::time::Duration;
use tracing::{debug, info, trace};

/// Redis Streams backed store.
///
/// Cloning is cheap; clones share the underlying multiplexed connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
}

impl RedisStore {
    /// Open a new multiplexed connection from `client`.
    pub async fn connect(client: &Client) -> ConveyorResult<Self> {
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { conn })
    }

    /// Wrap an existing connection.
    pub fn from_connection(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl StreamStore for RedisStore {
    async fn create_group(&self, topic: &str, group: &str) -> ConveyorResult<GroupCreation> {
        // XGROUP CREATE key group 0 MKSTREAM
        // Starting at 0 lets a new group see entries appended before it existed
        let result: RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(topic)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut self.conn.clone())
            .await;

        match result {
            Ok(()) => {
                info!(topic = %topic, group = %group, "Created consumer group");
                Ok(GroupCreation::Created)
            }
            Err(e) if is_busy_group(&e) => {
                debug!(topic = %topic, group = %group, "Consumer group already exists");
                Ok(GroupCreation::AlreadyExists)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        cursors: &[(String, ReadCursor)],
        count: usize,
    ) -> ConveyorResult<Vec<TopicEntries>> {
        if cursors.is_empty() {
            return Ok(Vec::new());
        }

        // XREADGROUP GROUP group consumer COUNT n STREAMS key [key ...] id [id ...]
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(group)
            .arg(consumer)
            .arg("COUNT")
            .arg(count)
            .arg("STREAMS");
        for (topic, _) in cursors {
            cmd.arg(topic);
        }
        for (_, cursor) in cursors {
            match cursor {
                ReadCursor::New => cmd.arg(">"),
                ReadCursor::After(id) => cmd.arg(id),
            };
        }

        let value: Value = cmd.query_async(&mut self.conn.clone()).await?;
        parse_read_reply(value)
    }

    async fn list_pending(
        &self,
        topic: &str,
        group: &str,
        start: &PendingCursor,
        count: usize,
    ) -> ConveyorResult<Vec<PendingEntry>> {
        // XPENDING key group start end count (exclusive start needs Redis >= 6.2)
        let start = match start {
            PendingCursor::Start => "-".to_string(),
            PendingCursor::After(id) => format!("({}", id),
        };

        let value: Value = redis::cmd("XPENDING")
            .arg(topic)
            .arg(group)
            .arg(start)
            .arg("+")
            .arg(count)
            .query_async(&mut self.conn.clone())
            .await?;

        parse_pending_reply(value)
    }

    async fn list_consumer_pending(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        first: &str,
        last: &str,
        count: usize,
    ) -> ConveyorResult<Vec<PendingEntry>> {
        // XPENDING key group start end count consumer
        let value: Value = redis::cmd("XPENDING")
            .arg(topic)
            .arg(group)
            .arg(first)
            .arg(last)
            .arg(count)
            .arg(consumer)
            .query_async(&mut self.conn.clone())
            .await?;

        parse_pending_reply(value)
    }

    async fn claim(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        ids: &[String],
    ) -> ConveyorResult<Vec<RawEntry>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        // XCLAIM key group consumer min-idle-time id [id ...]
        let value: Value = redis::cmd("XCLAIM")
            .arg(topic)
            .arg(group)
            .arg(consumer)
            .arg(min_idle.as_millis() as u64)
            .arg(ids)
            .query_async(&mut self.conn.clone())
            .await?;

        parse_entries(&value)
    }

    async fn ack(&self, topic: &str, group: &str, ids: &[String]) -> ConveyorResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let acked: i64 = self.conn.clone().xack(topic, group, ids).await?;
        trace!(topic = %topic, group = %group, requested = ids.len(), acked, "XACK");
        Ok(acked.max(0) as u64)
    }

    async fn append(
        &self,
        topic: &str,
        fields: &[(String, String)],
        max_len: Option<usize>,
    ) -> ConveyorResult<String> {
        // XADD key [MAXLEN ~ n] * field value [field value ...]
        let mut cmd = redis::cmd("XADD");
        cmd.arg(topic);
        if let Some(max_len) = max_len {
            cmd.arg("MAXLEN").arg("~").arg(max_len);
        }
        cmd.arg("*");
        for (field, value) in fields {
            cmd.arg(field).arg(value);
        }

        let id: String = cmd.query_async(&mut self.conn.clone()).await?;
        Ok(id)
    }
}

fn is_busy_group(err: &RedisError) -> bool {
    err.code() == Some("BUSYGROUP") || err.to_string().contains("BUSYGROUP")
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::BulkString(s) => Some(String::from_utf8_lossy(s).to_string()),
        Value::SimpleString(s) => Some(s.clone()),
        Value::VerbatimString { text, .. } => Some(text.clone()),
        Value::Int(i) => Some(i.to_string()),
        _ => None,
    }
}

fn value_to_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Int(i) => u64::try_from(*i).ok(),
        other => value_to_string(other).and_then(|s| s.parse().ok()),
    }
}

/// Parse an XREADGROUP reply.
///
/// RESP2: `[[key, [[id, [f, v, ...]], ...]], ...]`; RESP3 returns a map of
/// key to entries. `Nil` means nothing was available.
fn parse_read_reply(value: Value) -> ConveyorResult<Vec<TopicEntries>> {
    let pairs: Vec<(Value, Value)> = match value {
        Value::Nil => return Ok(Vec::new()),
        Value::Map(map) => map,
        Value::Array(streams) => streams
            .into_iter()
            .map(|stream| match stream {
                Value::Array(mut parts) if parts.len() >= 2 => {
                    let entries = parts.swap_remove(1);
                    let key = parts.swap_remove(0);
                    Ok((key, entries))
                }
                other => Err(ConveyorError::Protocol(format!(
                    "Expected [key, entries] for stream, got {:?}",
                    other
                ))),
            })
            .collect::<ConveyorResult<_>>()?,
        other => {
            return Err(ConveyorError::Protocol(format!(
                "Unexpected XREADGROUP response type: {:?}",
                other
            )))
        }
    };

    pairs
        .into_iter()
        .map(|(key, entries)| {
            let topic = value_to_string(&key).ok_or_else(|| {
                ConveyorError::Protocol(format!("Expected string for stream key, got {:?}", key))
            })?;
            Ok(TopicEntries {
                topic,
                entries: parse_entries(&entries)?,
            })
        })
        .collect()
}

/// Parse a list of `[id, [f, v, ...]]` entries.
///
/// `Nil` items (entries deleted since they were delivered) are skipped, and an
/// entry whose field list is `Nil` comes back with no fields.
fn parse_entries(value: &Value) -> ConveyorResult<Vec<RawEntry>> {
    let items = match value {
        Value::Array(items) => items,
        Value::Nil => return Ok(Vec::new()),
        other => {
            return Err(ConveyorError::Protocol(format!(
                "Expected array of entries, got {:?}",
                other
            )))
        }
    };

    let mut entries = Vec::with_capacity(items.len());
    for item in items {
        let parts = match item {
            Value::Nil => continue,
            Value::Array(parts) if parts.len() >= 2 => parts,
            other => {
                return Err(ConveyorError::Protocol(format!(
                    "Expected [id, fields] for entry, got {:?}",
                    other
                )))
            }
        };

        let id = value_to_string(&parts[0]).ok_or_else(|| {
            ConveyorError::Protocol(format!("Expected string for entry ID, got {:?}", parts[0]))
        })?;

        let fields = match &parts[1] {
            Value::Array(flat) => flat
                .chunks_exact(2)
                .filter_map(|pair| Some((value_to_string(&pair[0])?, value_to_string(&pair[1])?)))
                .collect(),
            Value::Map(map) => map
                .iter()
                .filter_map(|(k, v)| Some((value_to_string(k)?, value_to_string(v)?)))
                .collect(),
            Value::Nil => Vec::new(),
            other => {
                return Err(ConveyorError::Protocol(format!(
                    "Expected array for fields of {}, got {:?}",
                    id, other
                )))
            }
        };

        entries.push(RawEntry { id, fields });
    }

    Ok(entries)
}

/// Parse the extended XPENDING reply: `[[id, consumer, idle_ms, count], ...]`.
fn parse_pending_reply(value: Value) -> ConveyorResult<Vec<PendingEntry>> {
    let rows = match value {
        Value::Array(rows) => rows,
        Value::Nil => return Ok(Vec::new()),
        other => {
            return Err(ConveyorError::Protocol(format!(
                "Unexpected XPENDING response type: {:?}",
                other
            )))
        }
    };

    rows.iter()
        .map(|row| {
            let fields = match row {
                Value::Array(fields) if fields.len() >= 4 => fields,
                other => {
                    return Err(ConveyorError::Protocol(format!(
                        "Expected [id, consumer, idle, count] for pending entry, got {:?}",
                        other
                    )))
                }
            };

            let malformed = || {
                ConveyorError::Protocol(format!("Malformed pending entry: {:?}", fields))
            };

            Ok(PendingEntry {
                id: value_to_string(&fields[0]).ok_or_else(malformed)?,
                consumer: value_to_string(&fields[1]).ok_or_else(malformed)?,
                idle: Duration::from_millis(value_to_u64(&fields[2]).ok_or_else(malformed)?),
                deliver_count: value_to_u64(&fields[3])
                    .and_then(|c| u32::try_from(c).ok())
                    .ok_or_else(malformed)?,
            })
        })
        .collect()
}
