//! Producer: append payloads to a topic.

use crate::error::ConveyorResult;
use crate::message::{Payload, PAYLOAD_FIELD};
use crate::store::StreamStore;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Options for a single append.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Trim the topic to approximately this many entries.
    pub max_len: Option<usize>,
}

/// Appends JSON payloads under the `payload` field, the format consumers parse.
#[derive(Clone)]
pub struct Producer {
    store: Arc<dyn StreamStore>,
}

impl Producer {
    pub fn new(store: Arc<dyn StreamStore>) -> Self {
        Self { store }
    }

    /// Append `payload` to `topic`, returning the store-assigned id.
    pub async fn send<T: Serialize>(
        &self,
        topic: &str,
        payload: &Payload<T>,
        options: SendOptions,
    ) -> ConveyorResult<String> {
        let encoded = serde_json::to_string(payload)?;
        let fields = [(PAYLOAD_FIELD.to_string(), encoded)];

        let id = self.store.append(topic, &fields, options.max_len).await?;
        debug!(topic = %topic, message_id = %id, max_len = ?options.max_len, "Message appended");
        Ok(id)
    }
}
