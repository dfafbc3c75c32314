//! Message model: delivered entries and their delivery metadata.

use crate::error::ParseError;
use crate::store::RawEntry;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Name of the stream field holding the serialized payload.
pub const PAYLOAD_FIELD: &str = "payload";

/// Bound for message bodies the consumer can deliver.
pub trait MessageBody: DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> MessageBody for T where T: DeserializeOwned + Clone + Send + Sync + 'static {}

/// Header map carried alongside a body.
pub type Header = serde_json::Map<String, serde_json::Value>;

/// What producers append: an optional header plus a body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload<T> {
    pub body: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<Header>,
}

impl<T> Payload<T> {
    pub fn new(body: T) -> Self {
        Self { body, header: None }
    }

    pub fn with_header(body: T, header: Header) -> Self {
        Self {
            body,
            header: Some(header),
        }
    }
}

/// Per-delivery bookkeeping. Not persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryMetadata {
    /// 1 on first delivery, +1 per reclaim.
    pub deliver_count: u32,
    pub first_seen: DateTime<Utc>,
}

impl DeliveryMetadata {
    pub fn first_delivery() -> Self {
        Self::with_count(1)
    }

    pub fn with_count(deliver_count: u32) -> Self {
        Self {
            deliver_count: deliver_count.max(1),
            first_seen: Utc::now(),
        }
    }
}

/// A delivered stream entry.
///
/// Immutable once built. Two messages are equal when they share id and topic,
/// regardless of body or delivery metadata.
#[derive(Debug, Clone)]
pub struct Message<T> {
    id: String,
    topic: String,
    header: Option<Header>,
    body: T,
    metadata: DeliveryMetadata,
}

impl<T: DeserializeOwned> Message<T> {
    /// Build a message from a raw entry.
    ///
    /// Fails when the `payload` field is absent or does not deserialize into
    /// `Payload<T>`.
    pub fn from_raw(
        topic: &str,
        raw: &RawEntry,
        metadata: DeliveryMetadata,
    ) -> Result<Self, ParseError> {
        let encoded = raw
            .field(PAYLOAD_FIELD)
            .ok_or_else(|| ParseError::MissingPayload { id: raw.id.clone() })?;

        let payload: Payload<T> =
            serde_json::from_str(encoded).map_err(|source| ParseError::Malformed {
                id: raw.id.clone(),
                source,
            })?;

        Ok(Self {
            id: raw.id.clone(),
            topic: topic.to_string(),
            header: payload.header,
            body: payload.body,
            metadata,
        })
    }
}

impl<T> Message<T> {
    /// Store-assigned entry id.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn header(&self) -> Option<&Header> {
        self.header.as_ref()
    }

    pub fn body(&self) -> &T {
        &self.body
    }

    pub fn into_body(self) -> T {
        self.body
    }

    pub fn metadata(&self) -> &DeliveryMetadata {
        &self.metadata
    }

    pub fn deliver_count(&self) -> u32 {
        self.metadata.deliver_count
    }
}

impl<T> PartialEq for Message<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.topic == other.topic
    }
}

impl<T> Eq for Message<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(id: &str, fields: &[(&str, &str)]) -> RawEntry {
        RawEntry {
            id: id.to_string(),
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_from_raw_with_header() {
        let entry = raw(
            "1700000000000-0",
            &[("payload", r#"{"body":{"sku":"A1"},"header":{"trace":"t-1"}}"#)],
        );

        let message: Message<serde_json::Value> =
            Message::from_raw("orders", &entry, DeliveryMetadata::first_delivery()).unwrap();

        assert_eq!(message.id(), "1700000000000-0");
        assert_eq!(message.topic(), "orders");
        assert_eq!(message.body(), &json!({"sku": "A1"}));
        assert_eq!(message.header().unwrap()["trace"], json!("t-1"));
        assert_eq!(message.deliver_count(), 1);
    }

    #[test]
    fn test_from_raw_typed_body() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Order {
            qty: u32,
        }

        let entry = raw("5-0", &[("payload", r#"{"body":{"qty":7}}"#)]);
        let message: Message<Order> =
            Message::from_raw("orders", &entry, DeliveryMetadata::with_count(2)).unwrap();

        assert_eq!(message.body(), &Order { qty: 7 });
        assert!(message.header().is_none());
        assert_eq!(message.deliver_count(), 2);
    }

    #[test]
    fn test_payload_field_found_among_others() {
        let entry = raw("3-0", &[("source", "web"), ("payload", r#"{"body":1}"#)]);
        let message: Message<u32> =
            Message::from_raw("t", &entry, DeliveryMetadata::first_delivery()).unwrap();
        assert_eq!(*message.body(), 1);
    }

    #[test]
    fn test_missing_payload_field() {
        let entry = raw("9-0", &[("data", "{}")]);
        let err = Message::<serde_json::Value>::from_raw(
            "orders",
            &entry,
            DeliveryMetadata::first_delivery(),
        )
        .unwrap_err();

        assert!(matches!(err, ParseError::MissingPayload { ref id } if id == "9-0"));
    }

    #[test]
    fn test_malformed_payload() {
        let entry = raw("9-1", &[("payload", "not json")]);
        let err = Message::<serde_json::Value>::from_raw(
            "orders",
            &entry,
            DeliveryMetadata::first_delivery(),
        )
        .unwrap_err();

        assert!(matches!(err, ParseError::Malformed { .. }));
    }

    #[test]
    fn test_equality_by_id_and_topic() {
        let a: Message<u32> = Message::from_raw(
            "t",
            &raw("1-0", &[("payload", r#"{"body":1}"#)]),
            DeliveryMetadata::first_delivery(),
        )
        .unwrap();
        let b: Message<u32> = Message::from_raw(
            "t",
            &raw("1-0", &[("payload", r#"{"body":2}"#)]),
            DeliveryMetadata::with_count(3),
        )
        .unwrap();
        let c: Message<u32> = Message::from_raw(
            "other",
            &raw("1-0", &[("payload", r#"{"body":1}"#)]),
            DeliveryMetadata::first_delivery(),
        )
        .unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_deliver_count_floor() {
        assert_eq!(DeliveryMetadata::with_count(0).deliver_count, 1);
    }

    #[test]
    fn test_payload_serialization_omits_empty_header() {
        let json = serde_json::to_string(&Payload::new(json!({"a": 1}))).unwrap();
        assert_eq!(json, r#"{"body":{"a":1}}"#);
    }
}
