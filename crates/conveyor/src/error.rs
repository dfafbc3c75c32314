//! Error types for Conveyor.

use thiserror::Error;

/// Conveyor error type.
#[derive(Error, Debug)]
pub enum ConveyorError {
    /// Redis connection or operation error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Failure reported by a non-Redis store implementation
    #[error("Store error: {0}")]
    Store(String),

    /// Store reply did not have the expected shape
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Stream entry could not be turned into a message
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Consumer group could not be created (fatal at startup)
    #[error("Failed to create group {group} on topic {topic}: {source}")]
    GroupCreate {
        topic: String,
        group: String,
        #[source]
        source: Box<ConveyorError>,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Payload serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Lifecycle operation not valid in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// A raw stream entry that could not be parsed into a message.
#[derive(Error, Debug)]
pub enum ParseError {
    /// The entry has no `payload` field
    #[error("entry {id} is missing the payload field")]
    MissingPayload { id: String },

    /// The `payload` field is not a valid serialized payload
    #[error("entry {id} has a malformed payload: {source}")]
    Malformed {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ParseError {
    /// Id of the offending entry.
    pub fn entry_id(&self) -> &str {
        match self {
            ParseError::MissingPayload { id } | ParseError::Malformed { id, .. } => id,
        }
    }
}

/// Result type for Conveyor operations.
pub type ConveyorResult<T> = Result<T, ConveyorError>;
