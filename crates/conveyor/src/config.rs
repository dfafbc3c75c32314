//! Configuration for Conveyor.

use crate::error::{ConveyorError, ConveyorResult};
use std::time::Duration;

/// Default time an entry must sit unacknowledged before peers may reclaim it.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(10_000);
/// Default maximum number of entries per fetch.
pub const DEFAULT_BATCH_SIZE: usize = 1;
/// Default number of deliveries before a failing message is abandoned.
pub const DEFAULT_MAX_DELIVER_TIMES: u32 = 3;
/// Live consumption cycle length.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);
/// Stale reclaim cycle length.
pub const DEFAULT_STALE_INTERVAL: Duration = Duration::from_millis(1_000);

/// Connection-level configuration.
#[derive(Debug, Clone)]
pub struct ConveyorConfig {
    /// Redis connection URL
    pub redis_url: String,

    /// Consumer name inside every group (stable for the process lifetime)
    pub consumer_id: String,
}

impl ConveyorConfig {
    /// Build a config from environment variables.
    ///
    /// `REDIS_URL` and `CONVEYOR_CONSUMER_ID` override the defaults. Without a
    /// consumer id a fresh `conveyor-<uuid>` name is generated.
    pub fn from_env() -> Self {
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());

        let consumer_id = std::env::var("CONVEYOR_CONSUMER_ID")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("conveyor-{}", uuid::Uuid::new_v4()));

        Self {
            redis_url,
            consumer_id,
        }
    }
}

/// Delivery policy for one consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Idle time after which a pending entry becomes reclaimable
    pub timeout: Duration,

    /// Maximum entries per fetch, per topic
    pub batch_size: usize,

    /// Deliveries allowed before a failing message is abandoned
    pub max_deliver_times: u32,

    /// Live consumption cycle length
    pub poll_interval: Duration,

    /// Stale reclaim cycle length
    pub stale_interval: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            batch_size: DEFAULT_BATCH_SIZE,
            max_deliver_times: DEFAULT_MAX_DELIVER_TIMES,
            poll_interval: DEFAULT_POLL_INTERVAL,
            stale_interval: DEFAULT_STALE_INTERVAL,
        }
    }
}

impl ConsumerConfig {
    /// Defaults overridden by `CONVEYOR_TIMEOUT_MS`, `CONVEYOR_BATCH_SIZE`
    /// and `CONVEYOR_MAX_DELIVER_TIMES` when set and parseable.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(ms) = env_parse::<u64>("CONVEYOR_TIMEOUT_MS") {
            config.timeout = Duration::from_millis(ms);
        }
        if let Some(size) = env_parse::<usize>("CONVEYOR_BATCH_SIZE") {
            config.batch_size = size;
        }
        if let Some(times) = env_parse::<u32>("CONVEYOR_MAX_DELIVER_TIMES") {
            config.max_deliver_times = times;
        }

        config
    }

    /// Reject values the delivery loops cannot work with.
    pub fn validate(&self) -> ConveyorResult<()> {
        if self.batch_size == 0 {
            return Err(ConveyorError::Config(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.max_deliver_times == 0 {
            return Err(ConveyorError::Config(
                "max_deliver_times must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}
