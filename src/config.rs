//! # Runtime Configuration
//!
//! [`RuntimeConfig`] gathers every tunable of a node: request timeouts, fiber sizing,
//! coordinator retry policy and message limits. Defaults mirror a production node; any
//! subset can be overridden from TOML:
//!
//! ```rust
//! use actor_mesh::RuntimeConfig;
//!
//! let config = RuntimeConfig::from_toml_str("send_timeout_ms = 250\nread_parallelism = 4").unwrap();
//! assert_eq!(config.send_timeout().as_millis(), 250);
//! assert_eq!(config.read_parallelism, 4);
//! assert_eq!(config.create_attempts, 3);
//! ```

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// How long `send_request` waits for a reply.
    pub send_timeout_ms: u64,
    /// Maximum number of Read-locked items running at once on one fiber.
    pub read_parallelism: usize,
    /// Capacity of a fiber's work queue.
    pub max_queue_size: usize,
    /// Items executed per `PollingFiber::pump` call.
    pub polling_batch_limit: usize,
    /// How long one placement attempt waits for its `ActorCreated` broadcast.
    pub create_timeout_ms: u64,
    /// Placement attempts before `get_or_create` gives up.
    pub create_attempts: u32,
    /// Initial backoff between placement attempts; doubled after every retry.
    pub create_backoff_ms: u64,
    /// Close peer channels that stay silent for this long.
    pub idle_disconnect_timeout_ms: Option<u64>,
    /// Largest encoded envelope accepted or produced.
    pub max_message_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            send_timeout_ms: 100_000,
            read_parallelism: 10,
            max_queue_size: 10_000,
            polling_batch_limit: 10_000,
            create_timeout_ms: 5_000,
            create_attempts: 3,
            create_backoff_ms: 100,
            idle_disconnect_timeout_ms: None,
            max_message_size: 1024 * 1024,
        }
    }
}

impl RuntimeConfig {
    /// Parses a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        Ok(toml::from_str(source)?)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn create_timeout(&self) -> Duration {
        Duration::from_millis(self.create_timeout_ms)
    }

    pub fn create_backoff(&self) -> Duration {
        Duration::from_millis(self.create_backoff_ms)
    }

    pub fn idle_disconnect_timeout(&self) -> Option<Duration> {
        self.idle_disconnect_timeout_ms.map(Duration::from_millis)
    }
}
