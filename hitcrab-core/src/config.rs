//! Engine configuration passed explicitly to component constructors.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::retry::RetryPolicy;

/// Default tumbling window size.
pub const DEFAULT_WINDOW_SIZE: Duration = Duration::from_secs(5 * 60);

/// Default bound on event out-of-orderness.
pub const DEFAULT_ALLOWED_LATENESS: Duration = Duration::from_secs(15);

/// Default processing-time interval between checkpoints.
pub const DEFAULT_CHECKPOINT_INTERVAL: Duration = Duration::from_millis(10);

/// Default number of parallel workers.
pub const DEFAULT_PARALLELISM: usize = 3;

/// Worker inbox bound. Full inboxes apply backpressure to the driver.
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub window_size: Duration,
    pub allowed_lateness: Duration,
    pub checkpoint_interval: Duration,
    pub parallelism: usize,
    /// Complete checkpoints kept in storage. Never below one.
    pub retained_checkpoints: usize,
    pub channel_capacity: usize,
    /// How long shutdown waits for the final checkpoint to complete.
    pub checkpoint_timeout: Duration,
    pub sink_retry: RetryPolicy,
    pub source_retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            allowed_lateness: DEFAULT_ALLOWED_LATENESS,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            parallelism: DEFAULT_PARALLELISM,
            retained_checkpoints: 3,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            checkpoint_timeout: Duration::from_secs(10),
            sink_retry: RetryPolicy::default(),
            source_retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_window_size(mut self, window_size: Duration) -> Self {
        self.window_size = window_size;
        self
    }

    pub fn with_allowed_lateness(mut self, allowed_lateness: Duration) -> Self {
        self.allowed_lateness = allowed_lateness;
        self
    }

    pub fn with_checkpoint_interval(mut self, checkpoint_interval: Duration) -> Self {
        self.checkpoint_interval = checkpoint_interval;
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn with_retained_checkpoints(mut self, retained_checkpoints: usize) -> Self {
        self.retained_checkpoints = retained_checkpoints.max(1);
        self
    }

    pub fn with_sink_retry(mut self, policy: RetryPolicy) -> Self {
        self.sink_retry = policy;
        self
    }

    pub fn with_source_retry(mut self, policy: RetryPolicy) -> Self {
        self.source_retry = policy;
        self
    }

    pub fn window_size_ms(&self) -> i64 {
        self.window_size.as_millis() as i64
    }

    pub fn allowed_lateness_ms(&self) -> i64 {
        self.allowed_lateness.as_millis() as i64
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.window_size_ms() <= 0 {
            return Err(EngineError::Config(
                "window_size must be at least 1ms".to_string(),
            ));
        }
        if self.parallelism == 0 {
            return Err(EngineError::Config(
                "parallelism must be greater than zero".to_string(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(EngineError::Config(
                "channel_capacity must be greater than zero".to_string(),
            ));
        }
        if self.checkpoint_interval.is_zero() {
            return Err(EngineError::Config(
                "checkpoint_interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
