//! Boundaries between the engine and external systems.
//!
//! The engine reads [`SourceRecord`]s through a [`SourceConnector`], turns
//! them into [`HitEvent`]s with a [`Decoder`] and writes finalized
//! [`AggregateRow`]s through a [`SinkWriter`]. In-memory implementations
//! back the tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};

use crate::error::EngineError;
use crate::retry::{RetryPolicy, retry_with_backoff};
use crate::types::{EventTime, HitEvent, Offset, PartitionId, SourceRecord};
use crate::window::{AggregateRow, Emitter, WindowAggregate};

mod emitter;
mod memory;

pub use emitter::*;
pub use memory::*;

/// Partitioned, replayable input.
///
/// Offsets are per partition and dense: the record after offset `n` has
/// offset `n + 1`. `seek` must reposition exactly, since recovery replays
/// everything after the checkpointed offsets.
pub trait SourceConnector: Send {
    /// Next record from any partition, or `None` if nothing arrived within `timeout`.
    fn poll(&mut self, timeout: Duration) -> Result<Option<SourceRecord>>;

    /// True once a bounded source has handed out every record.
    fn is_exhausted(&self) -> bool;

    /// Make `offset` the next record read from `partition_id`.
    fn seek(&mut self, partition_id: PartitionId, offset: Offset) -> Result<()>;

    /// Acknowledge that everything below `offset` is covered by a complete checkpoint.
    fn commit(&mut self, partition_id: PartitionId, offset: Offset) -> Result<()>;
}

/// Turns a raw payload into an event.
pub trait Decoder: Send + Sync {
    fn decode(&self, record: &SourceRecord) -> Result<HitEvent>;
}

/// Idempotent output keyed by `(window_start, host)`.
///
/// Writing a row whose key already exists replaces the stored count.
/// Shared by every worker, hence `&self`.
pub trait SinkWriter: Send + Sync {
    fn upsert(&self, row: &AggregateRow) -> Result<()>;
}

#[cfg(test)]
#[path = "tests/connector_tests.rs"]
mod tests;
