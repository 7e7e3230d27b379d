use serde::{Deserialize, Serialize};

/// Event time in milliseconds since epoch.
pub type EventTime = i64;

/// Unique identifier for checkpoint barriers.
pub type CheckpointId = u64;

/// Identifier of a source input partition.
pub type PartitionId = u32;

/// Position inside a source input partition.
pub type Offset = u64;

/// Index of a parallel worker (key shard).
pub type WorkerId = usize;

/// A decoded web-access event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HitEvent {
    /// Grouping key.
    pub host: String,
    pub event_time: EventTime,
    /// Source partition the event was read from.
    pub partition_id: PartitionId,
}

impl HitEvent {
    pub fn new(host: impl Into<String>, event_time: EventTime, partition_id: PartitionId) -> Self {
        Self {
            host: host.into(),
            event_time,
            partition_id,
        }
    }
}

/// Raw record handed out by a source connector, prior to decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    pub partition_id: PartitionId,
    pub offset: Offset,
    pub payload: Vec<u8>,
}

impl SourceRecord {
    pub fn new(partition_id: PartitionId, offset: Offset, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            partition_id,
            offset,
            payload: payload.into(),
        }
    }
}

/// Watermark indicates that no elements with timestamp < this value are expected.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Watermark {
    pub timestamp: EventTime,
}

impl Watermark {
    /// Create a new watermark at the given timestamp.
    pub fn new(timestamp: EventTime) -> Self {
        Self { timestamp }
    }
}

impl std::fmt::Display for Watermark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Watermark({}ms)", self.timestamp)
    }
}

/// Checkpoint barrier for Chandy-Lamport snapshots.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Barrier {
    pub checkpoint_id: CheckpointId,
    /// Processing time (ms) at which the checkpoint was triggered.
    pub timestamp: EventTime,
}

impl Barrier {
    /// Create a new checkpoint barrier with the given ID.
    pub fn new(checkpoint_id: CheckpointId) -> Self {
        Self {
            checkpoint_id,
            timestamp: 0,
        }
    }

    /// Create a new checkpoint barrier with explicit timestamp.
    pub fn with_timestamp(checkpoint_id: CheckpointId, timestamp: EventTime) -> Self {
        Self {
            checkpoint_id,
            timestamp,
        }
    }
}

/// Unit flowing through a worker inbox.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamElement<T> {
    /// User data record.
    Record(T),
    /// Stream-wide event-time progress, broadcast to every worker.
    Watermark(Watermark),
    /// Checkpoint barrier: snapshot state as of this position.
    CheckpointBarrier(Barrier),
    /// Bounded input finished: finalize every open window.
    Drain,
    /// Stop the worker.
    End,
}

impl<T> StreamElement<T> {
    /// Create a record element.
    pub fn record(value: T) -> Self {
        Self::Record(value)
    }

    /// Create a watermark element.
    pub fn watermark(timestamp: EventTime) -> Self {
        Self::Watermark(Watermark::new(timestamp))
    }

    /// Create a checkpoint barrier element.
    pub fn barrier(checkpoint_id: CheckpointId) -> Self {
        Self::CheckpointBarrier(Barrier::new(checkpoint_id))
    }

    /// Create a checkpoint barrier element with explicit timestamp.
    pub fn barrier_with_timestamp(checkpoint_id: CheckpointId, timestamp: EventTime) -> Self {
        Self::CheckpointBarrier(Barrier::with_timestamp(checkpoint_id, timestamp))
    }
}

/// Current wall-clock time in milliseconds since epoch.
pub fn processing_time_ms() -> EventTime {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as EventTime)
        .unwrap_or_default()
}

#[cfg(test)]
#[path = "tests/types_tests.rs"]
mod tests;
