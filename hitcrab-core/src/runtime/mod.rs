//! Runtime-domain modules: key partitioning, worker threads and the
//! pipeline driver that feeds them.

use std::collections::BTreeMap;
use std::hash::{BuildHasher, BuildHasherDefault, Hash};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use seahash::SeaHasher;

use crate::checkpoint::{
    CheckpointCoordinator, CheckpointMetadata, CheckpointStorage, WorkerCheckpointAbort,
    WorkerCheckpointAck, WorkerCheckpointEvent,
};
use crate::config::EngineConfig;
use crate::connector::{Decoder, SinkEmitter, SinkWriter, SourceConnector};
use crate::error::EngineError;
use crate::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::retry::retry_with_backoff;
use crate::time::{EVENT_TIME_MIN, WatermarkTracker};
use crate::types::{
    CheckpointId, EventTime, HitEvent, Offset, PartitionId, SourceRecord, StreamElement,
    Watermark, WorkerId,
};
use crate::window::{Emitter, WindowAggregator};

pub mod partitioner;
pub mod pipeline;
pub mod worker;

pub use partitioner::*;
pub use pipeline::*;
pub use worker::*;

#[cfg(test)]
#[path = "tests/runtime_tests.rs"]
mod tests;
