//! Barrier-based checkpointing of worker state and source offsets.
//!
//! A checkpoint is complete once every worker blob and then the metadata
//! record have been persisted. The metadata is the completion marker:
//! storage never lists a checkpoint whose metadata is missing.

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::time::WatermarkSnapshot;
use crate::types::{Barrier, CheckpointId, EventTime, Offset, PartitionId, WorkerId};
use crate::window::AggregatorSnapshot;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

mod coordinator;
mod events;
mod metadata;
mod storage;

pub use coordinator::*;
pub use events::*;
pub use metadata::*;
pub use storage::*;

#[cfg(test)]
#[path = "tests/checkpoint_tests.rs"]
mod tests;
