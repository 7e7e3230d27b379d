use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::metrics::PipelineMetrics;
use crate::time::{EVENT_TIME_MAX, EVENT_TIME_MIN};
use crate::types::{EventTime, HitEvent, Watermark, WorkerId};

mod aggregator;
mod assigner;
mod primitives;
mod store;
mod trigger;

pub use aggregator::*;
pub use assigner::*;
pub use primitives::*;
pub use store::*;
pub use trigger::*;

#[cfg(test)]
#[path = "tests/window_tests.rs"]
mod tests;
