use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{EventTime, PartitionId, Watermark};

mod watermark;

pub use watermark::*;

#[cfg(test)]
#[path = "tests/time_tests.rs"]
mod tests;
