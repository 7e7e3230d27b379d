use super::*;

/// Persisted checkpoint metadata. Its presence marks the checkpoint complete.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckpointMetadata {
    pub checkpoint_id: CheckpointId,
    /// Processing time (ms) at which the checkpoint was triggered.
    pub created_at: EventTime,
    /// Next offset to read, per source partition.
    pub input_offsets: BTreeMap<PartitionId, Offset>,
    /// Driver watermark per source partition at the barrier.
    pub watermarks: WatermarkSnapshot,
    pub worker_ids: Vec<WorkerId>,
    pub window_size_ms: i64,
    pub parallelism: usize,
}

impl CheckpointMetadata {
    /// Reject a checkpoint whose state layout differs from `config`.
    ///
    /// Window boundaries and the host-to-worker mapping are baked into the
    /// snapshots, so both must match for the state to be reusable.
    pub fn check_compatible(&self, config: &EngineConfig) -> Result<(), EngineError> {
        if self.window_size_ms != config.window_size_ms() {
            return Err(EngineError::Recovery(format!(
                "checkpoint {} uses window size {}ms, configured {}ms",
                self.checkpoint_id,
                self.window_size_ms,
                config.window_size_ms()
            )));
        }
        if self.parallelism != config.parallelism {
            return Err(EngineError::Recovery(format!(
                "checkpoint {} was taken with parallelism {}, configured {}",
                self.checkpoint_id, self.parallelism, config.parallelism
            )));
        }
        Ok(())
    }
}

/// A complete checkpoint loaded back from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredCheckpoint {
    pub metadata: CheckpointMetadata,
    pub workers: BTreeMap<WorkerId, AggregatorSnapshot>,
}

impl RecoveredCheckpoint {
    pub fn checkpoint_id(&self) -> CheckpointId {
        self.metadata.checkpoint_id
    }
}
