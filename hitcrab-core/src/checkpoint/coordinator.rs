use super::*;

/// Pending checkpoint tracked by the coordinator.
#[derive(Debug)]
pub struct PendingCheckpoint {
    pub checkpoint_id: CheckpointId,
    pub created_at: EventTime,
    pub input_offsets: BTreeMap<PartitionId, Offset>,
    pub watermarks: WatermarkSnapshot,
    pub expected_workers: HashSet<WorkerId>,
    pub acknowledged_workers: HashSet<WorkerId>,
    pub worker_states: HashMap<WorkerId, Vec<u8>>,
}

/// Drives checkpoints for one pipeline: allocates ids, collects worker
/// acks, persists complete checkpoints and loads the newest one back.
///
/// At most one checkpoint is pending at a time.
pub struct CheckpointCoordinator<S: CheckpointStorage> {
    pub next_checkpoint_id: AtomicU64,
    pub pending_checkpoints: Mutex<HashMap<CheckpointId, PendingCheckpoint>>,
    pub completed_checkpoints: Mutex<VecDeque<CheckpointMetadata>>,
    pub aborted_checkpoints: Mutex<HashSet<CheckpointId>>,
    pub checkpoint_storage: Arc<S>,
    pub retained_checkpoints: usize,
    window_size_ms: i64,
    parallelism: usize,
}

impl<S: CheckpointStorage> CheckpointCoordinator<S> {
    pub fn new(checkpoint_storage: Arc<S>) -> Self {
        Self::for_config(checkpoint_storage, &EngineConfig::default())
    }

    /// Coordinator that stamps checkpoints with `config`'s state layout.
    pub fn for_config(checkpoint_storage: Arc<S>, config: &EngineConfig) -> Self {
        Self {
            next_checkpoint_id: AtomicU64::new(1),
            pending_checkpoints: Mutex::new(HashMap::new()),
            completed_checkpoints: Mutex::new(VecDeque::new()),
            aborted_checkpoints: Mutex::new(HashSet::new()),
            checkpoint_storage,
            retained_checkpoints: config.retained_checkpoints.max(1),
            window_size_ms: config.window_size_ms(),
            parallelism: config.parallelism,
        }
    }

    pub fn with_retained_checkpoints(mut self, retained_checkpoints: usize) -> Self {
        self.retained_checkpoints = retained_checkpoints.max(1);
        self
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.checkpoint_storage
    }

    /// Start a checkpoint covering input up to `input_offsets`.
    ///
    /// The returned barrier must be injected into every expected worker's
    /// inbox right after the last record below those offsets.
    pub fn trigger_checkpoint(
        &self,
        input_offsets: BTreeMap<PartitionId, Offset>,
        expected_workers: Vec<WorkerId>,
    ) -> Result<Barrier> {
        self.trigger_checkpoint_with_watermarks(
            input_offsets,
            WatermarkSnapshot::default(),
            expected_workers,
        )
    }

    /// Like [`trigger_checkpoint`](Self::trigger_checkpoint), also recording
    /// the driver's per-partition watermarks at the barrier.
    pub fn trigger_checkpoint_with_watermarks(
        &self,
        input_offsets: BTreeMap<PartitionId, Offset>,
        watermarks: WatermarkSnapshot,
        expected_workers: Vec<WorkerId>,
    ) -> Result<Barrier> {
        if expected_workers.is_empty() {
            return Err(anyhow!("expected_workers must not be empty"));
        }

        let mut pending_guard = self
            .pending_checkpoints
            .lock()
            .map_err(|_| anyhow!("pending_checkpoints lock poisoned"))?;
        if let Some(existing) = pending_guard.keys().next() {
            return Err(anyhow!("checkpoint {} is still pending", existing));
        }

        let checkpoint_id = self.next_checkpoint_id.fetch_add(1, Ordering::SeqCst);
        let created_at = crate::types::processing_time_ms();
        let pending = PendingCheckpoint {
            checkpoint_id,
            created_at,
            input_offsets,
            watermarks,
            expected_workers: expected_workers.into_iter().collect(),
            acknowledged_workers: HashSet::new(),
            worker_states: HashMap::new(),
        };
        pending_guard.insert(checkpoint_id, pending);
        tracing::debug!("triggered checkpoint {}", checkpoint_id);

        Ok(Barrier::with_timestamp(checkpoint_id, created_at))
    }

    pub fn has_pending(&self) -> Result<bool> {
        let guard = self
            .pending_checkpoints
            .lock()
            .map_err(|_| anyhow!("pending_checkpoints lock poisoned"))?;
        Ok(!guard.is_empty())
    }

    /// Id and trigger time of the pending checkpoint, if any.
    pub fn pending_checkpoint(&self) -> Result<Option<(CheckpointId, EventTime)>> {
        let guard = self
            .pending_checkpoints
            .lock()
            .map_err(|_| anyhow!("pending_checkpoints lock poisoned"))?;
        Ok(guard
            .values()
            .next()
            .map(|pending| (pending.checkpoint_id, pending.created_at)))
    }

    /// Record one worker's snapshot.
    ///
    /// Returns the metadata once the last expected worker has acked and the
    /// checkpoint has been persisted. A persist failure aborts the checkpoint
    /// and surfaces as [`EngineError::CheckpointAborted`].
    pub fn acknowledge_checkpoint(
        &self,
        ack: WorkerCheckpointAck,
    ) -> Result<Option<CheckpointMetadata>> {
        if self
            .aborted_checkpoints
            .lock()
            .map_err(|_| anyhow!("aborted_checkpoints lock poisoned"))?
            .contains(&ack.checkpoint_id)
        {
            // Ignore late acks for aborted checkpoints.
            return Ok(None);
        }

        let mut pending_guard = self
            .pending_checkpoints
            .lock()
            .map_err(|_| anyhow!("pending_checkpoints lock poisoned"))?;

        let pending = pending_guard
            .get_mut(&ack.checkpoint_id)
            .ok_or_else(|| anyhow!("checkpoint {} is not pending", ack.checkpoint_id))?;

        if !pending.expected_workers.contains(&ack.worker_id) {
            return Err(anyhow!(
                "worker {} is not expected for checkpoint {}",
                ack.worker_id,
                ack.checkpoint_id
            ));
        }
        if pending.acknowledged_workers.contains(&ack.worker_id) {
            return Err(anyhow!(
                "duplicate ack from worker {} for checkpoint {}",
                ack.worker_id,
                ack.checkpoint_id
            ));
        }

        pending.acknowledged_workers.insert(ack.worker_id);
        pending.worker_states.insert(ack.worker_id, ack.state);

        if pending.acknowledged_workers.len() != pending.expected_workers.len() {
            return Ok(None);
        }

        let finished = pending_guard
            .remove(&ack.checkpoint_id)
            .ok_or_else(|| anyhow!("checkpoint {} disappeared", ack.checkpoint_id))?;
        drop(pending_guard);

        let checkpoint_id = finished.checkpoint_id;
        match self.finalize_checkpoint(finished) {
            Ok(metadata) => Ok(Some(metadata)),
            Err(err) => {
                let reason = format!("{err:#}");
                self.mark_aborted(checkpoint_id, &reason)?;
                Err(EngineError::CheckpointAborted {
                    checkpoint_id,
                    reason,
                }
                .into())
            }
        }
    }

    /// Drop a pending checkpoint. Returns false if it was not pending.
    pub fn abort_checkpoint(&self, checkpoint_id: CheckpointId, reason: &str) -> Result<bool> {
        let removed = self
            .pending_checkpoints
            .lock()
            .map_err(|_| anyhow!("pending_checkpoints lock poisoned"))?
            .remove(&checkpoint_id)
            .is_some();

        if removed {
            self.mark_aborted(checkpoint_id, reason)?;
        }
        Ok(removed)
    }

    fn mark_aborted(&self, checkpoint_id: CheckpointId, reason: &str) -> Result<()> {
        tracing::warn!("checkpoint {} aborted: {}", checkpoint_id, reason);
        if let Err(err) = self.checkpoint_storage.discard(checkpoint_id) {
            tracing::warn!(
                "failed to discard partial checkpoint {}: {:#}",
                checkpoint_id,
                err
            );
        }
        self.aborted_checkpoints
            .lock()
            .map_err(|_| anyhow!("aborted_checkpoints lock poisoned"))?
            .insert(checkpoint_id);
        Ok(())
    }

    pub fn completed_checkpoint_ids(&self) -> Result<Vec<CheckpointId>> {
        let guard = self
            .completed_checkpoints
            .lock()
            .map_err(|_| anyhow!("completed_checkpoints lock poisoned"))?;
        Ok(guard.iter().map(|m| m.checkpoint_id).collect())
    }

    pub fn aborted_checkpoint_ids(&self) -> Result<Vec<CheckpointId>> {
        let mut ids: Vec<_> = self
            .aborted_checkpoints
            .lock()
            .map_err(|_| anyhow!("aborted_checkpoints lock poisoned"))?
            .iter()
            .copied()
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    pub fn latest_completed(&self) -> Result<Option<CheckpointMetadata>> {
        let guard = self
            .completed_checkpoints
            .lock()
            .map_err(|_| anyhow!("completed_checkpoints lock poisoned"))?;
        Ok(guard.back().cloned())
    }

    /// Load the newest complete checkpoint.
    ///
    /// Partially written checkpoints are discarded first. A complete
    /// checkpoint that fails to load is skipped in favour of an older one;
    /// if none loads, recovery fails with [`EngineError::Recovery`].
    /// `Ok(None)` means there is nothing to recover from.
    pub fn recover(&self) -> Result<Option<RecoveredCheckpoint>> {
        let discarded = self.checkpoint_storage.discard_incomplete()?;
        if !discarded.is_empty() {
            tracing::info!("discarded incomplete checkpoints {:?}", discarded);
        }

        let ids = self.checkpoint_storage.list_checkpoints()?;
        if let Some(max_id) = ids.iter().chain(discarded.iter()).max() {
            self.next_checkpoint_id
                .fetch_max(max_id + 1, Ordering::SeqCst);
        }

        for &checkpoint_id in ids.iter().rev() {
            match self.load_complete(checkpoint_id) {
                Ok(recovered) => {
                    let mut completed_guard = self
                        .completed_checkpoints
                        .lock()
                        .map_err(|_| anyhow!("completed_checkpoints lock poisoned"))?;
                    completed_guard.clear();
                    completed_guard.push_back(recovered.metadata.clone());
                    tracing::info!(
                        "recovered checkpoint {} with offsets {:?}",
                        checkpoint_id,
                        recovered.metadata.input_offsets
                    );
                    return Ok(Some(recovered));
                }
                Err(err) => tracing::warn!(
                    "checkpoint {} is not loadable, trying an older one: {:#}",
                    checkpoint_id,
                    err
                ),
            }
        }

        if ids.is_empty() {
            Ok(None)
        } else {
            Err(EngineError::Recovery(format!(
                "none of the {} complete checkpoints could be loaded",
                ids.len()
            ))
            .into())
        }
    }

    fn load_complete(&self, checkpoint_id: CheckpointId) -> Result<RecoveredCheckpoint> {
        let metadata = self.checkpoint_storage.load_checkpoint(checkpoint_id)?;
        let mut workers = BTreeMap::new();
        for &worker_id in &metadata.worker_ids {
            let bytes = self
                .checkpoint_storage
                .load_worker_state(checkpoint_id, worker_id)?;
            let snapshot: AggregatorSnapshot = bincode::deserialize(&bytes)
                .with_context(|| format!("decode worker {worker_id} state failed"))?;
            if snapshot.worker_id != worker_id {
                return Err(anyhow!(
                    "worker {} blob holds state of worker {}",
                    worker_id,
                    snapshot.worker_id
                ));
            }
            workers.insert(worker_id, snapshot);
        }
        Ok(RecoveredCheckpoint { metadata, workers })
    }

    fn finalize_checkpoint(&self, pending: PendingCheckpoint) -> Result<CheckpointMetadata> {
        let mut worker_ids: Vec<WorkerId> = pending.expected_workers.iter().copied().collect();
        worker_ids.sort_unstable();

        let metadata = CheckpointMetadata {
            checkpoint_id: pending.checkpoint_id,
            created_at: pending.created_at,
            input_offsets: pending.input_offsets,
            watermarks: pending.watermarks,
            worker_ids,
            window_size_ms: self.window_size_ms,
            parallelism: self.parallelism,
        };

        for (worker_id, state) in pending.worker_states {
            self.checkpoint_storage
                .save_worker_state(metadata.checkpoint_id, worker_id, state)?;
        }
        self.checkpoint_storage.save_checkpoint(metadata.clone())?;
        if let Err(err) = self.checkpoint_storage.purge(self.retained_checkpoints) {
            tracing::warn!("failed to purge old checkpoints: {:#}", err);
        }

        let mut completed_guard = self
            .completed_checkpoints
            .lock()
            .map_err(|_| anyhow!("completed_checkpoints lock poisoned"))?;
        completed_guard.push_back(metadata.clone());
        while completed_guard.len() > self.retained_checkpoints {
            completed_guard.pop_front();
        }
        drop(completed_guard);

        // Ids are allocated in order, so no ack can still target an older one.
        self.aborted_checkpoints
            .lock()
            .map_err(|_| anyhow!("aborted_checkpoints lock poisoned"))?
            .retain(|id| *id > metadata.checkpoint_id);
        tracing::info!(
            "checkpoint {} complete, offsets {:?}",
            metadata.checkpoint_id,
            metadata.input_offsets
        );

        Ok(metadata)
    }
}
