use super::*;

/// Storage interface for checkpoint metadata and per-worker state.
///
/// Writers persist every worker blob before the metadata. Readers only see
/// checkpoints whose metadata exists.
pub trait CheckpointStorage: Send + Sync {
    fn save_checkpoint(&self, metadata: CheckpointMetadata) -> Result<()>;
    fn save_worker_state(
        &self,
        checkpoint_id: CheckpointId,
        worker_id: WorkerId,
        state: Vec<u8>,
    ) -> Result<()>;
    fn load_checkpoint(&self, checkpoint_id: CheckpointId) -> Result<CheckpointMetadata>;
    fn load_worker_state(&self, checkpoint_id: CheckpointId, worker_id: WorkerId)
    -> Result<Vec<u8>>;
    /// Ids of complete checkpoints, ascending.
    fn list_checkpoints(&self) -> Result<Vec<CheckpointId>>;
    /// Remove everything stored for `checkpoint_id`, complete or not.
    fn discard(&self, checkpoint_id: CheckpointId) -> Result<()>;
    /// Remove partially written checkpoints; returns their ids.
    fn discard_incomplete(&self) -> Result<Vec<CheckpointId>>;
    /// Keep only the newest `keep_last_n` complete checkpoints.
    fn purge(&self, keep_last_n: usize) -> Result<()>;
}

/// In-memory checkpoint storage for tests and local single-process execution.
#[derive(Default)]
pub struct InMemoryCheckpointStorage {
    metadata: Mutex<HashMap<CheckpointId, CheckpointMetadata>>,
    worker_states: Mutex<HashMap<(CheckpointId, WorkerId), Vec<u8>>>,
}

impl InMemoryCheckpointStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStorage for InMemoryCheckpointStorage {
    fn save_checkpoint(&self, metadata: CheckpointMetadata) -> Result<()> {
        self.metadata
            .lock()
            .map_err(|_| anyhow!("checkpoint metadata lock poisoned"))?
            .insert(metadata.checkpoint_id, metadata);
        Ok(())
    }

    fn save_worker_state(
        &self,
        checkpoint_id: CheckpointId,
        worker_id: WorkerId,
        state: Vec<u8>,
    ) -> Result<()> {
        self.worker_states
            .lock()
            .map_err(|_| anyhow!("checkpoint worker-state lock poisoned"))?
            .insert((checkpoint_id, worker_id), state);
        Ok(())
    }

    fn load_checkpoint(&self, checkpoint_id: CheckpointId) -> Result<CheckpointMetadata> {
        self.metadata
            .lock()
            .map_err(|_| anyhow!("checkpoint metadata lock poisoned"))?
            .get(&checkpoint_id)
            .cloned()
            .ok_or_else(|| anyhow!("checkpoint {} not found", checkpoint_id))
    }

    fn load_worker_state(
        &self,
        checkpoint_id: CheckpointId,
        worker_id: WorkerId,
    ) -> Result<Vec<u8>> {
        self.worker_states
            .lock()
            .map_err(|_| anyhow!("checkpoint worker-state lock poisoned"))?
            .get(&(checkpoint_id, worker_id))
            .cloned()
            .ok_or_else(|| {
                anyhow!(
                    "worker {} state not found for checkpoint {}",
                    worker_id,
                    checkpoint_id
                )
            })
    }

    fn list_checkpoints(&self) -> Result<Vec<CheckpointId>> {
        let mut ids: Vec<_> = self
            .metadata
            .lock()
            .map_err(|_| anyhow!("checkpoint metadata lock poisoned"))?
            .keys()
            .copied()
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    fn discard(&self, checkpoint_id: CheckpointId) -> Result<()> {
        self.metadata
            .lock()
            .map_err(|_| anyhow!("checkpoint metadata lock poisoned"))?
            .remove(&checkpoint_id);
        self.worker_states
            .lock()
            .map_err(|_| anyhow!("checkpoint worker-state lock poisoned"))?
            .retain(|(id, _), _| *id != checkpoint_id);
        Ok(())
    }

    fn discard_incomplete(&self) -> Result<Vec<CheckpointId>> {
        let meta_guard = self
            .metadata
            .lock()
            .map_err(|_| anyhow!("checkpoint metadata lock poisoned"))?;
        let mut state_guard = self
            .worker_states
            .lock()
            .map_err(|_| anyhow!("checkpoint worker-state lock poisoned"))?;

        let mut discarded: Vec<CheckpointId> = state_guard
            .keys()
            .map(|(id, _)| *id)
            .filter(|id| !meta_guard.contains_key(id))
            .collect();
        discarded.sort_unstable();
        discarded.dedup();
        state_guard.retain(|(id, _), _| meta_guard.contains_key(id));
        Ok(discarded)
    }

    fn purge(&self, keep_last_n: usize) -> Result<()> {
        let mut ids = self.list_checkpoints()?;
        if ids.len() <= keep_last_n {
            return Ok(());
        }
        let purge_count = ids.len() - keep_last_n;
        ids.truncate(purge_count);

        for checkpoint_id in ids {
            self.discard(checkpoint_id)?;
        }
        Ok(())
    }
}

const METADATA_FILE: &str = "metadata.bin";

/// File-system checkpoint storage.
///
/// Layout: `<base>/chk-<id>/worker-<n>.bin` and `<base>/chk-<id>/metadata.bin`.
/// Every file is written to a `.tmp` sibling and renamed into place, so a
/// crash mid-write never leaves a truncated file under its final name.
pub struct FsCheckpointStorage {
    base_path: PathBuf,
}

impl FsCheckpointStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).with_context(|| {
            format!(
                "failed to create checkpoint storage directory {}",
                base_path.display()
            )
        })?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn checkpoint_dir(&self, checkpoint_id: CheckpointId) -> PathBuf {
        self.base_path.join(format!("chk-{checkpoint_id}"))
    }

    fn metadata_path(&self, checkpoint_id: CheckpointId) -> PathBuf {
        self.checkpoint_dir(checkpoint_id).join(METADATA_FILE)
    }

    fn worker_state_path(&self, checkpoint_id: CheckpointId, worker_id: WorkerId) -> PathBuf {
        self.checkpoint_dir(checkpoint_id)
            .join(format!("worker-{worker_id}.bin"))
    }

    fn write_atomic(&self, checkpoint_id: CheckpointId, path: &Path, bytes: &[u8]) -> Result<()> {
        let checkpoint_dir = self.checkpoint_dir(checkpoint_id);
        fs::create_dir_all(&checkpoint_dir).with_context(|| {
            format!(
                "failed to create checkpoint dir {}",
                checkpoint_dir.display()
            )
        })?;
        let tmp_path = path.with_extension("bin.tmp");
        let mut file = fs::File::create(&tmp_path)
            .with_context(|| format!("create {} failed", tmp_path.display()))?;
        file.write_all(bytes)
            .and_then(|()| file.sync_all())
            .with_context(|| format!("write {} failed", tmp_path.display()))?;
        drop(file);
        fs::rename(&tmp_path, path)
            .with_context(|| format!("rename to {} failed", path.display()))?;
        sync_dir(&checkpoint_dir)
    }

    /// All `chk-*` directories with their parsed ids, complete or not.
    fn checkpoint_dirs(&self) -> Result<Vec<CheckpointId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.base_path)
            .with_context(|| format!("read_dir failed for {}", self.base_path.display()))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(id_part) = name.strip_prefix("chk-") {
                if let Ok(id) = id_part.parse::<CheckpointId>() {
                    ids.push(id);
                }
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }
}

impl CheckpointStorage for FsCheckpointStorage {
    fn save_checkpoint(&self, metadata: CheckpointMetadata) -> Result<()> {
        let bytes =
            bincode::serialize(&metadata).context("serialize checkpoint metadata failed")?;
        self.write_atomic(
            metadata.checkpoint_id,
            &self.metadata_path(metadata.checkpoint_id),
            &bytes,
        )
        .context("write checkpoint metadata failed")?;
        // The chk-N entry itself must survive a crash along with its contents.
        sync_dir(&self.base_path)
    }

    fn save_worker_state(
        &self,
        checkpoint_id: CheckpointId,
        worker_id: WorkerId,
        state: Vec<u8>,
    ) -> Result<()> {
        self.write_atomic(
            checkpoint_id,
            &self.worker_state_path(checkpoint_id, worker_id),
            &state,
        )
        .context("write checkpoint worker state failed")
    }

    fn load_checkpoint(&self, checkpoint_id: CheckpointId) -> Result<CheckpointMetadata> {
        let bytes = fs::read(self.metadata_path(checkpoint_id))
            .context("read checkpoint metadata failed")?;
        bincode::deserialize(&bytes).context("deserialize checkpoint metadata failed")
    }

    fn load_worker_state(
        &self,
        checkpoint_id: CheckpointId,
        worker_id: WorkerId,
    ) -> Result<Vec<u8>> {
        fs::read(self.worker_state_path(checkpoint_id, worker_id))
            .context("read checkpoint worker state failed")
    }

    fn list_checkpoints(&self) -> Result<Vec<CheckpointId>> {
        Ok(self
            .checkpoint_dirs()?
            .into_iter()
            .filter(|id| self.metadata_path(*id).is_file())
            .collect())
    }

    fn discard(&self, checkpoint_id: CheckpointId) -> Result<()> {
        let dir = self.checkpoint_dir(checkpoint_id);
        if dir.exists() {
            fs::remove_dir_all(&dir)
                .with_context(|| format!("failed to remove {}", dir.display()))?;
        }
        Ok(())
    }

    fn discard_incomplete(&self) -> Result<Vec<CheckpointId>> {
        let mut discarded = Vec::new();
        for checkpoint_id in self.checkpoint_dirs()? {
            if !self.metadata_path(checkpoint_id).is_file() {
                self.discard(checkpoint_id)?;
                discarded.push(checkpoint_id);
            }
        }
        Ok(discarded)
    }

    fn purge(&self, keep_last_n: usize) -> Result<()> {
        let ids = self.list_checkpoints()?;
        if ids.len() <= keep_last_n {
            return Ok(());
        }
        let purge_count = ids.len() - keep_last_n;
        for checkpoint_id in ids.into_iter().take(purge_count) {
            self.discard(checkpoint_id)?;
        }
        Ok(())
    }
}

/// Flush directory entries so a completed rename survives a crash.
fn sync_dir(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        fs::File::open(path)
            .and_then(|dir| dir.sync_all())
            .with_context(|| format!("fsync {} failed", path.display()))?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}
