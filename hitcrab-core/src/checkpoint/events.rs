use super::*;

/// Worker-level checkpoint acknowledgement payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerCheckpointAck {
    pub checkpoint_id: CheckpointId,
    pub worker_id: WorkerId,
    /// Serialized [`AggregatorSnapshot`] taken at the barrier.
    pub state: Vec<u8>,
}

/// Worker-level checkpoint abort payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerCheckpointAbort {
    pub checkpoint_id: CheckpointId,
    pub worker_id: WorkerId,
    pub reason: String,
}

/// Worker -> driver checkpoint control event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum WorkerCheckpointEvent {
    Ack(WorkerCheckpointAck),
    Aborted(WorkerCheckpointAbort),
}

impl WorkerCheckpointEvent {
    pub fn checkpoint_id(&self) -> CheckpointId {
        match self {
            WorkerCheckpointEvent::Ack(ack) => ack.checkpoint_id,
            WorkerCheckpointEvent::Aborted(abort) => abort.checkpoint_id,
        }
    }
}
