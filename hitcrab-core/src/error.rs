//! Failure taxonomy.
//!
//! Transient I/O failures are retried at the boundary where they happen and
//! only surface here once retries are exhausted. Late events are not errors.

use crate::types::{CheckpointId, Offset, PartitionId, WorkerId};

/// Errors that carry a classification beyond "something failed".
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid engine configuration. Fatal at construction.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// State cannot be recovered with correctness guarantees. Fatal at startup.
    #[error("recovery failed: {0}")]
    Recovery(String),

    /// The source could not reposition to a checkpointed offset. Fatal at startup.
    #[error("source cannot seek partition {partition_id} to offset {offset}: {reason}")]
    Seek {
        partition_id: PartitionId,
        offset: Offset,
        reason: String,
    },

    /// A checkpoint could not be persisted; the previous complete one stays valid.
    #[error("checkpoint {checkpoint_id} aborted: {reason}")]
    CheckpointAborted {
        checkpoint_id: CheckpointId,
        reason: String,
    },

    /// A worker thread stopped unexpectedly.
    #[error("worker {0} failed: {1}")]
    WorkerFailed(WorkerId, String),

    /// A source record could not be decoded into an event.
    #[error("decode failed: {0}")]
    Decode(String),
}

impl EngineError {
    /// Whether the pipeline must stop rather than continue.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::Config(_)
                | EngineError::Recovery(_)
                | EngineError::Seek { .. }
                | EngineError::WorkerFailed(..)
        )
    }
}

/// Classify an arbitrary error: unknown errors are treated as fatal.
pub fn is_fatal(err: &anyhow::Error) -> bool {
    err.downcast_ref::<EngineError>()
        .map_or(true, EngineError::is_fatal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_recovery_and_config_are_fatal() {
        assert!(EngineError::Recovery("no checkpoint".into()).is_fatal());
        assert!(EngineError::Config("parallelism".into()).is_fatal());
        assert!(
            EngineError::Seek {
                partition_id: 1,
                offset: 9,
                reason: "truncated".into(),
            }
            .is_fatal()
        );
    }

    #[test]
    fn test_checkpoint_abort_and_decode_are_not_fatal() {
        assert!(
            !EngineError::CheckpointAborted {
                checkpoint_id: 3,
                reason: "disk full".into(),
            }
            .is_fatal()
        );
        assert!(!EngineError::Decode("bad json".into()).is_fatal());
    }

    #[test]
    fn test_is_fatal_downcasts_through_anyhow() {
        let err = anyhow::Error::new(EngineError::Decode("x".into())).context("ingest");
        assert!(!is_fatal(&err));
        assert!(is_fatal(&anyhow!("unclassified")));
    }

    #[test]
    fn test_seek_error_message() {
        let err = EngineError::Seek {
            partition_id: 2,
            offset: 40,
            reason: "offset out of range".into(),
        };
        assert_eq!(
            err.to_string(),
            "source cannot seek partition 2 to offset 40: offset out of range"
        );
    }
}
